//! Progress reporting for chat turns.

use super::types::ChatEvent;

/// Receives streaming text and tool activity while a turn runs.
///
/// Any `FnMut(ChatEvent)` closure is a reporter.
pub trait ProgressReporter {
    fn report(&mut self, event: ChatEvent);
}

/// Reporter that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&mut self, _event: ChatEvent) {}
}

impl<F> ProgressReporter for F
where
    F: FnMut(ChatEvent),
{
    fn report(&mut self, event: ChatEvent) {
        self(event);
    }
}
