//! Tool call dispatch.

use std::time::Instant;

use futures::future::join_all;
use serde_json::{Value, json};

use super::error::ToolError;
use super::mode::{Mode, SWITCH_MODE_TOOL};
use super::progress::ProgressReporter;
use super::tools::{ToolContext, ToolRegistry, switched_mode};
use super::types::{ChatEvent, Message, ToolCall, ToolCallResult};

/// Results of one batch of tool calls, in request order.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub results: Vec<ToolCallResult>,
    /// One `tool` message per call, ready to append.
    pub messages: Vec<Message>,
    /// Target of the last successful `switchMode` call, if any.
    pub mode_switch: Option<Mode>,
}

/// Run every call concurrently and collect the results in request order.
///
/// Failures never escape: unknown tools, bad arguments and tool errors all
/// become `{"error": ...}` results for the model to read.
pub async fn dispatch(
    calls: &[ToolCall],
    registry: &ToolRegistry,
    ctx: &ToolContext,
    reporter: &mut dyn ProgressReporter,
) -> DispatchOutcome {
    for call in calls {
        reporter.report(ChatEvent::ToolStart {
            id: call.id.clone(),
            name: call.name.clone(),
        });
    }

    let outputs = join_all(calls.iter().map(|call| run_call(call, registry, ctx))).await;

    let mut outcome = DispatchOutcome::default();
    for (call, (result, is_error)) in calls.iter().zip(outputs) {
        let content = serde_json::to_string(&result).unwrap_or_else(|_| result.to_string());

        if call.name == SWITCH_MODE_TOOL && !is_error {
            if let Some(mode) = switched_mode(&result) {
                outcome.mode_switch = Some(mode);
            }
        }

        reporter.report(ChatEvent::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            output: content.clone(),
            is_error,
        });
        outcome
            .messages
            .push(Message::tool_result(call.id.clone(), content));
        outcome.results.push(ToolCallResult {
            call: call.clone(),
            result,
            is_error,
        });
    }
    outcome
}

async fn run_call(call: &ToolCall, registry: &ToolRegistry, ctx: &ToolContext) -> (Value, bool) {
    let started = Instant::now();
    let outcome = invoke(call, registry, ctx).await;
    let elapsed_ms = started.elapsed().as_millis();

    match outcome {
        Ok(value) => {
            tracing::info!(tool = %call.name, id = %call.id, elapsed_ms, "tool finished");
            (value, false)
        }
        Err(e) => {
            tracing::info!(tool = %call.name, id = %call.id, elapsed_ms, error = %e, "tool failed");
            (json!({ "error": e.to_string() }), true)
        }
    }
}

async fn invoke(call: &ToolCall, registry: &ToolRegistry, ctx: &ToolContext) -> Result<Value, ToolError> {
    let tool = registry
        .lookup(&call.name)
        .ok_or_else(|| ToolError::Unavailable(format!("unknown tool: {}", call.name)))?;
    if !tool.available_in(ctx.mode) {
        return Err(ToolError::Unavailable(format!(
            "tool {} is not available in {} mode",
            call.name, ctx.mode
        )));
    }
    let args = parse_arguments(&call.arguments_json)?;
    tool.invoke(args, ctx).await
}

/// Decode a call's argument text. Empty text means no arguments.
///
/// # Errors
///
/// Returns [`ToolError::InvalidArguments`] when the text is not a JSON object.
pub fn parse_arguments(arguments_json: &str) -> Result<Value, ToolError> {
    if arguments_json.trim().is_empty() {
        return Ok(json!({}));
    }
    match serde_json::from_str(arguments_json) {
        Ok(Value::Null) => Ok(json!({})),
        Ok(object @ Value::Object(_)) => Ok(object),
        Ok(other) => Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(ToolError::InvalidArguments(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Barrier;

    use super::*;
    use crate::core::agent::progress::NoopReporter;
    use crate::core::agent::tools::{SwitchModeTool, Tool};

    struct SleepTool {
        name: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl Tool for SleepTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn invoke(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            tokio::time::sleep(self.delay).await;
            if args.get("fail").is_some() {
                return Err(ToolError::Execution("asked to fail".to_string()));
            }
            Ok(json!({ "tool": self.name }))
        }
    }

    struct BarrierTool(Arc<Barrier>);

    #[async_trait]
    impl Tool for BarrierTool {
        fn name(&self) -> &str {
            "barrier"
        }

        fn description(&self) -> &str {
            "waits for its siblings"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            self.0.wait().await;
            Ok(json!("released"))
        }
    }

    fn call(id: &str, name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments_json: args.to_string(),
        }
    }

    fn ctx(mode: Mode) -> ToolContext {
        ToolContext::new(".", mode)
    }

    #[tokio::test]
    async fn results_follow_request_order() {
        let mut registry = ToolRegistry::new();
        registry.register(SleepTool {
            name: "slow",
            delay: Duration::from_millis(80),
        });
        registry.register(SleepTool {
            name: "fast",
            delay: Duration::from_millis(1),
        });

        let calls = vec![call("1", "slow", "{}"), call("2", "fast", "{}")];
        let mut finished = Vec::new();
        let mut reporter = |event: ChatEvent| {
            if let ChatEvent::ToolCall { id, .. } = event {
                finished.push(id);
            }
        };
        let outcome = dispatch(&calls, &registry, &ctx(Mode::Execute), &mut reporter).await;

        let ids: Vec<&str> = outcome
            .messages
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(finished, vec!["1", "2"]);
        assert_eq!(outcome.results[0].result, json!({"tool": "slow"}));
    }

    #[tokio::test]
    async fn calls_run_concurrently() {
        let barrier = Arc::new(Barrier::new(3));
        let mut registry = ToolRegistry::new();
        registry.register(BarrierTool(barrier));

        let calls: Vec<ToolCall> = (0..3).map(|i| call(&i.to_string(), "barrier", "")).collect();
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            dispatch(&calls, &registry, &ctx(Mode::Execute), &mut NoopReporter),
        )
        .await
        .expect("sequential dispatch would deadlock on the barrier");

        assert_eq!(outcome.messages.len(), 3);
        assert!(outcome.results.iter().all(|r| !r.is_error));
        assert_eq!(outcome.messages[0].text_content(), "\"released\"");
    }

    #[test]
    fn unknown_tool_becomes_error_result() {
        let registry = ToolRegistry::new();
        let calls = vec![call("x", "doesNotExist", "{}")];
        let outcome = tokio_test::block_on(dispatch(
            &calls,
            &registry,
            &ctx(Mode::Execute),
            &mut NoopReporter,
        ));

        assert!(outcome.results[0].is_error);
        assert_eq!(
            outcome.messages[0].text_content(),
            r#"{"error":"unknown tool: doesNotExist"}"#
        );
        assert_eq!(outcome.messages[0].tool_call_id.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn failures_do_not_affect_siblings() {
        let mut registry = ToolRegistry::new();
        registry.register(SleepTool {
            name: "t",
            delay: Duration::from_millis(1),
        });

        let calls = vec![
            call("a", "t", "{\"fail\": true}"),
            call("b", "t", "not json"),
            call("c", "t", "[1, 2]"),
            call("d", "t", ""),
        ];
        let outcome = dispatch(&calls, &registry, &ctx(Mode::Execute), &mut NoopReporter).await;

        let errors: Vec<bool> = outcome.results.iter().map(|r| r.is_error).collect();
        assert_eq!(errors, vec![true, true, true, false]);
        assert!(outcome.messages[0].text_content().contains("asked to fail"));
        assert!(outcome.messages[1].text_content().contains("invalid arguments"));
    }

    #[tokio::test]
    async fn mode_restricted_tool_is_rejected() {
        let registry = ToolRegistry::with_builtins(Duration::from_secs(5));
        let calls = vec![call("a", "taskManager", "{\"action\":\"list\"}")];
        let outcome = dispatch(&calls, &registry, &ctx(Mode::Execute), &mut NoopReporter).await;

        assert!(outcome.results[0].is_error);
        assert!(
            outcome.messages[0]
                .text_content()
                .contains("not available in execute mode")
        );
    }

    #[tokio::test]
    async fn successful_switch_is_reported() {
        let mut registry = ToolRegistry::new();
        registry.register(SwitchModeTool);

        let ok = dispatch(
            &[call("a", SWITCH_MODE_TOOL, "{\"mode\":\"plan\"}")],
            &registry,
            &ctx(Mode::Execute),
            &mut NoopReporter,
        )
        .await;
        assert_eq!(ok.mode_switch, Some(Mode::Plan));

        let failed = dispatch(
            &[call("b", SWITCH_MODE_TOOL, "{\"mode\":\"sideways\"}")],
            &registry,
            &ctx(Mode::Execute),
            &mut NoopReporter,
        )
        .await;
        assert_eq!(failed.mode_switch, None);
        assert!(failed.results[0].is_error);
    }

    #[test]
    fn parse_arguments_accepts_objects_only() {
        assert_eq!(parse_arguments("").unwrap(), json!({}));
        assert_eq!(parse_arguments("  ").unwrap(), json!({}));
        assert_eq!(parse_arguments("null").unwrap(), json!({}));
        assert_eq!(parse_arguments("{\"a\":1}").unwrap(), json!({"a": 1}));
        assert!(parse_arguments("\"str\"").is_err());
        assert!(parse_arguments("{").is_err());
    }
}
