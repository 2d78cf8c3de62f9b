//! Agent error types.

/// Errors that end a chat turn.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// API key not configured.
    #[error("API key not configured")]
    ApiKeyMissing,

    /// Transport-level error reported by the provider stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Failed to parse API response.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Stream ended before the provider signalled completion.
    #[error("stream ended unexpectedly")]
    StreamEnded,

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// History file I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors raised by a single tool invocation.
///
/// These never end the turn; the dispatcher feeds them back to the model.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Arguments were not valid JSON or missed a field.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed.
    #[error("{0}")]
    Execution(String),

    /// Filesystem or process I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The tool exceeded its time budget.
    #[error("timed out after {0}s")]
    Timeout(u64),

    /// The tool is unknown or not offered in the current mode.
    #[error("{0}")]
    Unavailable(String),
}
