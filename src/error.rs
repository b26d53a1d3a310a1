//! Error types for the ReAct engine

use thiserror::Error;

/// Result type alias using the engine's `Error` type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// The injected LLM client failed to produce a completion
    #[error("LLM call failed: {0}")]
    Llm(String),

    /// A tool invocation could not even be dispatched (not a per-call tool
    /// failure — those are recovered into a `ToolResult` and never surface here)
    #[error("tool error: {0}")]
    Tool(String),

    /// The run's cancellation signal fired
    #[error("run cancelled")]
    Cancelled,

    /// Caller supplied malformed input (bad tool arguments, empty step list, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for invariant violations that should never happen in practice
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller might reasonably retry the run after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Llm(_))
    }

    /// Whether the error stems from bad input rather than a collaborator failure
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}
