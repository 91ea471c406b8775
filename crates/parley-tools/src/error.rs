//! Error types for the parley-tools crate.

use std::time::Duration;

/// Errors an executor (or the dispatcher around it) can produce.
///
/// These never cross the dispatcher boundary as `Err`: the dispatcher folds
/// them into an `{"error": ...}` payload the model can read.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Executor failed; the message is surfaced to the model verbatim.
    #[error("{0}")]
    Execution(String),

    /// Arguments did not match what the tool expects.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Executor exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error during execution.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
