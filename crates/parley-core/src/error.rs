//! Error types for the parley-core crate.

use parley_provider::AdapterError;

/// Errors that abort a turn.
///
/// Tool execution failures are deliberately absent: the dispatcher converts
/// those into result payloads the model reads on the next round.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Vendor/transport failure during a round.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// Turn rejected before any network call.
    #[error("configuration error: {0}")]
    Config(String),

    /// The vendor stream violated its own block protocol.
    #[error("vendor protocol error: {0}")]
    Protocol(String),

    /// The caller went away mid-stream; no further vendor calls are made.
    #[error("turn cancelled by caller")]
    Cancelled,
}
