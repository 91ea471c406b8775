//! Error types for the parley-provider crate.

/// Errors that can occur while talking to a vendor API.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error: {0}")]
    Api(String),

    /// Model is not in this adapter's known set
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Stream parsing error
    #[error("Stream error: {0}")]
    Stream(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
