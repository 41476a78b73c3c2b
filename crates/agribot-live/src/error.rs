//! Error types for agribot-live

use thiserror::Error;

/// Result type alias using agribot-live Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the session protocol layer
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing API credential
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Establishing the remote session failed
    #[error("Connect failed: {0}")]
    Connect(String),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An audio chunk could not be decoded
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// The session is already closed
    #[error("Session closed")]
    Closed,
}
