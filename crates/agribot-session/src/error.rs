//! Error types for agribot-session

use agribot_live::ConnectionState;
use thiserror::Error;

/// Result type alias using agribot-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors surfaced by the session orchestrator.
///
/// Non-fatal conditions (a failed tool request, an undecodable audio
/// chunk, missing geolocation) never unwind the session; they travel as
/// [`crate::events::AssistantEvent`]s instead.
#[derive(Error, Debug)]
pub enum Error {
    /// No API credential is available, nothing was started
    #[error("API credential missing")]
    CredentialMissing,

    /// The microphone or output device could not be acquired
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Opening the remote session failed
    #[error("Failed to connect session: {0}")]
    SessionConnect(String),

    /// `start()` was called while a session is already active
    #[error("Cannot start while {}", state.name())]
    InvalidState { state: ConnectionState },
}
