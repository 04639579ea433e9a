// Error types for the playback engine and its service collaborators

use thiserror::Error;

/// Errors raised by the playback engine.
///
/// Decode failures are terminal for the loaded payload: the player stays
/// faulted until a new payload is loaded. Start failures are recoverable
/// and leave the transport paused so the caller may retry. Teardown is
/// best-effort and never surfaces here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlayerError {
    #[error("Audio decoding failed: {reason}")]
    Decode { reason: String },

    #[error("Playback could not start: {reason}")]
    PlaybackStart { reason: String },

    #[error("No audio loaded")]
    NoAudio,

    #[error("Player is in an error state; load new audio to recover")]
    Faulted,
}

impl PlayerError {
    /// Whether the operation may simply be retried without reloading.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PlayerError::PlaybackStart { .. })
    }
}

/// Categorized failures from the external document-analysis and
/// speech-synthesis services. Surfaced to the host as user-facing
/// messages; the engine performs no retries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Network failure: {reason}")]
    Network { reason: String },

    #[error("Authentication rejected: {reason}")]
    Authentication { reason: String },

    #[error("Rate limit exceeded: {reason}")]
    RateLimited { reason: String },

    #[error("Malformed service response: {reason}")]
    MalformedResponse { reason: String },
}
