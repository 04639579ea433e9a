// Speech synthesis service boundary

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Synthesized speech as a base64-encoded compressed-audio payload.
/// This payload is the playback engine's sole input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechPayload {
    pub audio_base64: String,
}

/// Upstream text-to-speech service. Same contract as the analyzer: one
/// opaque request per user action, categorized failures, no retries.
pub trait SpeechSynthesizer {
    fn synthesize(&self, text: &str) -> Result<SpeechPayload, ServiceError>;
}
