// docvox - playback engine for spoken document explanations
// Module declarations
pub mod audio;
pub mod config;
pub mod error;
pub mod services;

pub use audio::{
    AudioGraph, CpalOutput, GraphClock, OfflineHandle, OfflineOutput, Phase, Player,
    PlayerSnapshot, SampleBuffer,
};
pub use config::{AppSettings, PlaybackSettings};
pub use error::{PlayerError, ServiceError};
pub use services::{DocumentAnalyzer, DocumentReport, SpeechPayload, SpeechSynthesizer};
