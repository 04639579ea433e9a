// External service collaborators
// Interface boundaries only; the host application wires real clients

pub mod analysis;
pub mod speech;

pub use analysis::{DocumentAnalyzer, DocumentReport};
pub use speech::{SpeechPayload, SpeechSynthesizer};
