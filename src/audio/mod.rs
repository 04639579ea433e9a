// Audio playback module
// Uses Symphonia for decoding and cpal for output

pub mod buffer;
pub mod decoder;
pub mod output;
pub mod player;
pub mod session;
pub mod transport;

pub use buffer::SampleBuffer;
pub use output::{AudioGraph, CpalOutput, GraphClock, OfflineHandle, OfflineOutput};
pub use player::{Player, PlayerSnapshot};
pub use session::PlaybackSession;
pub use transport::{Phase, Transport};
