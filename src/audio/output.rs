// Audio output graphs
// A cpal-backed device graph and an offline graph with a manual clock

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;

use crate::audio::session::PlaybackSession;
use crate::error::PlayerError;

type SessionSlot = Arc<Mutex<Option<Arc<PlaybackSession>>>>;

/// Render one output quantum from the session slot into `out` (expected
/// zeroed). A session that is no longer live is evicted here, on the
/// render thread, so a dead run never lingers in the slot when the end
/// was detected off-thread.
fn render_from_slot(slot: &SessionSlot, out: &mut [f32], out_rate: f64, out_channels: usize) {
    let mut slot = slot.lock();
    match slot.as_ref() {
        Some(session) if session.is_live() => {
            session.fill(out, out_rate, out_channels);
        }
        Some(_) => {
            *slot = None;
        }
        None => {}
    }
}

/// The audio subsystem's own monotonic time source, in seconds.
///
/// Playback timing anchors against this clock rather than wall time:
/// the two drift, and only the graph clock tracks what was actually
/// rendered.
pub trait GraphClock: Send + Sync {
    fn now(&self) -> f64;
}

/// An output an engine plays sessions through.
///
/// One graph is exclusively owned by one player. `begin` installs a
/// session as the render source, `end` cancels it, and `release` tears
/// the whole graph down; a released graph cannot begin again.
pub trait AudioGraph {
    fn begin(&mut self, session: Arc<PlaybackSession>) -> Result<(), PlayerError>;
    fn end(&mut self);
    fn clock(&self) -> Arc<dyn GraphClock>;
    fn release(&mut self);
}

/// Graph time derived from frames actually rendered by the device.
pub struct FrameClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl FrameClock {
    fn new(sample_rate: u32) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate,
        }
    }

    fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Relaxed);
    }
}

impl GraphClock for FrameClock {
    fn now(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }
}

/// Device-backed graph: one long-lived output stream whose callback
/// renders the installed session, evicts it once cancelled, and drives
/// the frame clock.
pub struct CpalOutput {
    stream: Option<Stream>,
    slot: SessionSlot,
    clock: Arc<FrameClock>,
    sample_rate: u32,
    channels: u16,
}

impl CpalOutput {
    /// Create an output over the default device. The stream starts
    /// immediately so graph time runs from construction.
    pub fn new() -> Result<Self, PlayerError> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::PlaybackStart {
                reason: "no output device available".to_string(),
            })?;

        let config = device
            .default_output_config()
            .map_err(|e| PlayerError::PlaybackStart {
                reason: format!("failed to get default output config: {}", e),
            })?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        let slot: SessionSlot = Arc::new(Mutex::new(None));
        let clock = Arc::new(FrameClock::new(sample_rate));

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config.into(), slot.clone(), clock.clone())?
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config.into(), slot.clone(), clock.clone())?
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config.into(), slot.clone(), clock.clone())?
            }
            format => {
                return Err(PlayerError::PlaybackStart {
                    reason: format!("unsupported sample format: {:?}", format),
                })
            }
        };

        stream.play().map_err(|e| PlayerError::PlaybackStart {
            reason: format!("failed to start stream: {}", e),
        })?;

        log::info!(
            "[Output] device stream at {} Hz, {} channel(s)",
            sample_rate,
            channels
        );

        Ok(Self {
            stream: Some(stream),
            slot,
            clock,
            sample_rate,
            channels,
        })
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &StreamConfig,
        slot: SessionSlot,
        clock: Arc<FrameClock>,
    ) -> Result<Stream, PlayerError> {
        let out_rate = config.sample_rate.0 as f64;
        let out_channels = config.channels as usize;
        let mut scratch: Vec<f32> = Vec::new();

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    scratch.clear();
                    scratch.resize(data.len(), 0.0);

                    render_from_slot(&slot, &mut scratch, out_rate, out_channels);

                    for (out, &value) in data.iter_mut().zip(scratch.iter()) {
                        *out = T::from_sample(value);
                    }

                    // Graph time advances whether or not anything played
                    clock.advance((data.len() / out_channels.max(1)) as u64);
                },
                move |err| {
                    log::error!("[Output] stream error: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::PlaybackStart {
                reason: format!("failed to build output stream: {}", e),
            })?;

        Ok(stream)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl AudioGraph for CpalOutput {
    fn begin(&mut self, session: Arc<PlaybackSession>) -> Result<(), PlayerError> {
        let stream = self.stream.as_ref().ok_or_else(|| PlayerError::PlaybackStart {
            reason: "audio graph has been released".to_string(),
        })?;

        *self.slot.lock() = Some(session);

        // Idempotent; covers a stream suspended by the platform
        stream.play().map_err(|e| {
            *self.slot.lock() = None;
            PlayerError::PlaybackStart {
                reason: format!("failed to resume stream: {}", e),
            }
        })
    }

    fn end(&mut self) {
        if let Some(session) = self.slot.lock().take() {
            session.cancel();
        }
    }

    fn clock(&self) -> Arc<dyn GraphClock> {
        self.clock.clone()
    }

    fn release(&mut self) {
        self.end();
        if self.stream.take().is_some() {
            log::info!("[Output] device stream released");
        }
    }
}

/// Manually advanced graph clock for offline rendering and tests.
pub struct ManualClock {
    secs: Mutex<f64>,
}

impl ManualClock {
    fn new() -> Self {
        Self {
            secs: Mutex::new(0.0),
        }
    }

    pub fn advance(&self, secs: f64) {
        *self.secs.lock() += secs;
    }

    pub fn set(&self, secs: f64) {
        *self.secs.lock() = secs;
    }
}

impl GraphClock for ManualClock {
    fn now(&self) -> f64 {
        *self.secs.lock()
    }
}

/// Deviceless graph. Sessions are installed exactly as with the device
/// graph, but time only moves when the manual clock is advanced, which
/// makes transport behavior fully deterministic.
pub struct OfflineOutput {
    slot: SessionSlot,
    clock: Arc<ManualClock>,
    fail_next: Arc<AtomicBool>,
    released: bool,
}

/// Inspection handle for an `OfflineOutput` that has been handed to a
/// player: drives the clock, reads the installed session, and can make
/// the next begin fail to exercise start-failure paths.
#[derive(Clone)]
pub struct OfflineHandle {
    slot: SessionSlot,
    clock: Arc<ManualClock>,
    fail_next: Arc<AtomicBool>,
}

impl OfflineHandle {
    pub fn clock(&self) -> Arc<ManualClock> {
        self.clock.clone()
    }

    pub fn advance(&self, secs: f64) {
        self.clock.advance(secs);
    }

    pub fn session(&self) -> Option<Arc<PlaybackSession>> {
        self.slot.lock().clone()
    }

    pub fn fail_next_begin(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl OfflineOutput {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            clock: Arc::new(ManualClock::new()),
            fail_next: Arc::new(AtomicBool::new(false)),
            released: false,
        }
    }

    pub fn handle(&self) -> OfflineHandle {
        OfflineHandle {
            slot: self.slot.clone(),
            clock: self.clock.clone(),
            fail_next: self.fail_next.clone(),
        }
    }
}

impl Default for OfflineOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioGraph for OfflineOutput {
    fn begin(&mut self, session: Arc<PlaybackSession>) -> Result<(), PlayerError> {
        if self.released {
            return Err(PlayerError::PlaybackStart {
                reason: "audio graph has been released".to_string(),
            });
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(PlayerError::PlaybackStart {
                reason: "output unavailable".to_string(),
            });
        }
        *self.slot.lock() = Some(session);
        Ok(())
    }

    fn end(&mut self) {
        if let Some(session) = self.slot.lock().take() {
            session.cancel();
        }
    }

    fn clock(&self) -> Arc<dyn GraphClock> {
        self.clock.clone()
    }

    fn release(&mut self) {
        self.end();
        self.released = true;
    }
}
