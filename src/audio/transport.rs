// Transport state machine
// Tracks playback position as offset + elapsed-graph-time * rate

use std::fmt;

/// Playback phases of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No decoded audio yet
    #[default]
    Idle,
    /// Audio loaded, not playing (also the paused state)
    Ready,
    /// A playback session is running
    Playing,
    /// Playback ran to the end; next play restarts from zero
    Ended,
    /// Decoding failed; only a reload recovers
    Errored,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "Idle"),
            Phase::Ready => write!(f, "Ready"),
            Phase::Playing => write!(f, "Playing"),
            Phase::Ended => write!(f, "Ended"),
            Phase::Errored => write!(f, "Errored"),
        }
    }
}

/// Offset/rate/anchor bookkeeping for a fire-once audio source.
///
/// The underlying source primitive cannot pause and resume in place, so
/// the true position is reconstructed as `offset + (now - anchor) * rate`
/// while playing, where `now` and `anchor` are readings of the audio
/// graph's own clock (wall time drifts against it). Whenever playback
/// leaves the `Playing` phase the elapsed portion is folded back into
/// `offset` ("baked") so no elapsed time is lost or counted twice.
///
/// All methods are synchronous and take the current graph-clock reading
/// as a parameter; the struct never reads a clock itself.
#[derive(Debug, Clone)]
pub struct Transport {
    phase: Phase,
    duration_secs: f64,
    offset_secs: f64,
    rate: f64,
    /// Graph-clock reading at the start of the live session
    anchor_secs: f64,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            duration_secs: 0.0,
            offset_secs: 0.0,
            rate: 1.0,
            anchor_secs: 0.0,
        }
    }

    /// Install a freshly decoded buffer: position resets to the start,
    /// the chosen rate survives the reload.
    pub fn prime(&mut self, duration_secs: f64) {
        self.phase = Phase::Ready;
        self.duration_secs = duration_secs.max(0.0);
        self.offset_secs = 0.0;
        log::debug!(
            "[Transport] Primed with {:.3}s of audio",
            self.duration_secs
        );
    }

    /// Decoding failed; every transport operation except a reload is
    /// rejected by the caller until `prime` runs again.
    pub fn fail(&mut self) {
        self.phase = Phase::Errored;
        self.duration_secs = 0.0;
        self.offset_secs = 0.0;
    }

    /// Start playing from the current offset. From `Ended` the offset
    /// first resets to zero so replay does not begin at the very end.
    pub fn begin(&mut self, now: f64) {
        match self.phase {
            Phase::Ready => {
                self.anchor_secs = now;
                self.phase = Phase::Playing;
                log::debug!("[Transport] Play from {:.3}s", self.offset_secs);
            }
            Phase::Ended => {
                self.offset_secs = 0.0;
                self.anchor_secs = now;
                self.phase = Phase::Playing;
                log::debug!("[Transport] Replay from start");
            }
            Phase::Playing | Phase::Idle | Phase::Errored => {}
        }
    }

    /// Fold the elapsed portion of the live run into the offset.
    fn bake(&mut self, now: f64) {
        let elapsed = (now - self.anchor_secs).max(0.0) * self.rate;
        self.offset_secs = (self.offset_secs + elapsed).min(self.duration_secs);
    }

    /// Stop playing, keeping the reconstructed position as the resume
    /// point. No-op unless playing.
    pub fn pause(&mut self, now: f64) {
        if self.phase == Phase::Playing {
            self.bake(now);
            self.phase = Phase::Ready;
            log::debug!("[Transport] Paused at {:.3}s", self.offset_secs);
        }
    }

    /// Jump to a position, clamped into `[0, duration]`. While playing
    /// the anchor resets so the new session measures from `now`; from
    /// `Ended` a target before the end returns the transport to `Ready`.
    pub fn seek(&mut self, target_secs: f64, now: f64) {
        match self.phase {
            Phase::Idle | Phase::Errored => {}
            _ => {
                self.offset_secs = target_secs.clamp(0.0, self.duration_secs);
                if self.phase == Phase::Playing {
                    self.anchor_secs = now;
                } else if self.phase == Phase::Ended && self.offset_secs < self.duration_secs {
                    self.phase = Phase::Ready;
                }
                log::debug!("[Transport] Seek to {:.3}s", self.offset_secs);
            }
        }
    }

    /// Change the playback rate. While playing, time elapsed so far is
    /// baked at the old rate and the anchor resets, so the displayed
    /// position is continuous across the change.
    pub fn set_rate(&mut self, rate: f64, now: f64) {
        if self.phase == Phase::Playing {
            self.bake(now);
            self.anchor_secs = now;
        }
        self.rate = rate;
        log::debug!("[Transport] Rate set to {:.2}x", rate);
    }

    /// Natural or projected end of playback.
    pub fn finish(&mut self) {
        if self.phase == Phase::Playing {
            self.offset_secs = self.duration_secs;
            self.phase = Phase::Ended;
            log::debug!("[Transport] Ended at {:.3}s", self.offset_secs);
        }
    }

    /// Teardown path: leave `Playing` without baking. The offset keeps
    /// whatever was last committed.
    pub fn halt(&mut self) {
        if self.phase == Phase::Playing {
            self.phase = Phase::Ready;
        }
    }

    /// Reconstructed playback position at graph time `now`.
    pub fn position(&self, now: f64) -> f64 {
        if self.phase == Phase::Playing {
            let elapsed = (now - self.anchor_secs).max(0.0) * self.rate;
            (self.offset_secs + elapsed).min(self.duration_secs)
        } else {
            self.offset_secs
        }
    }

    /// Whether the projected position has come within `epsilon` of the
    /// end. Exact equality never holds under timer jitter, so the end is
    /// declared once the remaining time drops inside the tolerance.
    pub fn end_reached(&self, now: f64, epsilon: f64) -> bool {
        self.phase == Phase::Playing && self.duration_secs - self.position(now) <= epsilon
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_playing(&self) -> bool {
        self.phase == Phase::Playing
    }

    pub fn duration(&self) -> f64 {
        self.duration_secs
    }

    pub fn offset(&self) -> f64 {
        self.offset_secs
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}
