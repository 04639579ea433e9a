// One fire-once playback run
// Cursor and rate are atomics so the audio callback reads them lock-free

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::audio::buffer::SampleBuffer;

/// A single continuous run of audio from a start offset.
///
/// Created on every play (and on seek while playing), cancelled on every
/// pause/seek/teardown. The audio callback renders from the session
/// without locking: the frame cursor and rate are f64 values stored as
/// bits in atomics, and `cancel` flips the live flag so a discarded
/// session goes silent on the very next callback quantum. The rate is
/// the one piece that mutates in place, since a rate change must not
/// restart the run.
pub struct PlaybackSession {
    buffer: SampleBuffer,
    /// Read position in buffer frames, f64 bits
    cursor_frames: AtomicU64,
    /// Playback rate, f64 bits
    rate: AtomicU64,
    live: AtomicBool,
}

impl PlaybackSession {
    pub fn new(buffer: SampleBuffer, start_secs: f64, rate: f64) -> Self {
        let start_frame = (start_secs.max(0.0) * buffer.sample_rate() as f64)
            .min(buffer.len_frames() as f64);
        Self {
            buffer,
            cursor_frames: AtomicU64::new(start_frame.to_bits()),
            rate: AtomicU64::new(rate.to_bits()),
            live: AtomicBool::new(true),
        }
    }

    /// Current read position in seconds of source audio.
    pub fn position_seconds(&self) -> f64 {
        let frames = f64::from_bits(self.cursor_frames.load(Ordering::Relaxed));
        if self.buffer.sample_rate() == 0 {
            return 0.0;
        }
        frames / self.buffer.sample_rate() as f64
    }

    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Relaxed))
    }

    /// Update the rate of the live run without restarting it.
    pub fn set_rate(&self, rate: f64) {
        self.rate.store(rate.to_bits(), Ordering::Relaxed);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    /// Silence the session. Idempotent; the callback observes the flag
    /// on its next quantum and stops reading samples.
    pub fn cancel(&self) {
        self.live.store(false, Ordering::Relaxed);
    }

    /// Whether the cursor has run past the last source frame.
    pub fn exhausted(&self) -> bool {
        f64::from_bits(self.cursor_frames.load(Ordering::Relaxed))
            >= self.buffer.len_frames() as f64
    }

    /// Render interleaved output frames into `out`.
    ///
    /// The mono source sample is written to every output channel; the
    /// cursor advances by `rate * source_rate / out_rate` frames per
    /// output frame, with linear interpolation between source frames so
    /// off-unity rates stay smooth. A cancelled or exhausted session
    /// writes silence.
    pub fn fill(&self, out: &mut [f32], out_rate: f64, out_channels: usize) {
        if out_channels == 0 || out_rate <= 0.0 {
            return;
        }
        if !self.is_live() {
            out.fill(0.0);
            return;
        }

        let samples = self.buffer.samples();
        let len = samples.len();
        let src_rate = self.buffer.sample_rate() as f64;
        let rate = self.rate();
        let step = rate * src_rate / out_rate;

        let mut cursor = f64::from_bits(self.cursor_frames.load(Ordering::Relaxed));

        let frame_count = out.len() / out_channels;
        for frame_idx in 0..frame_count {
            let base = frame_idx * out_channels;

            if cursor >= len as f64 {
                for c in 0..out_channels {
                    out[base + c] = 0.0;
                }
                continue;
            }

            let idx = cursor as usize;
            let frac = (cursor - idx as f64) as f32;
            let a = samples[idx];
            let b = if idx + 1 < len { samples[idx + 1] } else { 0.0 };
            let s = a + (b - a) * frac;

            for c in 0..out_channels {
                out[base + c] = s;
            }

            cursor += step;
        }

        self.cursor_frames.store(cursor.to_bits(), Ordering::Relaxed);
    }
}
