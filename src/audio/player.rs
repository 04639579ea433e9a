// The playback engine
// Binds the transport state machine to an audio graph and a progress ticker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::audio::buffer::SampleBuffer;
use crate::audio::decoder;
use crate::audio::output::{AudioGraph, CpalOutput, GraphClock};
use crate::audio::session::PlaybackSession;
use crate::audio::transport::{Phase, Transport};
use crate::config::PlaybackSettings;
use crate::error::PlayerError;

/// Read-only view of the transport surface for a host UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    pub current_time: f64,
    pub duration: f64,
    pub is_playing: bool,
    pub rate: f64,
    pub error: Option<String>,
}

/// State shared between transport commands and the progress ticker.
///
/// Every command finishes its updates under this lock before the next
/// projection tick can read, so a tick never observes a half-applied
/// transition.
struct Shared {
    transport: Transport,
    session: Option<Arc<PlaybackSession>>,
    buffer: Option<SampleBuffer>,
    error: Option<String>,
}

/// Single-stream audio player over a fire-once source primitive.
///
/// Owns one audio graph for its whole life. `load` decodes a base64
/// payload into the sample buffer; `play` spins up a playback session on
/// the graph; `pause`/`seek`/`set_rate` recreate or adjust the session
/// while the transport keeps the externally visible position consistent
/// with graph time. A background ticker projects the position each
/// interval and flips the transport to `Ended` when the projection
/// reaches the end of the buffer; `poll` runs the same step on demand
/// and detaches the finished session from the graph. The ticker thread
/// cannot touch the graph (device streams are not `Send`), so on the
/// device path the render callback evicts the cancelled session
/// instead.
///
/// Dropping the player cancels the ticker and any live session and
/// releases the graph unconditionally.
pub struct Player {
    graph: Box<dyn AudioGraph>,
    clock: Arc<dyn GraphClock>,
    shared: Arc<Mutex<Shared>>,
    settings: PlaybackSettings,
    ticker_stop: Arc<AtomicBool>,
    ticker: Option<JoinHandle<()>>,
}

impl Player {
    pub fn new(graph: Box<dyn AudioGraph>, settings: PlaybackSettings) -> Self {
        let clock = graph.clock();
        let shared = Arc::new(Mutex::new(Shared {
            transport: Transport::new(),
            session: None,
            buffer: None,
            error: None,
        }));

        let ticker_stop = Arc::new(AtomicBool::new(false));
        let ticker = {
            let shared = shared.clone();
            let clock = clock.clone();
            let stop = ticker_stop.clone();
            let epsilon = settings.end_epsilon_secs;
            let interval = Duration::from_millis(settings.progress_tick_ms.max(1));

            thread::Builder::new()
                .name("docvox-progress".to_string())
                .spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        // settles the transport only; the graph sweeps its own slot
                        Self::project(&shared, clock.as_ref(), epsilon);
                        // woken early by unpark on drop
                        thread::park_timeout(interval);
                    }
                })
                .map_err(|e| log::warn!("[Playback] progress ticker unavailable: {}", e))
                .ok()
        };

        Self {
            graph,
            clock,
            shared,
            settings,
            ticker_stop,
            ticker,
        }
    }

    /// Player over the default output device.
    pub fn with_default_output(settings: PlaybackSettings) -> Result<Self, PlayerError> {
        let graph = CpalOutput::new()?;
        Ok(Self::new(Box::new(graph), settings))
    }

    /// Decode a base64 audio payload and make it the current buffer.
    ///
    /// Valid from every phase; a live run is discarded first. On success
    /// the transport is ready at position zero with the chosen rate kept.
    /// On decode failure the player is faulted until the next `load`.
    pub fn load(&mut self, payload: &str) -> Result<(), PlayerError> {
        {
            let mut shared = self.shared.lock();
            if let Some(session) = shared.session.take() {
                session.cancel();
            }
            shared.transport.halt();
        }
        self.graph.end();

        let result = decoder::decode_base64_payload(payload, self.settings.target_sample_rate);

        let mut shared = self.shared.lock();
        match result {
            Ok(buffer) => {
                shared.transport.prime(buffer.duration_seconds());
                log::info!(
                    "[Playback] loaded {:.3}s of audio",
                    buffer.duration_seconds()
                );
                shared.buffer = Some(buffer);
                shared.error = None;
                Ok(())
            }
            Err(e) => {
                shared.transport.fail();
                shared.buffer = None;
                shared.error = Some(e.to_string());
                log::error!("[Playback] load failed: {}", e);
                Err(e)
            }
        }
    }

    /// Start (or restart after the end) a playback session at the
    /// current offset. No-op while already playing. A start failure is
    /// recoverable: the transport stays paused and the call may be
    /// retried.
    pub fn play(&mut self) -> Result<(), PlayerError> {
        let mut shared = self.shared.lock();
        match shared.transport.phase() {
            Phase::Idle => return Err(PlayerError::NoAudio),
            Phase::Errored => return Err(PlayerError::Faulted),
            Phase::Playing => return Ok(()),
            Phase::Ready | Phase::Ended => {}
        }

        let buffer = shared.buffer.clone().ok_or(PlayerError::NoAudio)?;

        // From Ended this resets the offset to zero before anchoring
        shared.transport.begin(self.clock.now());
        let start = shared.transport.offset();
        let rate = shared.transport.rate();

        let session = Arc::new(PlaybackSession::new(buffer, start, rate));
        match self.graph.begin(session.clone()) {
            Ok(()) => {
                shared.session = Some(session);
                shared.error = None;
                log::info!("[Playback] playing from {:.3}s at {:.2}x", start, rate);
                Ok(())
            }
            Err(e) => {
                shared.transport.halt();
                shared.error = Some(e.to_string());
                log::warn!("[Playback] start failed: {}", e);
                Err(e)
            }
        }
    }

    /// Fold the elapsed run into the offset and discard the session.
    /// No-op when already paused or ended.
    pub fn pause(&mut self) -> Result<(), PlayerError> {
        let mut shared = self.shared.lock();
        match shared.transport.phase() {
            Phase::Idle => Err(PlayerError::NoAudio),
            Phase::Errored => Err(PlayerError::Faulted),
            Phase::Ready | Phase::Ended => Ok(()),
            Phase::Playing => {
                shared.transport.pause(self.clock.now());
                if let Some(session) = shared.session.take() {
                    session.cancel();
                }
                self.graph.end();
                log::info!("[Playback] paused at {:.3}s", shared.transport.offset());
                Ok(())
            }
        }
    }

    /// Jump to `target_secs` (clamped into the buffer). While playing
    /// the session restarts at the new offset without leaving the
    /// playing state.
    pub fn seek(&mut self, target_secs: f64) -> Result<(), PlayerError> {
        let mut shared = self.shared.lock();
        match shared.transport.phase() {
            Phase::Idle => return Err(PlayerError::NoAudio),
            Phase::Errored => return Err(PlayerError::Faulted),
            _ => {}
        }

        let was_playing = shared.transport.is_playing();
        shared.transport.seek(target_secs, self.clock.now());

        if was_playing {
            if let Some(session) = shared.session.take() {
                session.cancel();
            }
            let buffer = shared.buffer.clone().ok_or(PlayerError::NoAudio)?;
            let session = Arc::new(PlaybackSession::new(
                buffer,
                shared.transport.offset(),
                shared.transport.rate(),
            ));
            match self.graph.begin(session.clone()) {
                Ok(()) => {
                    shared.session = Some(session);
                }
                Err(e) => {
                    shared.transport.halt();
                    shared.error = Some(e.to_string());
                    log::warn!("[Playback] restart after seek failed: {}", e);
                    return Err(e);
                }
            }
        }

        log::debug!("[Playback] seek to {:.3}s", shared.transport.offset());
        Ok(())
    }

    /// Change the playback rate, clamped to the configured range. A live
    /// session is adjusted in place so the audio does not glitch; the
    /// transport bakes time elapsed so far at the old rate first.
    pub fn set_rate(&mut self, rate: f64) -> Result<(), PlayerError> {
        let mut shared = self.shared.lock();
        if shared.transport.phase() == Phase::Errored {
            return Err(PlayerError::Faulted);
        }

        let clamped = self.settings.clamp_rate(rate);
        shared.transport.set_rate(clamped, self.clock.now());
        if let Some(session) = shared.session.as_ref() {
            session.set_rate(clamped);
        }
        Ok(())
    }

    /// Teardown path: discard any session without folding elapsed time
    /// into the offset. Idempotent; a stopped or idle player is left
    /// untouched.
    pub fn stop(&mut self) {
        let mut shared = self.shared.lock();
        if let Some(session) = shared.session.take() {
            session.cancel();
        }
        self.graph.end();
        shared.transport.halt();
    }

    /// Run one progress-projection step immediately. The background
    /// ticker runs the same step on an interval; calling it directly
    /// makes end-of-playback detection deterministic for headless
    /// hosts. When the step reaches the end, the finished session is
    /// also detached from the graph.
    pub fn poll(&mut self) {
        if Self::project(
            &self.shared,
            self.clock.as_ref(),
            self.settings.end_epsilon_secs,
        ) {
            self.graph.end();
        }
    }

    /// One projection step. True when this step just transitioned the
    /// transport to `Ended`; whoever owns the graph then clears its
    /// session slot.
    fn project(shared: &Mutex<Shared>, clock: &dyn GraphClock, epsilon: f64) -> bool {
        let mut shared = shared.lock();
        if shared.transport.end_reached(clock.now(), epsilon) {
            if let Some(session) = shared.session.take() {
                session.cancel();
            }
            shared.transport.finish();
            log::info!("[Playback] reached end of audio");
            return true;
        }
        false
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let shared = self.shared.lock();
        PlayerSnapshot {
            current_time: shared.transport.position(self.clock.now()),
            duration: shared.transport.duration(),
            is_playing: shared.transport.is_playing(),
            rate: shared.transport.rate(),
            error: shared.error.clone(),
        }
    }

    pub fn current_time(&self) -> f64 {
        let shared = self.shared.lock();
        shared.transport.position(self.clock.now())
    }

    pub fn duration(&self) -> f64 {
        self.shared.lock().transport.duration()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.lock().transport.is_playing()
    }

    pub fn rate(&self) -> f64 {
        self.shared.lock().transport.rate()
    }

    pub fn error(&self) -> Option<String> {
        self.shared.lock().error.clone()
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock().transport.phase()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.ticker_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.ticker.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }

        if let Some(session) = self.shared.lock().session.take() {
            session.cancel();
        }
        self.graph.release();
        log::debug!("[Playback] player dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::{OfflineHandle, OfflineOutput};
    use approx::assert_relative_eq;
    use base64::Engine;

    fn silence_payload(secs: f64) -> String {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 24000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..(secs * 24000.0) as usize {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        base64::engine::general_purpose::STANDARD.encode(cursor.into_inner())
    }

    fn offline_player() -> (Player, OfflineHandle) {
        let graph = OfflineOutput::new();
        let handle = graph.handle();
        // long tick so only explicit poll() drives the projection
        let settings = PlaybackSettings {
            progress_tick_ms: 3_600_000,
            ..PlaybackSettings::default()
        };
        (Player::new(Box::new(graph), settings), handle)
    }

    fn loaded_player(secs: f64) -> (Player, OfflineHandle) {
        let (mut player, handle) = offline_player();
        player.load(&silence_payload(secs)).unwrap();
        (player, handle)
    }

    #[test]
    fn test_transport_commands_require_audio() {
        let (mut player, _handle) = offline_player();
        assert_eq!(player.play().unwrap_err(), PlayerError::NoAudio);
        assert_eq!(player.pause().unwrap_err(), PlayerError::NoAudio);
        assert_eq!(player.seek(1.0).unwrap_err(), PlayerError::NoAudio);
    }

    #[test]
    fn test_rate_preference_survives_load() {
        let (mut player, _handle) = offline_player();
        player.set_rate(2.0).unwrap();
        player.load(&silence_payload(1.0)).unwrap();
        assert_eq!(player.rate(), 2.0);
        assert_eq!(player.current_time(), 0.0);
    }

    #[test]
    fn test_load_reports_duration() {
        let (player, _handle) = loaded_player(2.0);
        assert_relative_eq!(player.duration(), 2.0);
        assert_eq!(player.phase(), Phase::Ready);
        assert!(player.error().is_none());
    }

    #[test]
    fn test_decode_failure_faults_the_player() {
        let (mut player, _handle) = offline_player();
        let err = player.load("@@not-audio@@").unwrap_err();
        assert!(matches!(err, PlayerError::Decode { .. }));
        assert_eq!(player.phase(), Phase::Errored);
        assert!(player.error().is_some());

        assert_eq!(player.play().unwrap_err(), PlayerError::Faulted);
        assert_eq!(player.pause().unwrap_err(), PlayerError::Faulted);
        assert_eq!(player.seek(0.5).unwrap_err(), PlayerError::Faulted);
        assert_eq!(player.set_rate(1.5).unwrap_err(), PlayerError::Faulted);
    }

    #[test]
    fn test_reload_recovers_from_fault() {
        let (mut player, _handle) = offline_player();
        let _ = player.load("@@not-audio@@");
        assert_eq!(player.phase(), Phase::Errored);

        player.load(&silence_payload(1.0)).unwrap();
        assert_eq!(player.phase(), Phase::Ready);
        assert!(player.error().is_none());
        player.play().unwrap();
    }

    #[test]
    fn test_play_installs_live_session() {
        let (mut player, handle) = loaded_player(2.0);
        player.play().unwrap();
        assert!(player.is_playing());
        let session = handle.session().expect("session installed");
        assert!(session.is_live());
    }

    #[test]
    fn test_play_while_playing_is_noop() {
        let (mut player, handle) = loaded_player(2.0);
        player.play().unwrap();
        let first = handle.session().unwrap();
        player.play().unwrap();
        let second = handle.session().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_pause_bakes_graph_elapsed_time() {
        let (mut player, handle) = loaded_player(10.0);
        player.play().unwrap();
        handle.advance(3.0);
        player.pause().unwrap();

        assert!(!player.is_playing());
        assert_relative_eq!(player.current_time(), 3.0);
        // elapsed time is not double-counted while paused
        handle.advance(5.0);
        assert_relative_eq!(player.current_time(), 3.0);
    }

    #[test]
    fn test_pause_discards_session() {
        let (mut player, handle) = loaded_player(2.0);
        player.play().unwrap();
        let session = handle.session().unwrap();
        player.pause().unwrap();
        assert!(!session.is_live());
        assert!(handle.session().is_none());
    }

    #[test]
    fn test_pause_while_paused_is_noop() {
        let (mut player, handle) = loaded_player(10.0);
        player.play().unwrap();
        handle.advance(1.0);
        player.pause().unwrap();
        player.pause().unwrap();
        assert_relative_eq!(player.current_time(), 1.0);
    }

    #[test]
    fn test_seek_while_paused_moves_position() {
        let (mut player, _handle) = loaded_player(10.0);
        player.seek(4.5).unwrap();
        assert_relative_eq!(player.current_time(), 4.5);
        player.seek(-3.0).unwrap();
        assert_relative_eq!(player.current_time(), 0.0);
        player.seek(99.0).unwrap();
        assert_relative_eq!(player.current_time(), 10.0);
    }

    #[test]
    fn test_seek_while_playing_restarts_session() {
        let (mut player, handle) = loaded_player(10.0);
        player.play().unwrap();
        let first = handle.session().unwrap();
        handle.advance(1.0);

        player.seek(7.0).unwrap();
        assert!(player.is_playing());
        assert!(!first.is_live());
        let second = handle.session().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_relative_eq!(second.position_seconds(), 7.0);
        assert_relative_eq!(player.current_time(), 7.0);
    }

    #[test]
    fn test_set_rate_updates_live_session_in_place() {
        let (mut player, handle) = loaded_player(10.0);
        player.play().unwrap();
        let session = handle.session().unwrap();
        handle.advance(2.0);

        player.set_rate(2.0).unwrap();
        // same session keeps running at the new rate
        assert!(Arc::ptr_eq(&session, &handle.session().unwrap()));
        assert_eq!(session.rate(), 2.0);
        assert_relative_eq!(player.current_time(), 2.0);
        handle.advance(1.0);
        assert_relative_eq!(player.current_time(), 4.0);
    }

    #[test]
    fn test_set_rate_clamps_to_configured_range() {
        let (mut player, _handle) = loaded_player(10.0);
        player.set_rate(100.0).unwrap();
        assert_eq!(player.rate(), 4.0);
        player.set_rate(0.0).unwrap();
        assert_eq!(player.rate(), 0.25);
    }

    #[test]
    fn test_poll_detects_end_of_playback() {
        let (mut player, handle) = loaded_player(10.0);
        player.seek(9.5).unwrap();
        player.play().unwrap();

        handle.advance(0.35);
        player.poll();
        assert_eq!(player.phase(), Phase::Playing);

        handle.advance(0.1);
        player.poll();
        assert_eq!(player.phase(), Phase::Ended);
        assert!(!player.is_playing());
        assert_relative_eq!(player.current_time(), 10.0);
        assert!(handle.session().is_none());
    }

    #[test]
    fn test_replay_after_end_restarts_from_zero() {
        let (mut player, handle) = loaded_player(1.0);
        player.play().unwrap();
        handle.advance(1.0);
        player.poll();
        assert_eq!(player.phase(), Phase::Ended);

        player.play().unwrap();
        assert!(player.is_playing());
        assert_relative_eq!(player.current_time(), 0.0);
        assert_relative_eq!(handle.session().unwrap().position_seconds(), 0.0);
    }

    #[test]
    fn test_start_failure_is_retryable() {
        let (mut player, handle) = loaded_player(5.0);
        player.seek(2.0).unwrap();
        handle.fail_next_begin();

        let err = player.play().unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(player.phase(), Phase::Ready);
        assert!(player.error().is_some());
        assert_relative_eq!(player.current_time(), 2.0);

        player.play().unwrap();
        assert!(player.is_playing());
        assert!(player.error().is_none());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (mut player, _handle) = offline_player();
        player.stop();
        player.stop();
        assert_eq!(player.phase(), Phase::Idle);
    }

    #[test]
    fn test_stop_does_not_bake_elapsed_time() {
        let (mut player, handle) = loaded_player(10.0);
        player.play().unwrap();
        handle.advance(4.0);
        player.stop();
        assert_eq!(player.phase(), Phase::Ready);
        assert_relative_eq!(player.current_time(), 0.0);
        assert!(handle.session().is_none());
    }

    #[test]
    fn test_drop_releases_session() {
        let (mut player, handle) = loaded_player(2.0);
        player.play().unwrap();
        let session = handle.session().unwrap();
        drop(player);
        assert!(!session.is_live());
        assert!(handle.session().is_none());
    }

    #[test]
    fn test_snapshot_mirrors_accessors() {
        let (mut player, handle) = loaded_player(10.0);
        player.set_rate(1.5).unwrap();
        player.play().unwrap();
        handle.advance(2.0);

        let snap = player.snapshot();
        assert!(snap.is_playing);
        assert_relative_eq!(snap.current_time, 3.0);
        assert_relative_eq!(snap.duration, 10.0);
        assert_eq!(snap.rate, 1.5);
        assert!(snap.error.is_none());
    }
}
