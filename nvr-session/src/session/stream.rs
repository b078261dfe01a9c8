//! Live playback session for one camera.
//!
//! A session owns its player and a task draining the player's event channel.
//! The task drives the reconnect policy. Stopping cancels the session token
//! first, so the task and any pending reconnect stand down before the player
//! is torn down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectTrigger};
use super::state::StreamState;
use crate::device::CameraDevice;
use crate::engine::{
    DecodingEngine, MediaSource, Player, PlayerEvent, PlayerEventReceiver, RenderTarget,
};
use crate::events::SessionEvent;
use crate::teardown::{Teardown, TeardownReport};
use crate::{Error, Result};

/// Caller-facing reference to a started stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamHandle {
    pub session_id: String,
    pub camera_id: String,
}

/// Snapshot of a stream session.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub camera_id: String,
    pub session_id: String,
    pub state: StreamState,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Status {
    state: StreamState,
    retry_count: u32,
    /// Set on `Playing`, cleared on `Error`/`Ended`.
    reached_playing: bool,
}

enum Flow {
    Continue,
    Reconnect { attempt: u32, delay: Duration },
    Exit,
}

/// One live connection from a camera to a render target.
pub struct StreamSession {
    id: String,
    device: Arc<CameraDevice>,
    target: Arc<dyn RenderTarget>,
    media: MediaSource,
    policy: ReconnectPolicy,
    player: Mutex<Option<Box<dyn Player>>>,
    status: Mutex<Status>,
    cancel: CancellationToken,
    stopped: AtomicBool,
    started_at: DateTime<Utc>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl StreamSession {
    /// Create a player for `device`, attach it to `target` and start playing.
    ///
    /// Fails fast with [`Error::NotAttached`] when the target has no live
    /// output. Any resources created before a failure are released.
    pub(crate) fn open(
        engine: &dyn DecodingEngine,
        device: Arc<CameraDevice>,
        target: Arc<dyn RenderTarget>,
        media: MediaSource,
        policy: ReconnectPolicy,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Result<Arc<Self>> {
        if !target.is_attached() {
            return Err(Error::NotAttached(target.id().to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut player = engine.create_player(tx)?;

        if let Err(e) = start_player(player.as_mut(), &target, &media) {
            warn!(camera_id = %device.id, session_id = %id, error = %e, "Failed to start player");
            let mut teardown = Teardown::new("stream", id.as_str());
            teardown.run("stop", || player.stop());
            // Detach carries the render target's thread affinity.
            teardown.run("detach", || player.detach());
            teardown.run("release", || player.release());
            return Err(e);
        }

        let session = Arc::new(Self {
            id,
            device,
            target,
            media,
            policy,
            player: Mutex::new(Some(player)),
            status: Mutex::new(Status {
                state: StreamState::Opening,
                retry_count: 0,
                reached_playing: false,
            }),
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            started_at: Utc::now(),
            event_tx,
        });

        info!(
            camera_id = %session.device.id,
            session_id = %session.id,
            target = %session.target.id(),
            url = %crate::utils::url::redact_credentials(&session.media.url),
            "Stream session started"
        );

        tokio::spawn(Arc::clone(&session).run_events(rx));
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn camera_id(&self) -> &str {
        &self.device.id
    }

    pub fn device(&self) -> &Arc<CameraDevice> {
        &self.device
    }

    pub fn handle(&self) -> StreamHandle {
        StreamHandle {
            session_id: self.id.clone(),
            camera_id: self.device.id.clone(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.status.lock().state
    }

    /// Reconnect attempts made since the session last reached `Playing`.
    pub fn retry_count(&self) -> u32 {
        self.status.lock().retry_count
    }

    /// Whether the session is being (or has been) torn down.
    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn info(&self) -> StreamInfo {
        let status = self.status.lock();
        StreamInfo {
            camera_id: self.device.id.clone(),
            session_id: self.id.clone(),
            state: status.state,
            retry_count: status.retry_count,
            started_at: self.started_at,
        }
    }

    /// Stop the session and release its player.
    ///
    /// Safe to call any number of times and from any thread, including when
    /// the player is already gone. Returns `false` if it was already stopped.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            trace!(session_id = %self.id, "Stream session already stopped");
            return false;
        }

        // Mark stopping before touching native resources.
        self.cancel.cancel();
        self.status.lock().state = StreamState::Stopped;

        let report = self.release_player();
        debug!(
            camera_id = %self.device.id,
            session_id = %self.id,
            failed_steps = report.failures.len(),
            "Stream session stopped"
        );

        let _ = self.event_tx.send(SessionEvent::StreamStopped {
            camera_id: self.device.id.clone(),
            session_id: self.id.clone(),
        });
        true
    }

    fn release_player(&self) -> TeardownReport {
        let mut teardown = Teardown::new("stream", self.id.as_str());
        let Some(mut player) = self.player.lock().take() else {
            return teardown.finish();
        };

        teardown.run("stop", || player.stop());
        // Detach carries the render target's thread affinity.
        teardown.run("detach", || player.detach());
        teardown.run("release", || player.release());
        teardown.finish()
    }

    async fn run_events(self: Arc<Self>, mut rx: PlayerEventReceiver) {
        let mut pending: Option<PlayerEvent> = None;

        loop {
            let event = match pending.take() {
                Some(event) => event,
                None => tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                },
            };

            match self.handle_event(event) {
                Flow::Continue => {}
                Flow::Exit => break,
                Flow::Reconnect { attempt, delay } => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }

                    // Whatever the old connection reported while we waited
                    // is stale now.
                    while let Ok(stale) = rx.try_recv() {
                        trace!(
                            session_id = %self.id,
                            event = ?stale,
                            "Dropping stale player event"
                        );
                    }

                    if let Err(e) = self.reconnect(attempt) {
                        warn!(
                            camera_id = %self.device.id,
                            session_id = %self.id,
                            attempt,
                            error = %e,
                            "Reconnect attempt failed"
                        );
                        pending = Some(PlayerEvent::EncounteredError(e.to_string()));
                    }
                }
            }
        }

        trace!(session_id = %self.id, "Stream event loop exited");
    }

    fn handle_event(&self, event: PlayerEvent) -> Flow {
        let mut status = self.status.lock();
        if self.cancel.is_cancelled() {
            return Flow::Exit;
        }

        let state = StreamState::from_event(&event);
        if status.state != state {
            debug!(
                camera_id = %self.device.id,
                session_id = %self.id,
                from = %status.state,
                to = %state,
                "Stream state changed"
            );
        }
        status.state = state;
        self.emit_state(state);

        let (trigger, message) = match event {
            PlayerEvent::Playing => {
                status.retry_count = 0;
                status.reached_playing = true;
                self.device.set_connected(true);
                return Flow::Continue;
            }
            PlayerEvent::Stopped => {
                // Only `stop()` and exhaustion end a session; the engine may
                // still report playback or errors afterwards.
                self.device.set_connected(false);
                info!(
                    camera_id = %self.device.id,
                    session_id = %self.id,
                    "Engine reported the stream stopped"
                );
                return Flow::Continue;
            }
            PlayerEvent::EncounteredError(message) => (ReconnectTrigger::Error, message),
            PlayerEvent::EndReached => (
                ReconnectTrigger::EndOfStream,
                "stream closed by server".to_string(),
            ),
            PlayerEvent::Opening | PlayerEvent::Buffering(_) | PlayerEvent::Paused => {
                return Flow::Continue;
            }
        };

        self.device.set_connected(false);
        let decision = self
            .policy
            .decide(trigger, status.retry_count, status.reached_playing);
        status.reached_playing = false;

        match decision {
            ReconnectDecision::Retry { attempt, delay } => {
                status.retry_count = attempt;
                drop(status);
                info!(
                    camera_id = %self.device.id,
                    session_id = %self.id,
                    attempt,
                    max_retries = self.policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    reason = %message,
                    "Scheduling reconnect"
                );
                let _ = self.event_tx.send(SessionEvent::Reconnecting {
                    camera_id: self.device.id.clone(),
                    session_id: self.id.clone(),
                    attempt,
                    max_retries: self.policy.max_retries,
                    delay_ms: delay.as_millis() as u64,
                });
                Flow::Reconnect { attempt, delay }
            }
            ReconnectDecision::Exhausted { attempts } => {
                status.state = StreamState::Stopped;
                drop(status);
                let message = format!("gave up after {attempts} reconnect attempts: {message}");
                warn!(
                    camera_id = %self.device.id,
                    session_id = %self.id,
                    error = %Error::TerminalStream(message.clone()),
                    "Stream stopped"
                );
                self.release_player();
                self.emit_state(StreamState::Stopped);
                let _ = self.event_tx.send(SessionEvent::ReconnectsExhausted {
                    camera_id: self.device.id.clone(),
                    session_id: self.id.clone(),
                    message,
                });
                Flow::Exit
            }
            ReconnectDecision::Ignore => {
                drop(status);
                info!(
                    camera_id = %self.device.id,
                    session_id = %self.id,
                    "Stream ended before playing, not reconnecting"
                );
                let _ = self.event_tx.send(SessionEvent::StreamEnded {
                    camera_id: self.device.id.clone(),
                    session_id: self.id.clone(),
                });
                Flow::Continue
            }
        }
    }

    fn reconnect(&self, attempt: u32) -> Result<()> {
        let mut player = self.player.lock();
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        let Some(player) = player.as_mut() else {
            return Err(Error::TransientStream("player already released".to_string()));
        };

        {
            // A concurrent `stop()` must keep its `Stopped`.
            let mut status = self.status.lock();
            if self.cancel.is_cancelled() || status.state == StreamState::Stopped {
                return Ok(());
            }
            status.state = StreamState::Opening;
        }
        debug!(camera_id = %self.device.id, session_id = %self.id, attempt, "Reopening stream");
        player
            .set_media(&self.media)
            .and_then(|()| player.play())
            .map_err(|e| Error::TransientStream(e.to_string()))
    }

    fn emit_state(&self, state: StreamState) {
        let _ = self.event_tx.send(SessionEvent::StateChanged {
            camera_id: self.device.id.clone(),
            session_id: self.id.clone(),
            state,
        });
    }
}

fn start_player(
    player: &mut dyn Player,
    target: &Arc<dyn RenderTarget>,
    media: &MediaSource,
) -> Result<()> {
    // Attaching touches the render target; the rendering toolkit may require
    // this to run on its own thread.
    player.attach(Arc::clone(target))?;
    player.set_media(media)?;
    player.play()
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("camera_id", &self.device.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::engine::{
        ContainerFormat, Muxer, PlayerEventSender, ProbeEventSender, ProbeHandle, StreamOptions,
    };

    struct CountingPlayer {
        plays: Arc<AtomicU32>,
    }

    impl Player for CountingPlayer {
        fn attach(&mut self, _target: Arc<dyn RenderTarget>) -> Result<()> {
            Ok(())
        }

        fn set_media(&mut self, _media: &MediaSource) -> Result<()> {
            Ok(())
        }

        fn play(&mut self) -> Result<()> {
            self.plays.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn detach(&mut self) -> Result<()> {
            Ok(())
        }

        fn release(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct PlayerEngine {
        plays: Arc<AtomicU32>,
    }

    impl DecodingEngine for PlayerEngine {
        fn version(&self) -> Option<String> {
            None
        }

        fn create_player(&self, _events: PlayerEventSender) -> Result<Box<dyn Player>> {
            Ok(Box::new(CountingPlayer {
                plays: Arc::clone(&self.plays),
            }))
        }

        fn create_muxer(&self, _output: &Path, _format: ContainerFormat) -> Result<Box<dyn Muxer>> {
            Err(Error::engine("no muxers"))
        }

        fn start_probe(
            &self,
            _media: &MediaSource,
            _events: ProbeEventSender,
        ) -> Result<Box<dyn ProbeHandle>> {
            Err(Error::engine("no probes"))
        }

        fn release(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Surface;

    impl RenderTarget for Surface {
        fn id(&self) -> &str {
            "surface"
        }

        fn is_attached(&self) -> bool {
            true
        }
    }

    fn open_session(engine: &PlayerEngine) -> Arc<StreamSession> {
        let (event_tx, _) = broadcast::channel(16);
        StreamSession::open(
            engine,
            Arc::new(CameraDevice::new("cam-1", "Cam", "rtsp://10.0.0.2/live")),
            Arc::new(Surface),
            MediaSource::new("rtsp://10.0.0.2/live", StreamOptions::default()),
            ReconnectPolicy::default(),
            event_tx,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_reconnect_keeps_stopped_state() {
        let engine = PlayerEngine::default();
        let session = open_session(&engine);
        assert_eq!(engine.plays.load(Ordering::SeqCst), 1);

        // Marked stopped while the reconnect already holds the player.
        session.status.lock().state = StreamState::Stopped;
        session.reconnect(1).unwrap();

        assert_eq!(session.state(), StreamState::Stopped);
        assert_eq!(engine.plays.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnect_after_stop_is_a_no_op() {
        let engine = PlayerEngine::default();
        let session = open_session(&engine);

        assert!(session.stop());
        assert!(!session.stop());
        session.reconnect(1).unwrap();

        assert_eq!(session.state(), StreamState::Stopped);
        assert_eq!(engine.plays.load(Ordering::SeqCst), 1);
    }
}
