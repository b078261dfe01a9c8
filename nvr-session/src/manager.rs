//! Stream Session Manager.
//!
//! The facade callers use: live view start/stop, recording, connection
//! probes and shutdown, all multiplexed over one shared decoding engine.
//! Engine failures never escape as-is; they surface as [`crate::Error`]
//! variants, `bool`/`Option` results, device flags or [`SessionEvent`]s.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionManagerConfig;
use crate::device::CameraDevice;
use crate::engine::{
    ContainerFormat, EngineFactory, EngineHandle, EngineState, MediaFormat, MediaSource,
    RenderTarget, SampleInfo,
};
use crate::events::SessionEvent;
use crate::probe::{ConnectionProbe, ProbeOutcome};
use crate::registry::SessionRegistry;
use crate::session::{StreamHandle, StreamInfo, StreamSession, StreamState};
use crate::utils::filename;
use crate::{Error, Result};

/// Owns every live stream, the active recording and the shared engine.
///
/// Meant to be held in an `Arc`. After [`Self::release`] the manager is
/// dead for good; build a new one to start over.
pub struct StreamSessionManager {
    config: SessionManagerConfig,
    engine: EngineHandle,
    registry: SessionRegistry,
    probe: ConnectionProbe,
    event_tx: broadcast::Sender<SessionEvent>,
    released: AtomicBool,
}

impl StreamSessionManager {
    pub fn new(factory: Arc<dyn EngineFactory>, config: SessionManagerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let engine = EngineHandle::new(factory, config.engine.clone());
        let probe = ConnectionProbe::new(
            engine.clone(),
            config.probe_stream.clone(),
            config.engine_init_timeout(),
        );

        Self {
            registry: SessionRegistry::new(event_tx.clone()),
            engine,
            probe,
            event_tx,
            released: AtomicBool::new(false),
            config,
        }
    }

    pub fn config(&self) -> &SessionManagerConfig {
        &self.config
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn engine_state(&self) -> EngineState {
        self.engine.state()
    }

    /// Initialize the engine ahead of the first stream.
    pub async fn ensure_engine_ready(&self) -> EngineState {
        self.engine
            .ensure_ready(self.config.engine_init_timeout())
            .await
    }

    /// Stop everything and rebuild the engine.
    ///
    /// Starts that race the teardown either finish first and are stopped
    /// with the rest, or open afterwards: on the rebuilt engine once it is
    /// ready, with [`Error::EngineUnavailable`] while it is still building.
    pub async fn reinitialize_engine(&self) -> EngineState {
        if self.released.load(Ordering::Acquire) {
            return EngineState::Released;
        }
        self.registry.exclusive(false, || {
            self.registry.stop_sessions();
            self.registry.stop_any_recording();
            self.engine.discard();
        });
        self.engine
            .ensure_ready(self.config.engine_init_timeout())
            .await
    }

    /// Start a live view of `device` on `target`.
    ///
    /// `target` must already be attached to a live output. Any stream the
    /// camera already has is stopped first. The device is marked connected
    /// once the engine reports `Playing`.
    pub async fn start(
        &self,
        device: &Arc<CameraDevice>,
        target: Arc<dyn RenderTarget>,
    ) -> Result<StreamHandle> {
        if self.registry.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }
        if !target.is_attached() {
            debug!(camera_id = %device.id, target = %target.id(), "Render target not attached");
            return Err(Error::NotAttached(target.id().to_string()));
        }

        let url = device.stream_url()?;
        self.engine.acquire(self.config.engine_init_timeout()).await?;

        if let Some(previous) = self.registry.remove_camera(&device.id) {
            info!(
                camera_id = %device.id,
                session_id = %previous.id(),
                "Superseding existing stream session"
            );
            previous.stop();
            device.set_connected(false);
        }

        // The engine may have been rebuilt or released since it was
        // acquired; the registry gate pins whichever one is current.
        let (session, displaced) = self.registry.register(|| {
            let engine = self.engine.ready_engine()?;
            StreamSession::open(
                engine.as_ref(),
                Arc::clone(device),
                target,
                MediaSource::new(url, self.config.stream.clone()),
                self.config.reconnect.clone(),
                self.event_tx.clone(),
            )
        })?;

        if let Some(displaced) = displaced {
            debug!(
                camera_id = %device.id,
                session_id = %displaced.id(),
                "Concurrent start displaced a session"
            );
            displaced.stop();
        }

        let handle = session.handle();
        let _ = self.event_tx.send(SessionEvent::StreamStarted {
            camera_id: handle.camera_id.clone(),
            session_id: handle.session_id.clone(),
        });
        Ok(handle)
    }

    /// Stop the stream `handle` refers to.
    ///
    /// Idempotent; stopping an unknown, superseded or already stopped handle
    /// is a no-op. The device is only marked disconnected when no newer
    /// session for the camera exists.
    pub fn stop(&self, handle: &StreamHandle, device: &CameraDevice) {
        match self.registry.remove(handle) {
            Some(session) => {
                session.stop();
            }
            None => {
                debug!(
                    camera_id = %handle.camera_id,
                    session_id = %handle.session_id,
                    "Stop on a session that is no longer registered"
                );
            }
        }

        if !self.registry.contains(&handle.camera_id) {
            device.set_connected(false);
        }
    }

    /// Stop every live stream. Returns how many were stopped.
    pub fn stop_all_streams(&self) -> usize {
        self.registry.stop_all(false)
    }

    pub fn active_streams(&self) -> Vec<StreamInfo> {
        self.registry.snapshot()
    }

    pub fn stream_state(&self, camera_id: &str) -> Option<StreamState> {
        self.registry.get(camera_id).map(|session| session.state())
    }

    /// Start recording `device` to `output`. Returns `false` on failure; see
    /// [`Self::try_start_recording`] for the reason.
    pub async fn start_recording(&self, device: &Arc<CameraDevice>, output: &Path) -> bool {
        match self.try_start_recording(device, output).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    camera_id = %device.id,
                    path = %output.display(),
                    error = %e,
                    "Failed to start recording"
                );
                false
            }
        }
    }

    /// Start recording, stopping any recording already in progress.
    pub async fn try_start_recording(
        &self,
        device: &Arc<CameraDevice>,
        output: &Path,
    ) -> Result<()> {
        if self.registry.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        self.engine.acquire(self.config.engine_init_timeout()).await?;
        self.registry
            .start_recording(&self.engine, device, output, ContainerFormat::Mp4)
            .await
    }

    /// Feed one encoded sample to the active recording.
    pub fn write_sample(&self, data: &[u8], info: &SampleInfo, format: &MediaFormat) -> bool {
        self.registry.write_sample(data, info, format)
    }

    /// Stop the recording of `device`, if it is the one recording.
    pub fn stop_recording(&self, device: &CameraDevice) -> bool {
        self.registry.stop_recording(device)
    }

    pub fn is_recording(&self) -> bool {
        self.registry.is_recording()
    }

    pub fn recording_camera(&self) -> Option<String> {
        self.registry.recording_camera()
    }

    /// Probe `url` with the configured timeout.
    pub async fn probe(&self, url: &str) -> ProbeOutcome {
        self.probe.run(url, self.config.probe_timeout()).await
    }

    pub async fn probe_with_timeout(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        self.probe.run(url, timeout).await
    }

    /// Fire-and-forget probe. `callback` runs exactly once with the result.
    pub fn probe_connection<F>(&self, url: impl Into<String>, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(bool, String) + Send + 'static,
    {
        let probe = self.probe.clone();
        let timeout = self.config.probe_timeout();
        let url = url.into();

        tokio::spawn(async move {
            let outcome = probe.run(&url, timeout).await;
            callback(outcome.ok, outcome.message);
        })
    }

    /// Shut down: reject new sessions, stop every stream and the recording,
    /// then release the engine. Later calls are no-ops.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }

        let (streams, recording) = self.registry.exclusive(true, || {
            let streams = self.registry.stop_sessions();
            let recording = self.registry.stop_any_recording().is_some();
            self.engine.release();
            (streams, recording)
        });

        info!(streams, recording, "Stream session manager released");
        true
    }

    /// Where a new recording of `device` started at `at` goes inside `dir`.
    pub fn recording_file_path(dir: &Path, device: &CameraDevice, at: DateTime<Local>) -> PathBuf {
        filename::recording_file_path(dir, &device.id, at)
    }
}

impl Drop for StreamSessionManager {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for StreamSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSessionManager")
            .field("engine", &self.engine)
            .field("streams", &self.registry.len())
            .field("recording", &self.registry.is_recording())
            .finish()
    }
}
