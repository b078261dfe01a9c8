//! Registry of live stream sessions and the single recording slot.
//!
//! Membership changes are atomic. Stopping a single session happens after it
//! has left the map, outside the map's locks, so one slow teardown never
//! blocks operations on other cameras.
//!
//! Native resources are only created while the gate is held for reading, and
//! bulk teardown (stop all, reinitialize, shutdown) holds it for writing. A
//! start racing a teardown therefore either finishes first and is stopped
//! with the rest, or opens afterwards against whatever engine is current; it
//! never builds on an engine being torn down and is never half-tracked.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::device::CameraDevice;
use crate::engine::{ContainerFormat, EngineHandle, MediaFormat, SampleInfo};
use crate::events::SessionEvent;
use crate::session::{RecordingSession, RecordingSummary, StreamHandle, StreamInfo, StreamSession};
use crate::utils::fs::ensure_parent_dir;
use crate::{Error, Result};

pub struct SessionRegistry {
    /// Live sessions keyed by camera id.
    streams: DashMap<String, Arc<StreamSession>>,
    recording: Mutex<Option<RecordingSession>>,
    shutting_down: RwLock<bool>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    pub fn new(event_tx: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            streams: DashMap::new(),
            recording: Mutex::new(None),
            shutting_down: RwLock::new(false),
            event_tx,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutting_down.read()
    }

    /// Build a session with `open` and register it for its camera.
    ///
    /// `open` runs with the gate held, so no bulk teardown can start until
    /// the session is either registered or has failed. Returns the session
    /// and the entry it displaced, which the caller must stop. Fails with
    /// [`Error::ShuttingDown`] without calling `open` once the registry has
    /// been shut down.
    pub fn register<F>(&self, open: F) -> Result<(Arc<StreamSession>, Option<Arc<StreamSession>>)>
    where
        F: FnOnce() -> Result<Arc<StreamSession>>,
    {
        let gate = self.shutting_down.read();
        if *gate {
            return Err(Error::ShuttingDown);
        }

        let session = open()?;
        let displaced = self
            .streams
            .insert(session.camera_id().to_string(), Arc::clone(&session));
        drop(gate);
        Ok((session, displaced))
    }

    /// Remove the session `handle` refers to. No-op when that session is no
    /// longer registered (already removed, or superseded by a newer one).
    pub fn remove(&self, handle: &StreamHandle) -> Option<Arc<StreamSession>> {
        self.streams
            .remove_if(&handle.camera_id, |_, session| session.id() == handle.session_id)
            .map(|(_, session)| session)
    }

    /// Remove whatever session is registered for `camera_id`.
    pub fn remove_camera(&self, camera_id: &str) -> Option<Arc<StreamSession>> {
        self.streams.remove(camera_id).map(|(_, session)| session)
    }

    pub fn get(&self, camera_id: &str) -> Option<Arc<StreamSession>> {
        self.streams.get(camera_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, camera_id: &str) -> bool {
        self.streams.contains_key(camera_id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn snapshot(&self) -> Vec<StreamInfo> {
        self.streams.iter().map(|entry| entry.value().info()).collect()
    }

    /// Run `teardown` with the gate held for writing: no session or
    /// recording can open until it returns. With `shutdown` set the registry
    /// stays closed afterwards and every later open is rejected.
    pub fn exclusive<T>(&self, shutdown: bool, teardown: impl FnOnce() -> T) -> T {
        let mut gate = self.shutting_down.write();
        if shutdown {
            *gate = true;
        }
        teardown()
    }

    /// Snapshot-and-clear, then stop each session. Returns how many were
    /// stopped.
    pub fn stop_all(&self, shutdown: bool) -> usize {
        self.exclusive(shutdown, || self.stop_sessions())
    }

    /// Stop every registered session. Callers hold the gate through
    /// [`Self::exclusive`].
    pub fn stop_sessions(&self) -> usize {
        let keys: Vec<String> = self.streams.iter().map(|entry| entry.key().clone()).collect();
        let sessions: Vec<_> = keys
            .iter()
            .filter_map(|key| self.streams.remove(key).map(|(_, session)| session))
            .collect();
        let count = sessions.len();

        for session in sessions {
            session.stop();
            session.device().set_connected(false);
        }

        if count > 0 {
            info!(count, "Stopped all stream sessions");
        }
        count
    }

    pub fn is_recording(&self) -> bool {
        self.recording.lock().is_some()
    }

    /// Camera of the active recording, if any.
    pub fn recording_camera(&self) -> Option<String> {
        self.recording
            .lock()
            .as_ref()
            .map(|session| session.camera_id().to_string())
    }

    /// Start recording `device` into `path`, stopping any active recording
    /// first.
    pub async fn start_recording(
        &self,
        engine: &EngineHandle,
        device: &Arc<CameraDevice>,
        path: &Path,
        format: ContainerFormat,
    ) -> Result<()> {
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        if let Some(previous) = self.take_recording() {
            self.supersede(previous, device);
        }

        ensure_parent_dir(path).await?;

        let displaced = {
            let gate = self.shutting_down.read();
            if *gate {
                return Err(Error::ShuttingDown);
            }
            let engine = engine.ready_engine()?;
            let session =
                RecordingSession::create(engine.as_ref(), Arc::clone(device), path, format)?;

            // A concurrent start may have filled the slot in the meantime.
            let mut slot = self.recording.lock();
            let displaced = slot.take();
            if let Some(displaced) = &displaced
                && displaced.camera_id() != device.id
            {
                displaced.device().set_recording(false);
            }
            device.set_recording(true);
            *slot = Some(session);
            displaced
        };

        if let Some(displaced) = displaced {
            let summary = displaced.stop();
            self.emit_stopped(&summary);
            let _ = self.event_tx.send(SessionEvent::RecordingSuperseded {
                previous_camera_id: summary.camera_id,
                camera_id: device.id.clone(),
            });
        }

        let _ = self.event_tx.send(SessionEvent::RecordingStarted {
            camera_id: device.id.clone(),
            path: path.to_path_buf(),
        });
        Ok(())
    }

    /// Feed one sample to the active recording.
    ///
    /// A write failure stops the recording; the failure is reported through
    /// [`SessionEvent::RecordingFailed`] and `false` is returned.
    pub fn write_sample(&self, data: &[u8], info: &SampleInfo, format: &MediaFormat) -> bool {
        let mut slot = self.recording.lock();
        let Some(session) = slot.as_mut() else {
            return false;
        };

        let Err(e) = session.write_sample(data, info, format) else {
            return true;
        };

        let Some(session) = slot.take() else {
            return false;
        };
        drop(slot);

        error!(
            camera_id = %session.camera_id(),
            path = %session.path().display(),
            error = %e,
            "Recording write failed, stopping recording"
        );
        session.device().set_recording(false);
        let summary = session.stop();
        let _ = self.event_tx.send(SessionEvent::RecordingFailed {
            camera_id: summary.camera_id,
            path: summary.path,
            error: e.to_string(),
        });
        false
    }

    /// Stop the active recording if it belongs to `device`. Always clears the
    /// device's recording flag. Returns whether a recording was stopped.
    pub fn stop_recording(&self, device: &CameraDevice) -> bool {
        let session = {
            let mut slot = self.recording.lock();
            let owned = slot
                .as_ref()
                .is_some_and(|active| active.camera_id() == device.id);
            if owned { slot.take() } else { None }
        };
        device.set_recording(false);

        match session {
            Some(session) => {
                let summary = session.stop();
                self.emit_stopped(&summary);
                true
            }
            None => {
                debug!(camera_id = %device.id, "No active recording for camera");
                false
            }
        }
    }

    /// Stop whatever recording is active.
    pub fn stop_any_recording(&self) -> Option<RecordingSummary> {
        let session = self.take_recording()?;
        session.device().set_recording(false);
        let summary = session.stop();
        self.emit_stopped(&summary);
        Some(summary)
    }

    fn take_recording(&self) -> Option<RecordingSession> {
        self.recording.lock().take()
    }

    fn supersede(&self, previous: RecordingSession, next: &CameraDevice) {
        info!(
            previous_camera_id = %previous.camera_id(),
            camera_id = %next.id,
            "Stopping active recording before starting a new one"
        );
        previous.device().set_recording(false);
        let summary = previous.stop();
        self.emit_stopped(&summary);
        let _ = self.event_tx.send(SessionEvent::RecordingSuperseded {
            previous_camera_id: summary.camera_id,
            camera_id: next.id.clone(),
        });
    }

    fn emit_stopped(&self, summary: &RecordingSummary) {
        let _ = self.event_tx.send(SessionEvent::RecordingStopped {
            camera_id: summary.camera_id.clone(),
            path: summary.path.clone(),
            finalized: summary.finalized,
        });
    }
}
