//! Recording session: decoded samples written to a container file.
//!
//! The muxer is created up front but its track and start are deferred until
//! the first sample arrives, since the media format is only known once the
//! decoder has negotiated it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::device::CameraDevice;
use crate::engine::{ContainerFormat, DecodingEngine, MediaFormat, Muxer, SampleInfo};
use crate::teardown::{Teardown, TeardownReport};
use crate::{Error, Result};

/// How a recording ended.
#[derive(Debug, Clone)]
pub struct RecordingSummary {
    pub camera_id: String,
    pub path: PathBuf,
    /// The container was finalized. False when no sample ever arrived.
    pub finalized: bool,
    pub samples_written: u64,
    pub teardown: TeardownReport,
}

/// One active recording pipeline.
pub struct RecordingSession {
    device: Arc<CameraDevice>,
    path: PathBuf,
    muxer: Option<Box<dyn Muxer>>,
    track: Option<usize>,
    started: bool,
    samples_written: u64,
    started_at: DateTime<Utc>,
}

impl RecordingSession {
    /// Create the muxer for `path`. The parent directory must exist.
    pub(crate) fn create(
        engine: &dyn DecodingEngine,
        device: Arc<CameraDevice>,
        path: &Path,
        format: ContainerFormat,
    ) -> Result<Self> {
        let muxer = engine
            .create_muxer(path, format)
            .map_err(|e| muxer_error("creating muxer for", path, e))?;

        info!(camera_id = %device.id, path = %path.display(), "Recording session created");

        Ok(Self {
            device,
            path: path.to_path_buf(),
            muxer: Some(muxer),
            track: None,
            started: false,
            samples_written: 0,
            started_at: Utc::now(),
        })
    }

    pub fn camera_id(&self) -> &str {
        &self.device.id
    }

    pub fn device(&self) -> &Arc<CameraDevice> {
        &self.device
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the muxer has been started (at least one sample arrived).
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Write one encoded sample, starting the muxer on the first call.
    ///
    /// Empty buffers are skipped.
    pub fn write_sample(
        &mut self,
        data: &[u8],
        info: &SampleInfo,
        format: &MediaFormat,
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let Some(muxer) = self.muxer.as_mut() else {
            return Err(Error::recording_io(
                "writing to",
                &self.path,
                std::io::Error::other("muxer already released"),
            ));
        };

        let track = match self.track {
            Some(track) => track,
            None => {
                let track = muxer
                    .add_track(format)
                    .map_err(|e| muxer_error("adding track to", &self.path, e))?;
                muxer
                    .start()
                    .map_err(|e| muxer_error("starting", &self.path, e))?;
                self.track = Some(track);
                self.started = true;
                debug!(
                    camera_id = %self.device.id,
                    track,
                    mime = %format.mime,
                    "Muxer started on first sample"
                );
                track
            }
        };

        muxer
            .write_sample(track, data, info)
            .map_err(|e| muxer_error("writing to", &self.path, e))?;
        self.samples_written += 1;
        Ok(())
    }

    /// Finalize (only if started) and release the muxer.
    pub fn stop(mut self) -> RecordingSummary {
        let (finalized, teardown) = self.shutdown();
        info!(
            camera_id = %self.device.id,
            path = %self.path.display(),
            finalized,
            samples = self.samples_written,
            "Recording stopped"
        );
        RecordingSummary {
            camera_id: self.device.id.clone(),
            path: self.path.clone(),
            finalized,
            samples_written: self.samples_written,
            teardown,
        }
    }

    fn shutdown(&mut self) -> (bool, TeardownReport) {
        let mut teardown = Teardown::new("recording", self.path.display().to_string());
        let Some(mut muxer) = self.muxer.take() else {
            return (false, teardown.finish());
        };

        // Finalizing a muxer that never started is an engine error.
        let finalized = self.started && teardown.run("finalize", || muxer.finalize());
        teardown.run("release", || muxer.release());
        (finalized, teardown.finish())
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if self.muxer.is_some() {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSession")
            .field("camera_id", &self.device.id)
            .field("path", &self.path)
            .field("started", &self.started)
            .field("samples_written", &self.samples_written)
            .finish()
    }
}

fn muxer_error(op: &'static str, path: &Path, e: Error) -> Error {
    match e {
        Error::RecordingIo { .. } => e,
        Error::Io(source) => Error::recording_io(op, path, source),
        other => Error::recording_io(op, path, std::io::Error::other(other.to_string())),
    }
}
