//! Camera device descriptor.
//!
//! The catalog owns devices; this crate only reads the connection fields and
//! writes the `connected` / `recording` flags back as sessions change state.
//! The flags are last-writer-wins telemetry for the UI. Nothing in the
//! session manager reads them to make decisions.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Default RTSP port used when building a URL from host/port fields.
pub const DEFAULT_RTSP_PORT: u16 = 554;

/// A camera known to the catalog.
#[derive(Debug, Serialize, Deserialize)]
pub struct CameraDevice {
    /// Stable, caller-assigned identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Camera host (IP or hostname).
    #[serde(default)]
    pub host: String,
    /// Camera RTSP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username for stream authentication.
    #[serde(default)]
    pub username: String,
    /// Password for stream authentication.
    #[serde(default, skip_serializing)]
    pub password: String,
    /// Explicit stream URL. May already carry credentials.
    #[serde(default)]
    pub rtsp_url: String,
    #[serde(skip)]
    connected: AtomicBool,
    #[serde(skip)]
    recording: AtomicBool,
}

fn default_port() -> u16 {
    DEFAULT_RTSP_PORT
}

impl CameraDevice {
    /// Create a device from an explicit stream URL.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        rtsp_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            host: String::new(),
            port: DEFAULT_RTSP_PORT,
            username: String::new(),
            password: String::new(),
            rtsp_url: rtsp_url.into(),
            connected: AtomicBool::new(false),
            recording: AtomicBool::new(false),
        }
    }

    /// Set the camera host and port.
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set separate credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Last known connectivity of the live view.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Last known recording state.
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::Release);
    }

    /// Resolve the URL handed to the engine.
    ///
    /// Separate credentials are embedded only when the URL has no user info
    /// of its own. An empty `rtsp_url` falls back to `rtsp://host:port/`.
    pub fn stream_url(&self) -> Result<String> {
        let raw = self.rtsp_url.trim();
        let mut url = if raw.is_empty() {
            if self.host.trim().is_empty() {
                return Err(Error::invalid_url(format!(
                    "camera {} has neither a stream URL nor a host",
                    self.id
                )));
            }
            Url::parse(&format!("rtsp://{}:{}/", self.host.trim(), self.port))
                .map_err(|e| Error::invalid_url(format!("camera {}: {}", self.id, e)))?
        } else {
            Url::parse(raw).map_err(|e| Error::invalid_url(format!("camera {}: {}", self.id, e)))?
        };

        if url.username().is_empty() && !self.username.is_empty() {
            // set_username only fails for cannot-be-a-base URLs
            url.set_username(&self.username).map_err(|_| {
                Error::invalid_url(format!("camera {}: URL cannot carry credentials", self.id))
            })?;
            if !self.password.is_empty() {
                url.set_password(Some(&self.password)).map_err(|_| {
                    Error::invalid_url(format!("camera {}: URL cannot carry credentials", self.id))
                })?;
            }
        }

        Ok(url.to_string())
    }

    /// Stream URL with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        match self.stream_url() {
            Ok(url) => crate::utils::url::redact_credentials(&url),
            Err(_) => "<invalid>".to_string(),
        }
    }
}

impl Clone for CameraDevice {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            rtsp_url: self.rtsp_url.clone(),
            connected: AtomicBool::new(self.is_connected()),
            recording: AtomicBool::new(self.is_recording()),
        }
    }
}
