//! Session manager configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::{EngineOptions, StreamOptions};
use crate::session::ReconnectPolicy;

/// Configuration for the Stream Session Manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionManagerConfig {
    /// How long callers wait for the engine to become ready.
    pub engine_init_timeout_ms: u64,
    /// Session-level reconnect policy.
    pub reconnect: ReconnectPolicy,
    /// Default connection probe timeout.
    pub probe_timeout_ms: u64,
    /// Options for live streams.
    pub stream: StreamOptions,
    /// Options for connection probes.
    pub probe_stream: StreamOptions,
    /// Engine instance options.
    pub engine: EngineOptions,
    /// Capacity of the session event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            engine_init_timeout_ms: 3000,
            reconnect: ReconnectPolicy::default(),
            probe_timeout_ms: 8000,
            stream: StreamOptions::default(),
            probe_stream: StreamOptions::probe(),
            engine: EngineOptions::default(),
            event_channel_capacity: 256,
        }
    }
}

impl SessionManagerConfig {
    /// Load the config from environment variables, falling back to defaults.
    ///
    /// A `.env` file is read first if present. Supported env vars:
    /// - `NVR_ENGINE_INIT_TIMEOUT_MS`
    /// - `NVR_RECONNECT_MAX_RETRIES`
    /// - `NVR_RECONNECT_DELAY_MS`
    /// - `NVR_PROBE_TIMEOUT_MS`
    /// - `NVR_ENGINE_LOG_FILE`
    pub fn from_env_or_default() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = parse_var(&lookup, "NVR_ENGINE_INIT_TIMEOUT_MS") {
            config.engine_init_timeout_ms = value;
        }
        if let Some(value) = parse_var(&lookup, "NVR_RECONNECT_MAX_RETRIES") {
            config.reconnect.max_retries = value;
        }
        if let Some(value) = parse_var(&lookup, "NVR_RECONNECT_DELAY_MS") {
            config.reconnect.delay_ms = value;
        }
        if let Some(value) = parse_var(&lookup, "NVR_PROBE_TIMEOUT_MS") {
            config.probe_timeout_ms = value;
        }
        if let Some(path) = lookup("NVR_ENGINE_LOG_FILE")
            && !path.trim().is_empty()
        {
            config.engine.log_file = Some(PathBuf::from(path.trim()));
        }

        config
    }

    pub fn engine_init_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_init_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}
