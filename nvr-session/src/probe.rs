//! One-shot connection probe.
//!
//! Opens a network-level parse of a URL without any render target and
//! reports whether the stream answered. The probe enforces its own timeout,
//! since the engine is not guaranteed to ever report back.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::engine::{EngineHandle, MediaSource, ProbeEvent, StreamOptions};
use crate::teardown::Teardown;
use crate::utils::url::{parse_stream_url, redact_credentials};

/// Result of a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub ok: bool,
    /// Human readable diagnostic.
    pub message: String,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl ProbeOutcome {
    fn success(message: impl Into<String>, started: Instant) -> Self {
        Self {
            ok: true,
            message: message.into(),
            elapsed: started.elapsed(),
        }
    }

    fn failure(message: impl Into<String>, started: Instant) -> Self {
        Self {
            ok: false,
            message: message.into(),
            elapsed: started.elapsed(),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Probes candidate stream URLs against the shared engine.
#[derive(Debug, Clone)]
pub struct ConnectionProbe {
    engine: EngineHandle,
    options: StreamOptions,
    engine_timeout: Duration,
}

impl ConnectionProbe {
    pub fn new(engine: EngineHandle, options: StreamOptions, engine_timeout: Duration) -> Self {
        Self {
            engine,
            options,
            engine_timeout,
        }
    }

    /// Probe `url`, giving it at most `timeout` end to end.
    ///
    /// Never fails. Engine readiness counts against `timeout` too, capped at
    /// the engine readiness bound. The probe handle is released exactly
    /// once, whichever of the result or the deadline comes first.
    pub async fn run(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        let started = Instant::now();
        let redacted = redact_credentials(url);

        if let Err(e) = parse_stream_url(url) {
            debug!(url = %redacted, error = %e, "Probe rejected URL");
            return ProbeOutcome::failure(e.to_string(), started);
        }

        let deadline = started + timeout;
        let engine = match self.engine.acquire(self.engine_timeout.min(timeout)).await {
            Ok(engine) => engine,
            Err(e) => return ProbeOutcome::failure(e.to_string(), started),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let media = MediaSource::new(url.trim(), self.options.clone());
        let handle = match engine.start_probe(&media, tx) {
            Ok(handle) => handle,
            Err(e) => return ProbeOutcome::failure(format!("cannot start probe: {e}"), started),
        };

        let outcome = tokio::select! {
            event = rx.recv() => match event {
                Some(ProbeEvent::Parsed(message)) => ProbeOutcome::success(message, started),
                Some(ProbeEvent::Failed(message)) => ProbeOutcome::failure(message, started),
                None => ProbeOutcome::failure("probe ended without a result", started),
            },
            _ = tokio::time::sleep_until(deadline) => ProbeOutcome::failure(
                format!("no response within {} ms", timeout.as_millis()),
                started,
            ),
        };

        let mut teardown = Teardown::new("probe", redacted.as_str());
        teardown.run("release", || handle.release());

        info!(
            url = %redacted,
            ok = outcome.ok,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            message = %outcome.message,
            "Connection probe finished"
        );
        outcome
    }
}
