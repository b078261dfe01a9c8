//! Shared decoding engine handle.
//!
//! One engine instance serves every session of a manager. Construction is
//! lazy, runs off the caller's path and is never run twice concurrently:
//! callers that arrive while an attempt is in flight join it instead of
//! starting their own.
//!
//! State lives in a [`watch`] channel so waiters can await transitions. Every
//! transition happens while holding the slot mutex, which keeps the state and
//! the engine slot consistent with each other.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::options::EngineOptions;
use super::traits::{DecodingEngine, EngineFactory};
use crate::teardown::Teardown;
use crate::utils::fs::ensure_parent_dir;
use crate::{Error, Result};

/// Lifecycle state of the shared engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
    /// Terminal. The owning manager must be discarded.
    Released,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Released => "released",
        };
        f.write_str(s)
    }
}

#[derive(Default)]
struct Slot {
    engine: Option<Arc<dyn DecodingEngine>>,
    last_error: Option<String>,
}

struct Shared {
    factory: Arc<dyn EngineFactory>,
    options: EngineOptions,
    slot: Mutex<Slot>,
    state_tx: watch::Sender<EngineState>,
    construction_attempts: AtomicU32,
}

impl Shared {
    fn current(&self) -> EngineState {
        *self.state_tx.borrow()
    }

    fn finish_construction(&self, attempt: u32, result: Result<Arc<dyn DecodingEngine>>) {
        let mut slot = self.slot.lock();
        let released = self.current() == EngineState::Released;

        match result {
            Ok(engine) if released => {
                drop(slot);
                debug!(attempt, "Engine finished building after release, tearing it down");
                release_engine(engine);
            }
            Ok(engine) => {
                let version = engine.version();
                slot.engine = Some(engine);
                slot.last_error = None;
                self.state_tx.send_replace(EngineState::Ready);
                info!(attempt, version = ?version, "Decoding engine ready");
            }
            Err(e) if released => {
                debug!(attempt, error = %e, "Engine construction failed after release");
            }
            Err(e) => {
                error!(attempt, error = %e, "Decoding engine construction failed");
                slot.last_error = Some(e.to_string());
                self.state_tx.send_replace(EngineState::Failed);
            }
        }
    }
}

fn release_engine(engine: Arc<dyn DecodingEngine>) {
    let mut teardown = Teardown::new("engine", "shared");
    teardown.run("release", || engine.release());
}

/// Handle to the process-wide engine instance.
///
/// Cloning is cheap; clones share the same engine and state.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    pub fn new(factory: Arc<dyn EngineFactory>, options: EngineOptions) -> Self {
        let (state_tx, _) = watch::channel(EngineState::Uninitialized);
        Self {
            shared: Arc::new(Shared {
                factory,
                options,
                slot: Mutex::new(Slot::default()),
                state_tx,
                construction_attempts: AtomicU32::new(0),
            }),
        }
    }

    pub fn state(&self) -> EngineState {
        self.shared.current()
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.shared.state_tx.subscribe()
    }

    /// The engine, if it is ready.
    pub fn engine(&self) -> Option<Arc<dyn DecodingEngine>> {
        let slot = self.shared.slot.lock();
        match self.shared.current() {
            EngineState::Ready => slot.engine.clone(),
            _ => None,
        }
    }

    /// Message of the last failed construction.
    pub fn last_error(&self) -> Option<String> {
        self.shared.slot.lock().last_error.clone()
    }

    /// Number of construction attempts started so far.
    pub fn construction_attempts(&self) -> u32 {
        self.shared.construction_attempts.load(Ordering::SeqCst)
    }

    /// Make sure the engine is constructed, waiting at most `timeout`.
    ///
    /// Returns `Ready` on success and `Failed` when construction failed or
    /// did not finish in time; a timed out attempt keeps running and a later
    /// call joins it. Returns `Released` once the handle has been released.
    /// Construction errors never escape; see [`Self::last_error`].
    pub async fn ensure_ready(&self, timeout: Duration) -> EngineState {
        let mut rx = self.shared.state_tx.subscribe();

        let start_attempt = {
            let _slot = self.shared.slot.lock();
            match self.shared.current() {
                state @ (EngineState::Ready | EngineState::Released) => return state,
                EngineState::Initializing => false,
                EngineState::Uninitialized | EngineState::Failed => {
                    self.shared.state_tx.send_replace(EngineState::Initializing);
                    true
                }
            }
        };

        if start_attempt {
            self.spawn_construction();
        } else {
            debug!("Joining in-flight engine initialization");
        }

        let settled =
            tokio::time::timeout(timeout, rx.wait_for(|s| *s != EngineState::Initializing)).await;
        match settled {
            Ok(Ok(state)) => *state,
            Ok(Err(_)) => EngineState::Failed,
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Engine not ready within timeout"
                );
                EngineState::Failed
            }
        }
    }

    /// Like [`Self::ensure_ready`], but hands out the engine or the reason it
    /// is unavailable.
    pub async fn acquire(&self, timeout: Duration) -> Result<Arc<dyn DecodingEngine>> {
        self.ensure_ready(timeout).await;
        self.ready_engine()
    }

    /// The engine as it is right now, without waiting for construction.
    pub fn ready_engine(&self) -> Result<Arc<dyn DecodingEngine>> {
        let slot = self.shared.slot.lock();
        match self.shared.current() {
            EngineState::Released => Err(Error::ShuttingDown),
            EngineState::Ready => slot
                .engine
                .clone()
                .ok_or_else(|| Error::engine_unavailable("engine slot is empty")),
            state => {
                let reason = slot
                    .last_error
                    .clone()
                    .unwrap_or_else(|| format!("engine is {state}"));
                Err(Error::engine_unavailable(reason))
            }
        }
    }

    /// Tear the current engine down and build a fresh one.
    ///
    /// Sessions created from the old engine must be stopped first. An
    /// in-flight initialization is joined rather than restarted.
    pub async fn reinitialize(&self, timeout: Duration) -> EngineState {
        self.discard();
        self.ensure_ready(timeout).await
    }

    /// Tear down the current engine without closing the handle; the next
    /// [`Self::ensure_ready`] builds a fresh one. No-op while a construction
    /// is in flight or after release. Returns whether an engine was torn down.
    pub fn discard(&self) -> bool {
        let old = {
            let mut slot = self.shared.slot.lock();
            match self.shared.current() {
                EngineState::Released | EngineState::Initializing => None,
                _ => {
                    self.shared
                        .state_tx
                        .send_replace(EngineState::Uninitialized);
                    slot.engine.take()
                }
            }
        };

        let Some(engine) = old else {
            return false;
        };
        info!("Reinitializing decoding engine");
        release_engine(engine);
        true
    }

    /// Release the engine. Native teardown runs at most once; later calls
    /// return `false`.
    pub fn release(&self) -> bool {
        let engine = {
            let mut slot = self.shared.slot.lock();
            if self.shared.current() == EngineState::Released {
                return false;
            }
            self.shared.state_tx.send_replace(EngineState::Released);
            slot.engine.take()
        };

        if let Some(engine) = engine {
            release_engine(engine);
        }
        info!("Decoding engine released");
        true
    }

    fn spawn_construction(&self) {
        let shared = Arc::clone(&self.shared);
        let attempt = shared.construction_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(attempt, "Starting engine construction");

        tokio::spawn(async move {
            if let Some(log_file) = &shared.options.log_file {
                match ensure_parent_dir(log_file).await {
                    Ok(()) => info!(path = %log_file.display(), "Engine diagnostic log"),
                    Err(e) => warn!(error = %e, "Cannot prepare engine log directory"),
                }
            }

            // Run the factory on its own task so a panic surfaces as a
            // JoinError instead of leaving the state stuck at Initializing.
            let factory = Arc::clone(&shared.factory);
            let options = shared.options.clone();
            let result = match tokio::spawn(async move { factory.build(&options).await }).await {
                Ok(result) => result,
                Err(e) => Err(Error::engine_unavailable(format!(
                    "engine construction aborted: {e}"
                ))),
            };

            shared.finish_construction(attempt, result);
        });
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("state", &self.state())
            .field("construction_attempts", &self.construction_attempts())
            .finish()
    }
}
