//! Scripted in-memory engine for driving the session manager in tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use nvr_session::engine::{
    ContainerFormat, DecodingEngine, EngineFactory, EngineOptions, MediaFormat, MediaSource,
    Muxer, Player, PlayerEvent, PlayerEventSender, ProbeEvent, ProbeEventSender, ProbeHandle,
    RenderTarget, SampleInfo,
};
use nvr_session::{
    CameraDevice, Error, ReconnectPolicy, Result, SessionEvent, SessionManagerConfig,
    StreamSessionManager,
};

/// Shared record of one mock player.
pub struct PlayerLog {
    events: PlayerEventSender,
    calls: Mutex<Vec<&'static str>>,
    plays: AtomicU32,
    fail_on: Vec<&'static str>,
    panic_on: Vec<&'static str>,
}

impl PlayerLog {
    /// Deliver an engine event to the session, as the engine thread would.
    pub fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn count(&self, step: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == step).count()
    }

    pub fn plays(&self) -> u32 {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.count("release") > 0
    }

    fn step(&self, step: &'static str) -> Result<()> {
        self.calls.lock().push(step);
        if self.panic_on.contains(&step) {
            panic!("mock player {step} blew up");
        }
        if self.fail_on.contains(&step) {
            return Err(Error::engine(format!("mock player {step} failed")));
        }
        Ok(())
    }
}

struct MockPlayer {
    log: Arc<PlayerLog>,
}

impl Player for MockPlayer {
    fn attach(&mut self, _target: Arc<dyn RenderTarget>) -> Result<()> {
        self.log.step("attach")
    }

    fn set_media(&mut self, _media: &MediaSource) -> Result<()> {
        self.log.step("set_media")
    }

    fn play(&mut self) -> Result<()> {
        self.log.plays.fetch_add(1, Ordering::SeqCst);
        self.log.step("play")
    }

    fn stop(&mut self) -> Result<()> {
        self.log.step("stop")
    }

    fn detach(&mut self) -> Result<()> {
        self.log.step("detach")
    }

    fn release(self: Box<Self>) -> Result<()> {
        self.log.step("release")
    }
}

/// Shared record of one mock muxer.
pub struct MuxerLog {
    pub path: PathBuf,
    calls: Mutex<Vec<&'static str>>,
    fail_write: bool,
}

impl MuxerLog {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

struct MockMuxer {
    log: Arc<MuxerLog>,
    started: bool,
}

impl Muxer for MockMuxer {
    fn add_track(&mut self, _format: &MediaFormat) -> Result<usize> {
        self.log.calls.lock().push("add_track");
        Ok(0)
    }

    fn start(&mut self) -> Result<()> {
        self.log.calls.lock().push("start");
        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, _track: usize, _data: &[u8], _info: &SampleInfo) -> Result<()> {
        self.log.calls.lock().push("write");
        if self.log.fail_write {
            return Err(Error::engine("disk full"));
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.log.calls.lock().push("finalize");
        if !self.started {
            return Err(Error::engine("finalize on a muxer that never started"));
        }
        Ok(())
    }

    fn release(self: Box<Self>) -> Result<()> {
        self.log.calls.lock().push("release");
        Ok(())
    }
}

/// Parks a native call until the test lets it continue.
pub struct Pause {
    entered: Barrier,
    resume: Barrier,
}

impl Pause {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Barrier::new(2),
            resume: Barrier::new(2),
        })
    }

    /// Called from the parked code path.
    fn hold(&self) {
        self.entered.wait();
        self.resume.wait();
    }

    /// Block until the parked call has been reached.
    pub fn wait_entered(&self) {
        self.entered.wait();
    }

    pub fn resume(&self) {
        self.resume.wait();
    }
}

/// What the engine does when asked to probe a URL.
#[derive(Debug, Clone)]
pub enum ProbeBehavior {
    Parse(String),
    Fail(String),
    /// Never report anything.
    Silent,
}

struct MockProbe {
    _events: ProbeEventSender,
    releases: Arc<AtomicU32>,
}

impl ProbeHandle for MockProbe {
    fn release(self: Box<Self>) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct PlayerFaults {
    fail_on: Vec<&'static str>,
    panic_on: Vec<&'static str>,
}

pub struct MockEngine {
    players: Mutex<Vec<Arc<PlayerLog>>>,
    muxers: Mutex<Vec<Arc<MuxerLog>>>,
    next_player_faults: Mutex<PlayerFaults>,
    fail_muxer_writes: AtomicBool,
    probe_behavior: Mutex<ProbeBehavior>,
    probe_releases: Arc<AtomicU32>,
    releases: AtomicU32,
    pause_next_muxer: Mutex<Option<Arc<Pause>>>,
    created_after_release: AtomicU32,
    live_at_release: AtomicU32,
}

impl MockEngine {
    fn new() -> Self {
        Self {
            players: Mutex::new(Vec::new()),
            muxers: Mutex::new(Vec::new()),
            next_player_faults: Mutex::new(PlayerFaults::default()),
            fail_muxer_writes: AtomicBool::new(false),
            probe_behavior: Mutex::new(ProbeBehavior::Parse("stream parsed".to_string())),
            probe_releases: Arc::new(AtomicU32::new(0)),
            releases: AtomicU32::new(0),
            pause_next_muxer: Mutex::new(None),
            created_after_release: AtomicU32::new(0),
            live_at_release: AtomicU32::new(0),
        }
    }

    pub fn player(&self, index: usize) -> Arc<PlayerLog> {
        Arc::clone(&self.players.lock()[index])
    }

    pub fn last_player(&self) -> Arc<PlayerLog> {
        let players = self.players.lock();
        Arc::clone(players.last().expect("no player created"))
    }

    pub fn player_count(&self) -> usize {
        self.players.lock().len()
    }

    pub fn muxer(&self, index: usize) -> Arc<MuxerLog> {
        Arc::clone(&self.muxers.lock()[index])
    }

    /// Make the next created player fail (or panic) on the given steps.
    pub fn fault_next_player(&self, fail_on: &[&'static str], panic_on: &[&'static str]) {
        *self.next_player_faults.lock() = PlayerFaults {
            fail_on: fail_on.to_vec(),
            panic_on: panic_on.to_vec(),
        };
    }

    pub fn fail_muxer_writes(&self) {
        self.fail_muxer_writes.store(true, Ordering::SeqCst);
    }

    pub fn set_probe_behavior(&self, behavior: ProbeBehavior) {
        *self.probe_behavior.lock() = behavior;
    }

    pub fn probe_releases(&self) -> u32 {
        self.probe_releases.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u32 {
        self.releases.load(Ordering::SeqCst)
    }

    /// Park the next `create_muxer` call on `pause`.
    pub fn pause_next_muxer(&self, pause: Arc<Pause>) {
        *self.pause_next_muxer.lock() = Some(pause);
    }

    /// Players and muxers created after the engine was released.
    pub fn created_after_release(&self) -> u32 {
        self.created_after_release.load(Ordering::SeqCst)
    }

    /// Players and muxers still unreleased when the engine was released.
    pub fn live_at_release(&self) -> u32 {
        self.live_at_release.load(Ordering::SeqCst)
    }

    fn note_created(&self) {
        if self.releases() > 0 {
            self.created_after_release.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn count_live(&self) -> u32 {
        let players = self
            .players
            .lock()
            .iter()
            .filter(|log| !log.released())
            .count();
        let muxers = self
            .muxers
            .lock()
            .iter()
            .filter(|log| !log.calls().contains(&"release"))
            .count();
        (players + muxers) as u32
    }
}

impl DecodingEngine for MockEngine {
    fn version(&self) -> Option<String> {
        Some("mock 0.1".to_string())
    }

    fn create_player(&self, events: PlayerEventSender) -> Result<Box<dyn Player>> {
        let faults = std::mem::take(&mut *self.next_player_faults.lock());
        let log = Arc::new(PlayerLog {
            events,
            calls: Mutex::new(Vec::new()),
            plays: AtomicU32::new(0),
            fail_on: faults.fail_on,
            panic_on: faults.panic_on,
        });
        self.players.lock().push(Arc::clone(&log));
        self.note_created();
        Ok(Box::new(MockPlayer { log }))
    }

    fn create_muxer(&self, output: &Path, _format: ContainerFormat) -> Result<Box<dyn Muxer>> {
        let pause = self.pause_next_muxer.lock().take();
        if let Some(pause) = pause {
            pause.hold();
        }

        let log = Arc::new(MuxerLog {
            path: output.to_path_buf(),
            calls: Mutex::new(Vec::new()),
            fail_write: self.fail_muxer_writes.load(Ordering::SeqCst),
        });
        self.muxers.lock().push(Arc::clone(&log));
        self.note_created();
        Ok(Box::new(MockMuxer {
            log,
            started: false,
        }))
    }

    fn start_probe(
        &self,
        _media: &MediaSource,
        events: ProbeEventSender,
    ) -> Result<Box<dyn ProbeHandle>> {
        match self.probe_behavior.lock().clone() {
            ProbeBehavior::Parse(message) => {
                let _ = events.send(ProbeEvent::Parsed(message));
            }
            ProbeBehavior::Fail(message) => {
                let _ = events.send(ProbeEvent::Failed(message));
            }
            ProbeBehavior::Silent => {}
        }
        Ok(Box::new(MockProbe {
            _events: events,
            releases: Arc::clone(&self.probe_releases),
        }))
    }

    fn release(&self) -> Result<()> {
        self.live_at_release
            .fetch_add(self.count_live(), Ordering::SeqCst);
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out one shared [`MockEngine`].
pub struct MockFactory {
    pub engine: Arc<MockEngine>,
    builds: AtomicU32,
    failures_left: AtomicU32,
    delay: Duration,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            engine: Arc::new(MockEngine::new()),
            builds: AtomicU32::new(0),
            failures_left: AtomicU32::new(0),
            delay,
        })
    }

    /// Fail the next `n` builds.
    pub fn fail_builds(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn builds(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineFactory for MockFactory {
    async fn build(&self, _options: &EngineOptions) -> Result<Arc<dyn DecodingEngine>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::engine("no codecs available"));
        }
        Ok(self.engine.clone())
    }
}

/// Render target whose attachment the test controls.
pub struct TestSurface {
    id: String,
    attached: AtomicBool,
}

impl TestSurface {
    pub fn attached(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            attached: AtomicBool::new(true),
        })
    }

    pub fn detached(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            attached: AtomicBool::new(false),
        })
    }
}

impl RenderTarget for TestSurface {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }
}

/// Attached render target that parks its `nth` attachment check.
pub struct GatedSurface {
    checks: AtomicU32,
    nth: u32,
    pause: Arc<Pause>,
}

impl GatedSurface {
    pub fn new(nth: u32, pause: Arc<Pause>) -> Arc<Self> {
        Arc::new(Self {
            checks: AtomicU32::new(0),
            nth,
            pause,
        })
    }
}

impl RenderTarget for GatedSurface {
    fn id(&self) -> &str {
        "gated-view"
    }

    fn is_attached(&self) -> bool {
        if self.checks.fetch_add(1, Ordering::SeqCst) + 1 == self.nth {
            self.pause.hold();
        }
        true
    }
}

pub fn camera(id: &str) -> Arc<CameraDevice> {
    Arc::new(
        CameraDevice::new(id, format!("Camera {id}"), format!("rtsp://10.0.0.2/{id}"))
            .with_credentials("admin", "secret"),
    )
}

/// Config with a fast, fixed reconnect delay.
pub fn test_config(reconnect_delay: Duration) -> SessionManagerConfig {
    SessionManagerConfig {
        engine_init_timeout_ms: 2000,
        reconnect: ReconnectPolicy::fixed(3, reconnect_delay),
        ..Default::default()
    }
}

pub fn manager(factory: &Arc<MockFactory>) -> Arc<StreamSessionManager> {
    Arc::new(StreamSessionManager::new(
        factory.clone(),
        test_config(Duration::from_millis(10)),
    ))
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Receive events until one matches `pred`, panicking after two seconds.
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<SessionEvent>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("timed out waiting for event")
}

/// Everything currently queued on `rx`.
pub fn drain_events(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
