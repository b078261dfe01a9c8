//! Engine traits and the data that crosses them.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::options::{EngineOptions, StreamOptions};
use crate::Result;

/// Events a player reports about its own state.
///
/// Delivered from whatever thread the engine uses; senders never block.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Connection to the source is being opened.
    Opening,
    /// Buffering, with fill percentage.
    Buffering(f32),
    /// Frames are being rendered.
    Playing,
    /// Playback paused.
    Paused,
    /// Playback stopped by the engine.
    Stopped,
    /// The server closed the stream.
    EndReached,
    /// Decode or network failure.
    EncounteredError(String),
}

pub type PlayerEventSender = mpsc::UnboundedSender<PlayerEvent>;
pub type PlayerEventReceiver = mpsc::UnboundedReceiver<PlayerEvent>;

/// Outcome of a network-level parse started by [`DecodingEngine::start_probe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    Parsed(String),
    Failed(String),
}

pub type ProbeEventSender = mpsc::UnboundedSender<ProbeEvent>;
pub type ProbeEventReceiver = mpsc::UnboundedReceiver<ProbeEvent>;

/// A stream to open, with the transport option set to open it with.
#[derive(Debug, Clone)]
pub struct MediaSource {
    pub url: String,
    pub options: StreamOptions,
}

impl MediaSource {
    pub fn new(url: impl Into<String>, options: StreamOptions) -> Self {
        Self {
            url: url.into(),
            options,
        }
    }
}

/// Output container of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    #[default]
    Mp4,
}

/// Media format negotiated by the decoder, known only once samples flow.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaFormat {
    /// MIME type, e.g. `video/avc`.
    pub mime: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f32>,
    /// Codec specific data (SPS/PPS and friends).
    #[serde(default)]
    pub codec_specific_data: Vec<Vec<u8>>,
}

impl MediaFormat {
    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            mime: mime.into(),
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }
}

/// Per-sample metadata passed along with an encoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleInfo {
    pub presentation_time_us: i64,
    pub key_frame: bool,
    pub end_of_stream: bool,
}

/// Surface the decoded frames are drawn into.
///
/// Owned by the UI. Attach/detach calls on it may carry a thread affinity
/// imposed by the rendering toolkit.
pub trait RenderTarget: Send + Sync {
    fn id(&self) -> &str;

    /// Whether the surface is attached to a live window/output right now.
    fn is_attached(&self) -> bool;
}

/// One playback pipeline inside the engine.
pub trait Player: Send {
    /// Bind the player to a render target.
    fn attach(&mut self, target: Arc<dyn RenderTarget>) -> Result<()>;

    fn set_media(&mut self, media: &MediaSource) -> Result<()>;

    fn play(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn detach(&mut self) -> Result<()>;

    /// Free native resources. Consumes the player so it can only happen once.
    fn release(self: Box<Self>) -> Result<()>;
}

/// Container writer.
pub trait Muxer: Send {
    /// Register a track for `format`, returning its index.
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize>;

    fn start(&mut self) -> Result<()>;

    fn write_sample(&mut self, track: usize, data: &[u8], info: &SampleInfo) -> Result<()>;

    /// Finish the container. Only valid after a successful `start`.
    fn finalize(&mut self) -> Result<()>;

    fn release(self: Box<Self>) -> Result<()>;
}

/// Disposable handle of an in-flight connection probe.
pub trait ProbeHandle: Send {
    fn release(self: Box<Self>) -> Result<()>;
}

/// A constructed engine instance.
pub trait DecodingEngine: Send + Sync {
    /// Engine version string, if the engine reports one.
    fn version(&self) -> Option<String>;

    /// Create a player that reports into `events`.
    fn create_player(&self, events: PlayerEventSender) -> Result<Box<dyn Player>>;

    fn create_muxer(&self, output: &Path, format: ContainerFormat) -> Result<Box<dyn Muxer>>;

    /// Start a network-level parse of `media` without any render target.
    fn start_probe(&self, media: &MediaSource, events: ProbeEventSender)
    -> Result<Box<dyn ProbeHandle>>;

    /// Native teardown of the whole engine.
    fn release(&self) -> Result<()>;
}

/// Builds engine instances.
///
/// Construction is expensive and environment dependent (native libraries,
/// codecs). It is never run concurrently by [`super::EngineHandle`].
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn build(&self, options: &EngineOptions) -> Result<Arc<dyn DecodingEngine>>;
}
