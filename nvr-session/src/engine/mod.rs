//! Decoding engine abstraction.
//!
//! The engine itself (demuxing, decoding, muxing, transport) is an external
//! collaborator. This module defines the seams the session manager drives it
//! through and owns the single shared engine instance.

mod handle;
mod options;
mod traits;

pub use handle::{EngineHandle, EngineState};
pub use options::{EngineOptions, StreamOptions};
pub use traits::{
    ContainerFormat, DecodingEngine, EngineFactory, MediaFormat, MediaSource, Muxer, Player,
    PlayerEvent, PlayerEventReceiver, PlayerEventSender, ProbeEvent, ProbeEventReceiver,
    ProbeEventSender, ProbeHandle, RenderTarget, SampleInfo,
};
