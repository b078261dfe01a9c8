//! Stream session manager for network video recorder clients.
//!
//! Live playback and recording sessions against remote camera streams,
//! multiplexed over one shared decoding engine. The engine itself sits
//! behind the traits in [`engine`].

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod probe;
pub mod registry;
pub mod session;
pub mod teardown;
pub mod utils;

pub use config::SessionManagerConfig;
pub use device::CameraDevice;
pub use engine::{EngineHandle, EngineState};
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use manager::StreamSessionManager;
pub use probe::{ConnectionProbe, ProbeOutcome};
pub use session::{ReconnectPolicy, StreamHandle, StreamInfo, StreamState};
