//! Stream and recording sessions.

mod reconnect;
mod recording;
mod state;
mod stream;

pub use reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectTrigger};
pub use recording::{RecordingSession, RecordingSummary};
pub use state::StreamState;
pub use stream::{StreamHandle, StreamInfo, StreamSession};
