//! Notifications emitted by the session manager.

use std::path::PathBuf;

use serde::Serialize;

use crate::session::StreamState;

/// Events emitted by the Stream Session Manager.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A stream session was registered and its player started.
    StreamStarted {
        camera_id: String,
        session_id: String,
    },
    /// The engine reported a new playback state.
    StateChanged {
        camera_id: String,
        session_id: String,
        state: StreamState,
    },
    /// A reconnect is scheduled.
    Reconnecting {
        camera_id: String,
        session_id: String,
        attempt: u32,
        max_retries: u32,
        delay_ms: u64,
    },
    /// Terminal: the reconnect budget is used up and the session stopped.
    ReconnectsExhausted {
        camera_id: String,
        session_id: String,
        message: String,
    },
    /// The stream ended before it ever played; no reconnect.
    StreamEnded {
        camera_id: String,
        session_id: String,
    },
    /// The session was stopped and its resources released.
    StreamStopped {
        camera_id: String,
        session_id: String,
    },
    RecordingStarted {
        camera_id: String,
        path: PathBuf,
    },
    /// An active recording was stopped to make room for a new one.
    RecordingSuperseded {
        previous_camera_id: String,
        camera_id: String,
    },
    RecordingStopped {
        camera_id: String,
        path: PathBuf,
        /// Whether the container was finalized (false when no sample arrived).
        finalized: bool,
    },
    /// The recording stopped itself after a write failure.
    RecordingFailed {
        camera_id: String,
        path: PathBuf,
        error: String,
    },
}

impl SessionEvent {
    /// Camera the event is about.
    pub fn camera_id(&self) -> &str {
        match self {
            Self::StreamStarted { camera_id, .. }
            | Self::StateChanged { camera_id, .. }
            | Self::Reconnecting { camera_id, .. }
            | Self::ReconnectsExhausted { camera_id, .. }
            | Self::StreamEnded { camera_id, .. }
            | Self::StreamStopped { camera_id, .. }
            | Self::RecordingStarted { camera_id, .. }
            | Self::RecordingSuperseded { camera_id, .. }
            | Self::RecordingStopped { camera_id, .. }
            | Self::RecordingFailed { camera_id, .. } => camera_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_tag() {
        let event = SessionEvent::Reconnecting {
            camera_id: "cam-1".into(),
            session_id: "s".into(),
            attempt: 2,
            max_retries: 3,
            delay_ms: 2000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reconnecting");
        assert_eq!(json["attempt"], 2);
        assert_eq!(event.camera_id(), "cam-1");
    }
}
