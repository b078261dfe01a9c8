//! Stream session state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::PlayerEvent;

/// Playback state of a stream session, mirroring what the engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Opening,
    Buffering,
    Playing,
    Paused,
    /// Terminal.
    Stopped,
    Error,
    Ended,
}

impl StreamState {
    /// The state a player event moves the session into.
    pub fn from_event(event: &PlayerEvent) -> Self {
        match event {
            PlayerEvent::Opening => Self::Opening,
            PlayerEvent::Buffering(_) => Self::Buffering,
            PlayerEvent::Playing => Self::Playing,
            PlayerEvent::Paused => Self::Paused,
            PlayerEvent::Stopped => Self::Stopped,
            PlayerEvent::EndReached => Self::Ended,
            PlayerEvent::EncounteredError(_) => Self::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Buffering => "buffering",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_mapping() {
        assert_eq!(
            StreamState::from_event(&PlayerEvent::Buffering(40.0)),
            StreamState::Buffering
        );
        assert_eq!(
            StreamState::from_event(&PlayerEvent::EndReached),
            StreamState::Ended
        );
        assert_eq!(
            StreamState::from_event(&PlayerEvent::EncounteredError("x".into())),
            StreamState::Error
        );
    }

    #[test]
    fn test_only_stopped_is_terminal() {
        assert!(StreamState::Stopped.is_terminal());
        assert!(!StreamState::Error.is_terminal());
        assert!(!StreamState::Ended.is_terminal());
    }
}
