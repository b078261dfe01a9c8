//! Session manager error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
///
/// Native engine failures never cross the manager boundary as-is; they are
/// folded into one of these variants (or into a state transition).
#[derive(Error, Debug)]
pub enum Error {
    #[error("Decoding engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Render target {0} is not attached to a live output")]
    NotAttached(String),

    #[error("Stream error (recoverable): {0}")]
    TransientStream(String),

    #[error("Stream error (retries exhausted): {0}")]
    TerminalStream(String),

    #[error("Recording IO error while {op} {}: {source}", path.display())]
    RecordingIo {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session manager is shutting down")]
    ShuttingDown,

    #[error("Invalid stream URL: {0}")]
    InvalidUrl(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    pub fn engine_unavailable(msg: impl Into<String>) -> Self {
        Self::EngineUnavailable(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_url(msg: impl Into<String>) -> Self {
        Self::InvalidUrl(msg.into())
    }

    /// Wrap an IO error from the recording path with operation + path context.
    pub fn recording_io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::RecordingIo {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}
