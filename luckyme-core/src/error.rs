//! Error types shared by every LuckyMe crate.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while talking to the dissemination daemon.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A session with this name is already live, either in this process or
    /// in the daemon.
    #[error("session '{name}' is already registered")]
    AlreadyRegistered { name: String },

    /// The daemon rejected the registration for any other reason.
    #[error("registration of session '{name}' failed: {reason}")]
    RegistrationFailed { name: String, reason: String },

    /// The daemon could not be started or did not become reachable in time.
    #[error("failed to spawn daemon: {0}")]
    DaemonSpawnFailed(String),

    /// The daemon is in a state we do not recover from automatically.
    #[error("daemon error: {0}")]
    Daemon(String),

    /// A data object could not be built; the publish cycle is skipped.
    #[error("could not construct data object: {reason}")]
    ObjectConstructionFailed { reason: String },

    /// Copying or removing a file during backup failed.
    #[error("backup of {path} failed: {source}")]
    BackupIoFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The session handle was disposed before this call.
    #[error("session '{name}' has been disposed")]
    Disposed { name: String },

    /// The event loop cannot start without at least one handler.
    #[error("no event handlers registered for session '{name}'")]
    NoEventHandlers { name: String },

    /// The event loop was started twice or used after it stopped.
    #[error("event loop error: {0}")]
    EventLoop(String),

    /// An event handler reported a failure.
    #[error("event handler failed: {0}")]
    Handler(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Convenience constructor for [`ClientError::Handler`].
    pub fn handler(message: impl Into<String>) -> Self {
        ClientError::Handler(message.into())
    }
}

/// Convenience constructor for [`ClientError::Io`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ClientError {
    ClientError::Io {
        path: path.into(),
        source,
    }
}
