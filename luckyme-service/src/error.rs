use std::path::PathBuf;

use thiserror::Error;

use luckyme_core::ClientError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// YAML parse error on load, with the offending path.
    #[error("failed to parse config at {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("service is already running")]
    AlreadyRunning,

    #[error("background task failed: {0}")]
    Task(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ServiceError {
    ServiceError::Io {
        path: path.into(),
        source,
    }
}
