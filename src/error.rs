//! Error types for the tracker, storage, backends and the walker.

use crate::tree::url::Url;
use thiserror::Error;

/// Errors raised by the persisted tree index.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage engine error: {0}")]
    Engine(#[from] sled::Error),

    #[error("Failed to encode record: {0}")]
    Encode(String),

    #[error("Failed to decode record at {key}: {message}")]
    Decode { key: String, message: String },

    #[error("Write attempted in a query transaction")]
    ReadOnly,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors raised by a file-system backend.
///
/// `NotFound` is kept apart from `Io` so callers can tell "observed absent"
/// from "could not observe".
#[derive(Debug, Error)]
pub enum FsError {
    #[error("Not found: {0}")]
    NotFound(Url),

    #[error("Not a directory: {0}")]
    NotADirectory(Url),

    #[error("I/O error at {url}: {source}")]
    Io {
        url: Url,
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    /// Classify an I/O error at `url`.
    pub fn io(url: &Url, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            FsError::NotFound(url.clone())
        } else {
            FsError::Io {
                url: url.clone(),
                source,
            }
        }
    }

    /// The path the failure refers to.
    pub fn url(&self) -> &Url {
        match self {
            FsError::NotFound(url) | FsError::NotADirectory(url) => url,
            FsError::Io { url, .. } => url,
        }
    }
}

/// Errors raised by hint ingestion and attached-data operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{0} must be indexed first")]
    NotIndexed(Url),

    #[error("Attached data {key:?} already exists on {url}")]
    AttachmentExists { url: Url, key: String },

    #[error("Record for {0} does not match the indexed version")]
    StaleRecord(Url),

    #[error("Tracker service has stopped")]
    ServiceStopped,
}

impl TrackerError {
    /// Contract violations are programmer errors, never retried.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            TrackerError::NotIndexed(_)
                | TrackerError::AttachmentExists { .. }
                | TrackerError::StaleRecord(_)
        )
    }
}

/// Errors raised by the walker thread's control surface.
#[derive(Debug, Error)]
pub enum WalkerError {
    #[error("Timed out waiting for a fresh lap after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Walker has been shut down")]
    Stopped,
}

/// Top-level error for the CLI and configuration layer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    StorageError(#[from] StorageError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Walker(#[from] WalkerError),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
