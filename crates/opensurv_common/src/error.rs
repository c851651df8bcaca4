//! Error types for the update core.

use crate::version::VersionParseError;
use std::path::PathBuf;
use thiserror::Error;

pub type UpdateResult<T> = std::result::Result<T, UpdateError>;

#[derive(Error, Debug)]
pub enum UpdateError {
    /// Release API or archive download failed (transport, timeout, non-2xx)
    #[error("Network error: {0}")]
    Network(String),

    /// Downloaded archive is corrupt, unreadable or unsafe
    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Version parse error: {0}")]
    VersionParse(#[from] VersionParseError),

    /// Another update sequence already holds the guard
    #[error("An update is already in progress")]
    Busy,

    /// Launcher could not be started
    #[error("Handoff error: {0}")]
    Handoff(String),

    /// Pending-update marker missing or unreadable
    #[error("Marker error: {0}")]
    Marker(String),
}

impl UpdateError {
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable kind, used in HTTP error bodies and the marker
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateError::Network(_) => "network",
            UpdateError::Archive(_) => "archive",
            UpdateError::Filesystem { .. } => "filesystem",
            UpdateError::VersionParse(_) => "version_parse",
            UpdateError::Busy => "busy",
            UpdateError::Handoff(_) => "handoff",
            UpdateError::Marker(_) => "marker",
        }
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(e: reqwest::Error) -> Self {
        UpdateError::Network(e.to_string())
    }
}

impl From<zip::result::ZipError> for UpdateError {
    fn from(e: zip::result::ZipError) -> Self {
        UpdateError::Archive(e.to_string())
    }
}
