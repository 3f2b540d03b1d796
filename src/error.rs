//! Error types shared by the access layer and the domain collectors.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to read a pseudo-file.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The path does not exist. Optional files report this and callers skip them.
    #[error("{} is unavailable", path.display())]
    Unavailable { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl AccessError {
    pub(crate) fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            AccessError::Unavailable { path }
        } else {
            AccessError::Io { path, source }
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, AccessError::Unavailable { .. })
    }
}

/// A collector could not produce its headline metric for this cycle.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("malformed {file}: {reason}")]
    Malformed { file: &'static str, reason: String },

    #[error("{command} failed: {source}")]
    Command {
        command: &'static str,
        #[source]
        source: io::Error,
    },
}

impl CollectError {
    pub(crate) fn malformed(file: &'static str, reason: impl Into<String>) -> Self {
        CollectError::Malformed {
            file,
            reason: reason.into(),
        }
    }
}
