//! Error types for the local config store.

use std::io;
use std::path::PathBuf;

use micro_lock::LockError;
use thiserror::Error;

use crate::tree::ParseError;

/// Result alias used throughout the store.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the local config store.
///
/// Only mutating operations (`set`, `delete`, `lock`) hand these back to
/// callers. Everything seen during construction or reads is recorded as a
/// diagnostic instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot determine home directory")]
    HomeResolution,

    #[error("cannot acquire lock {}: {source}", path.display())]
    LockAcquisition {
        path: PathBuf,
        #[source]
        source: LockError,
    },

    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("cannot serialize config: {0}")]
    Serialization(String),

    #[error("I/O error on {}: {source}", path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config path: {0}")]
    InvalidPath(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn lock(path: impl Into<PathBuf>, source: LockError) -> Self {
        Self::LockAcquisition {
            path: path.into(),
            source,
        }
    }
}
