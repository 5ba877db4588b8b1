//! Error types for the download module.
//!
//! Variants carry the URL or path involved so a single log line (and the
//! stored `error_message`) is enough to diagnose a failed record.

use std::path::PathBuf;

use thiserror::Error;

use crate::remote::RemoteError;
use crate::retry::FailureType;

/// Errors that can occur while transferring one file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The download host could not be reached or answered with an error.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// File system error while writing or finalizing.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Byte count does not match the size recorded by the listing.
    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// Staging file that failed verification.
        path: PathBuf,
        /// Size from the listing.
        expected_bytes: u64,
        /// Bytes actually on disk.
        actual_bytes: u64,
    },

    /// The remote path cannot be mapped to a local file.
    #[error("cannot map remote path {remote_path} to a local file: {reason}")]
    InvalidTarget {
        /// The offending remote path.
        remote_path: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl DownloadError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates an invalid target error.
    pub fn invalid_target(remote_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            remote_path: remote_path.into(),
            reason: reason.into(),
        }
    }

    /// Classifies this error for retry decisions.
    ///
    /// A full disk is transient (space may be freed); other local IO errors
    /// and integrity mismatches are permanent.
    #[must_use]
    pub fn failure_type(&self) -> FailureType {
        match self {
            Self::Remote(remote) => remote.failure_type(),
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::StorageFull => {
                FailureType::Transient
            }
            Self::Io { .. } | Self::Integrity { .. } | Self::InvalidTarget { .. } => {
                FailureType::Permanent
            }
        }
    }

    /// Returns the raw Retry-After header, if the server sent one.
    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        match self {
            Self::Remote(remote) => remote.retry_after(),
            _ => None,
        }
    }
}
