//! Error types for record store operations.

use std::fmt;

use thiserror::Error;

/// Structured classification for store/database failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreDbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Expected row was not found.
    RowNotFound,
    /// Filesystem or transport IO failure.
    Io,
    /// SQL protocol/driver error.
    Protocol,
    /// Unclassified database failure.
    Other,
}

impl StoreDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Protocol(_) => Self::Protocol,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for StoreDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::RowNotFound => "row_not_found",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> StoreDbErrorKind {
    let code = database_error.code();
    if matches!(
        code.as_deref(),
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
    ) {
        return StoreDbErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return StoreDbErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked") || message.contains("database is busy") {
        return StoreDbErrorKind::BusyOrLocked;
    }

    StoreDbErrorKind::Other
}

/// Errors that can occur during record store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error ({kind}): {message}")]
    Database {
        /// Typed classification of the failure.
        kind: StoreDbErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// No record exists with the given id.
    #[error("file record not found: id {0}")]
    RecordNotFound(i64),

    /// The record is no longer pending under the caller's lease.
    ///
    /// Another downloader claimed it after the lease lapsed, or it already
    /// reached a terminal status.
    #[error("lease lost for file record {0}")]
    LeaseLost(i64),

    /// A discovered file could not be recorded as given.
    #[error("invalid file record for {path}: {reason}")]
    InvalidRecord {
        /// Remote path of the rejected file.
        path: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: StoreDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl StoreError {
    /// Creates an `InvalidRecord` error.
    pub fn invalid_record(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns the typed database error kind, when this is a database error.
    #[must_use]
    pub fn database_kind(&self) -> Option<StoreDbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            Self::RecordNotFound(_) | Self::LeaseLost(_) | Self::InvalidRecord { .. } => None,
        }
    }

    /// Returns true when this error is a database busy/locked condition.
    #[must_use]
    pub fn is_busy_or_locked(&self) -> bool {
        self.database_kind() == Some(StoreDbErrorKind::BusyOrLocked)
    }
}
