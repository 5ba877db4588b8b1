//! File record types and status definitions.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Maximum number of characters kept in `files.error_message`.
pub const ERROR_MESSAGE_MAX_CHARS: usize = 1024;

/// Processing status of a file record.
///
/// Stored as the integer column `is_processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Discovered, waiting to be downloaded.
    Pending,
    /// Downloaded and finalized locally. Terminal.
    Downloaded,
    /// Download failed permanently; needs an operator reset.
    Failed,
}

impl FileStatus {
    /// Returns the database integer representation.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Downloaded => 1,
            Self::Failed => 2,
        }
    }

    /// Parses the database integer representation.
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Pending),
            1 => Some(Self::Downloaded),
            2 => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns the lowercase label used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloaded => "downloaded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "downloaded" => Ok(Self::Downloaded),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid file status: {s}")),
        }
    }
}

/// A file entry reported by the remote listing, normalized and ready to be
/// recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Normalized full remote path (upsert key).
    pub path: String,
    /// Final path segment.
    pub name: String,
    /// Size in bytes as reported by the listing.
    pub size: u64,
    /// Remote fingerprint.
    pub signature: String,
}

/// One row of the `files` ledger.
#[derive(Debug, Clone, FromRow)]
pub struct FileRecord {
    /// Unique identifier.
    pub id: i64,
    /// Display name (final path segment).
    pub name: String,
    /// Full remote path.
    pub path: String,
    /// Size in bytes as stored (see [`FileRecord::size_bytes`]).
    pub size: i64,
    /// Remote fingerprint.
    #[sqlx(rename = "sign")]
    pub signature: String,
    /// Status code (parsed via [`FileRecord::status`]).
    #[sqlx(rename = "is_processed")]
    pub status_code: i64,
    /// Last error text; empty unless failed or retrying.
    pub error_message: String,
    /// Download passes that ended in a transient failure.
    pub retry_count: i64,
    /// Token of the downloader currently holding the record.
    pub lease_token: Option<String>,
    /// When the current lease lapses.
    pub lease_expires_at: Option<String>,
    /// Local file reserved for this record, once the engine picked one.
    pub local_path: Option<String>,
    /// When the record was first discovered.
    pub created_at: String,
    /// When the record last changed.
    pub updated_at: String,
}

impl FileRecord {
    /// Returns the parsed status.
    ///
    /// Falls back to `Pending` for codes the schema would reject anyway.
    #[must_use]
    pub fn status(&self) -> FileStatus {
        FileStatus::from_code(self.status_code).unwrap_or(FileStatus::Pending)
    }

    /// Returns the size as an unsigned byte count.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        u64::try_from(self.size).unwrap_or(0)
    }
}

impl fmt::Display for FileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FileRecord {{ id: {}, path: {}, status: {} }}",
            self.id,
            self.path,
            self.status()
        )
    }
}

/// Result of recording one discovered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// First sighting; a pending row was created.
    Inserted,
    /// Same path and signature already on record.
    Unchanged,
    /// Signature changed; size/signature refreshed and the row is pending again.
    Refreshed,
    /// Signature changed but the policy (or a terminal status) keeps the row as is.
    ChangeIgnored,
    /// Signature changed while a downloader holds the row; retried next crawl.
    Leased,
}

/// Truncates an error message to [`ERROR_MESSAGE_MAX_CHARS`] characters.
#[must_use]
pub fn truncate_error_message(message: &str) -> String {
    match message.char_indices().nth(ERROR_MESSAGE_MAX_CHARS) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}
