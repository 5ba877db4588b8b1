//! Record store: the durable `files` ledger shared by both loops.
//!
//! The crawler creates rows, the download engine claims and retires them.
//! Neither loop talks to the other; every hand-off goes through this table.
//!
//! # Overview
//!
//! - [`RecordStore`] - `SQLite`-backed ledger operations
//! - [`FileRecord`] - one row per remote file
//! - [`FileStatus`] - `Pending` → `Downloaded` | `Failed`
//! - [`RecordRepository`] - seam used by the download engine
//!
//! Claims are leases: [`RecordStore::claim_pending_batch`] stamps a token
//! and expiry on up to `n` pending rows in one statement, and every status
//! write is conditional on that token. Status never changes on claim, so a
//! crashed downloader only delays its rows until the lease lapses.
//!
//! # Example
//!
//! ```ignore
//! use harvester_core::store::RecordStore;
//! use harvester_core::Database;
//! use std::time::Duration;
//!
//! let store = RecordStore::new(Database::new_in_memory().await?);
//! let batch = store.claim_pending_batch(10, Duration::from_secs(900)).await?;
//! for record in &batch {
//!     // ... download ...
//!     store.mark_downloaded(record.id, record.lease_token.as_deref().unwrap_or("")).await?;
//! }
//! ```

mod error;
mod record;
mod repository;

pub use error::{StoreDbErrorKind, StoreError};
pub use record::{
    DiscoveredFile, DiscoveryOutcome, ERROR_MESSAGE_MAX_CHARS, FileRecord, FileStatus,
    truncate_error_message,
};
pub use repository::RecordRepository;

use std::time::Duration;

use sqlx::Row;
use tracing::{debug, instrument};

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// What the crawler does when a known path reports a new signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureChangePolicy {
    /// Refresh size/signature and put non-terminal rows back to pending.
    #[default]
    Reset,
    /// Keep the existing row untouched.
    Ignore,
}

impl std::str::FromStr for SignatureChangePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reset" => Ok(Self::Reset),
            "ignore" => Ok(Self::Ignore),
            _ => Err(format!(
                "invalid signature change policy '{s}' (expected reset or ignore)"
            )),
        }
    }
}

/// Returns `Ok(())` if at least one row was affected; otherwise [`StoreError::LeaseLost`].
fn check_leased(id: i64, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::LeaseLost(id))
    } else {
        Ok(())
    }
}

/// SQLite datetime modifier for a lease of the given length.
fn lease_modifier(lease: Duration) -> String {
    format!("+{}.{:03} seconds", lease.as_secs(), lease.subsec_millis())
}

/// Creates a new random lease token.
fn new_lease_token() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Ledger of discovered files backed by `SQLite`.
#[derive(Debug, Clone)]
pub struct RecordStore {
    db: Database,
}

impl RecordStore {
    /// Creates a store over the given database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Records one file seen by the crawler.
    ///
    /// Unknown paths are inserted as pending. Known paths with the same
    /// signature are left alone. A changed signature is handled per `policy`;
    /// `Downloaded` rows and rows currently leased by a downloader are never
    /// modified. A reset drops the row's local path reservation, so whatever
    /// the old version left on disk is never taken for the new one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRecord`] for an empty path or a size that
    /// does not fit the column, and [`StoreError::Database`] if a query fails.
    #[instrument(skip(self, file), fields(path = %file.path))]
    pub async fn record_discovery(
        &self,
        file: &DiscoveredFile,
        policy: SignatureChangePolicy,
    ) -> Result<DiscoveryOutcome> {
        if file.path.is_empty() || file.name.is_empty() {
            return Err(StoreError::invalid_record(&file.path, "empty path or name"));
        }
        let size = i64::try_from(file.size)
            .map_err(|_| StoreError::invalid_record(&file.path, "size exceeds i64::MAX"))?;

        let Some(existing) = self.find_by_path(&file.path).await? else {
            let result = sqlx::query(
                r"INSERT INTO files (name, path, size, sign, is_processed)
                  VALUES (?, ?, ?, ?, ?)
                  ON CONFLICT(path) DO NOTHING",
            )
            .bind(&file.name)
            .bind(&file.path)
            .bind(size)
            .bind(&file.signature)
            .bind(FileStatus::Pending.code())
            .execute(self.db.pool())
            .await?;

            // Another crawler inserted the same path between our read and write.
            return Ok(if result.rows_affected() == 0 {
                DiscoveryOutcome::Unchanged
            } else {
                DiscoveryOutcome::Inserted
            });
        };

        if existing.signature == file.signature {
            return Ok(DiscoveryOutcome::Unchanged);
        }

        if policy == SignatureChangePolicy::Ignore || existing.status() == FileStatus::Downloaded
        {
            debug!(
                old = %existing.signature,
                new = %file.signature,
                status = %existing.status(),
                "signature changed, keeping record"
            );
            return Ok(DiscoveryOutcome::ChangeIgnored);
        }

        let result = sqlx::query(
            r"UPDATE files
              SET size = ?,
                  sign = ?,
                  is_processed = ?,
                  error_message = '',
                  retry_count = 0,
                  local_path = NULL,
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ?
                AND is_processed != ?
                AND (lease_token IS NULL
                     OR lease_expires_at < strftime('%Y-%m-%d %H:%M:%f', 'now'))",
        )
        .bind(size)
        .bind(&file.signature)
        .bind(FileStatus::Pending.code())
        .bind(existing.id)
        .bind(FileStatus::Downloaded.code())
        .execute(self.db.pool())
        .await?;

        Ok(if result.rows_affected() == 0 {
            DiscoveryOutcome::Leased
        } else {
            DiscoveryOutcome::Refreshed
        })
    }

    /// Looks up a record by its remote path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn find_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(r"SELECT * FROM files WHERE path = ?")
            .bind(path)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(record)
    }

    /// Gets a record by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(r"SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(record)
    }

    /// Atomically claims up to `limit` pending records, oldest first.
    ///
    /// Only rows without a live lease are eligible. Each claimed row gets the
    /// same fresh lease token, visible in [`FileRecord::lease_token`]. The
    /// returned records are ordered by creation time, then id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn claim_pending_batch(&self, limit: u32, lease: Duration) -> Result<Vec<FileRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let token = new_lease_token();
        let mut records = sqlx::query_as::<_, FileRecord>(
            r"UPDATE files
              SET lease_token = ?,
                  lease_expires_at = strftime('%Y-%m-%d %H:%M:%f', 'now', ?),
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id IN (
                  SELECT id FROM files
                  WHERE is_processed = ?
                    AND (lease_token IS NULL
                         OR lease_expires_at < strftime('%Y-%m-%d %H:%M:%f', 'now'))
                  ORDER BY created_at ASC, id ASC
                  LIMIT ?
              )
              RETURNING *",
        )
        .bind(&token)
        .bind(lease_modifier(lease))
        .bind(FileStatus::Pending.code())
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await?;

        // RETURNING order is unspecified.
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        debug!(claimed = records.len(), "claimed pending batch");
        Ok(records)
    }

    /// Extends the lease on a record the caller still holds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LeaseLost`] if the caller no longer holds the record.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, token))]
    pub async fn renew_lease(&self, id: i64, token: &str, lease: Duration) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE files
              SET lease_expires_at = strftime('%Y-%m-%d %H:%M:%f', 'now', ?)
              WHERE id = ? AND is_processed = ? AND lease_token = ?",
        )
        .bind(lease_modifier(lease))
        .bind(id)
        .bind(FileStatus::Pending.code())
        .bind(token)
        .execute(self.db.pool())
        .await?;

        check_leased(id, result.rows_affected())
    }

    /// Gives a claimed record back without changing its status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LeaseLost`] if the caller no longer holds the record.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, token))]
    pub async fn release_lease(&self, id: i64, token: &str) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE files
              SET lease_token = NULL,
                  lease_expires_at = NULL,
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ? AND lease_token = ?",
        )
        .bind(id)
        .bind(token)
        .execute(self.db.pool())
        .await?;

        check_leased(id, result.rows_affected())
    }

    /// Reserves `local_path` as the file a claimed record downloads into.
    ///
    /// # Returns
    ///
    /// `false` when another record already holds that path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LeaseLost`] if the record is no longer pending
    /// under `token`. Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, token))]
    pub async fn reserve_local_path(&self, id: i64, token: &str, local_path: &str) -> Result<bool> {
        let result = sqlx::query(
            r"UPDATE files
              SET local_path = ?,
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ? AND is_processed = ? AND lease_token = ?",
        )
        .bind(local_path)
        .bind(id)
        .bind(FileStatus::Pending.code())
        .bind(token)
        .execute(self.db.pool())
        .await;

        match result {
            Ok(done) => check_leased(id, done.rows_affected()).map(|()| true),
            Err(e) => {
                let error = StoreError::from(e);
                if error.database_kind() == Some(StoreDbErrorKind::ConstraintViolation) {
                    debug!("local path held by another record");
                    Ok(false)
                } else {
                    Err(error)
                }
            }
        }
    }

    /// Marks a claimed record as downloaded. Terminal.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LeaseLost`] if the record is no longer pending
    /// under `token`. Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, token))]
    pub async fn mark_downloaded(&self, id: i64, token: &str) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE files
              SET is_processed = ?,
                  error_message = '',
                  lease_token = NULL,
                  lease_expires_at = NULL,
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ? AND is_processed = ? AND lease_token = ?",
        )
        .bind(FileStatus::Downloaded.code())
        .bind(id)
        .bind(FileStatus::Pending.code())
        .bind(token)
        .execute(self.db.pool())
        .await?;

        check_leased(id, result.rows_affected())
    }

    /// Marks a claimed record as failed with a (truncated) error message.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LeaseLost`] if the record is no longer pending
    /// under `token`. Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, token), fields(error = %error))]
    pub async fn mark_failed(&self, id: i64, token: &str, error: &str) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE files
              SET is_processed = ?,
                  error_message = ?,
                  lease_token = NULL,
                  lease_expires_at = NULL,
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ? AND is_processed = ? AND lease_token = ?",
        )
        .bind(FileStatus::Failed.code())
        .bind(truncate_error_message(error))
        .bind(id)
        .bind(FileStatus::Pending.code())
        .bind(token)
        .execute(self.db.pool())
        .await?;

        check_leased(id, result.rows_affected())
    }

    /// Records a pass that ended in a transient failure and releases the lease.
    ///
    /// Increments `retry_count`; once it reaches `max_pass_retries` the
    /// record becomes `Failed`, otherwise it stays `Pending` for a later pass.
    ///
    /// # Returns
    ///
    /// The status the record ended up in.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LeaseLost`] if the record is no longer pending
    /// under `token`. Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, token), fields(error = %error))]
    pub async fn record_transient_failure(
        &self,
        id: i64,
        token: &str,
        error: &str,
        max_pass_retries: u32,
    ) -> Result<FileStatus> {
        let row = sqlx::query(
            r"UPDATE files
              SET retry_count = retry_count + 1,
                  error_message = ?,
                  is_processed = CASE WHEN retry_count + 1 >= ? THEN ? ELSE ? END,
                  lease_token = NULL,
                  lease_expires_at = NULL,
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ? AND is_processed = ? AND lease_token = ?
              RETURNING is_processed",
        )
        .bind(truncate_error_message(error))
        .bind(i64::from(max_pass_retries))
        .bind(FileStatus::Failed.code())
        .bind(FileStatus::Pending.code())
        .bind(id)
        .bind(FileStatus::Pending.code())
        .bind(token)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Err(StoreError::LeaseLost(id));
        };
        let code: i64 = row.get("is_processed");
        Ok(FileStatus::from_code(code).unwrap_or(FileStatus::Pending))
    }

    /// Returns every failed record to pending (operator reset).
    ///
    /// # Returns
    ///
    /// The number of records reset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn reset_failed(&self) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE files
              SET is_processed = ?,
                  error_message = '',
                  retry_count = 0,
                  lease_token = NULL,
                  lease_expires_at = NULL,
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE is_processed = ?",
        )
        .bind(FileStatus::Pending.code())
        .bind(FileStatus::Failed.code())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Counts records by status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_by_status(&self, status: FileStatus) -> Result<i64> {
        let result = sqlx::query(r"SELECT COUNT(*) as count FROM files WHERE is_processed = ?")
            .bind(status.code())
            .fetch_one(self.db.pool())
            .await?;

        Ok(result.get("count"))
    }

    /// Lists records with the given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_by_status(&self, status: FileStatus) -> Result<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(
            r"SELECT * FROM files
              WHERE is_processed = ?
              ORDER BY created_at ASC, id ASC",
        )
        .bind(status.code())
        .fetch_all(self.db.pool())
        .await?;

        Ok(records)
    }
}
