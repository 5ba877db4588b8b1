//! Repository seam for the download engine's record operations.
//!
//! The engine depends on this trait rather than on [`RecordStore`] directly
//! so its state machine can be exercised against a failing or scripted store.

use std::time::Duration;

use async_trait::async_trait;

use super::{FileRecord, FileStatus, RecordStore, Result};

/// Data-access contract used by the download engine.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Atomically claims up to `limit` pending records, oldest first.
    async fn claim_pending_batch(&self, limit: u32, lease: Duration) -> Result<Vec<FileRecord>>;

    /// Extends the caller's lease on a record.
    async fn renew_lease(&self, id: i64, token: &str, lease: Duration) -> Result<()>;

    /// Releases the caller's lease without changing status.
    async fn release_lease(&self, id: i64, token: &str) -> Result<()>;

    /// Reserves a local path for a claimed record; `false` if another record holds it.
    async fn reserve_local_path(&self, id: i64, token: &str, local_path: &str) -> Result<bool>;

    /// Marks a claimed record downloaded.
    async fn mark_downloaded(&self, id: i64, token: &str) -> Result<()>;

    /// Marks a claimed record failed.
    async fn mark_failed(&self, id: i64, token: &str, error: &str) -> Result<()>;

    /// Records a transient failure; returns the resulting status.
    async fn record_transient_failure(
        &self,
        id: i64,
        token: &str,
        error: &str,
        max_pass_retries: u32,
    ) -> Result<FileStatus>;

    /// Returns the count of records in a status.
    async fn count_by_status(&self, status: FileStatus) -> Result<i64>;
}

#[async_trait]
impl RecordRepository for RecordStore {
    async fn claim_pending_batch(&self, limit: u32, lease: Duration) -> Result<Vec<FileRecord>> {
        RecordStore::claim_pending_batch(self, limit, lease).await
    }

    async fn renew_lease(&self, id: i64, token: &str, lease: Duration) -> Result<()> {
        RecordStore::renew_lease(self, id, token, lease).await
    }

    async fn release_lease(&self, id: i64, token: &str) -> Result<()> {
        RecordStore::release_lease(self, id, token).await
    }

    async fn reserve_local_path(&self, id: i64, token: &str, local_path: &str) -> Result<bool> {
        RecordStore::reserve_local_path(self, id, token, local_path).await
    }

    async fn mark_downloaded(&self, id: i64, token: &str) -> Result<()> {
        RecordStore::mark_downloaded(self, id, token).await
    }

    async fn mark_failed(&self, id: i64, token: &str, error: &str) -> Result<()> {
        RecordStore::mark_failed(self, id, token, error).await
    }

    async fn record_transient_failure(
        &self,
        id: i64,
        token: &str,
        error: &str,
        max_pass_retries: u32,
    ) -> Result<FileStatus> {
        RecordStore::record_transient_failure(self, id, token, error, max_pass_retries).await
    }

    async fn count_by_status(&self, status: FileStatus) -> Result<i64> {
        RecordStore::count_by_status(self, status).await
    }
}
