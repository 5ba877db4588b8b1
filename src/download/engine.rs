//! Download engine: claims pending records and retires them.
//!
//! The engine consumes the ledger as a durable work queue. Each pass claims
//! a batch of the oldest pending records under a lease, then handles them
//! one at a time in claim order:
//!
//! 1. reserve a local final path in the ledger (numbered if the mapped name
//!    is held by another record or already on disk) and pair it with a
//!    staging file tagged by the record's signature
//! 2. skip the transfer if this record's final file already has the recorded size
//! 3. defer (lease released, still pending) if the disk budget says no
//! 4. fetch into the staging file, resuming from its length, retrying
//!    transient errors with backoff while a heartbeat renews the lease
//! 5. verify the byte count, rename staging → final, mark downloaded
//! 6. optionally remove the remote source copy
//!
//! Per-record problems never abort a batch; they end up as an [`Outcome`]
//! and, for failures, in the record's `error_message`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, instrument, warn};

use super::error::DownloadError;
use super::target::{LocalTarget, MAX_NAME_SUFFIX, TargetLayout, numbered_path};
use super::transfer::{Fetcher, TransferResult};
use crate::budget::DiskBudgetGuard;
use crate::crawl::{normalize_path, split_parent};
use crate::remote::RemoteTree;
use crate::retry::{FailureType, RetryDecision, RetryPolicy, parse_retry_after};
use crate::store::{FileRecord, FileStatus, RecordRepository, StoreError};
use crate::supervisor::{Phase, StopSignal};

/// Default number of records claimed per pass.
pub const DEFAULT_BATCH_SIZE: u32 = 10;

/// Default lease length on a claimed record.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(900);

/// Default number of passes a record may end in a transient failure.
pub const DEFAULT_MAX_PASS_RETRIES: u32 = 5;

/// Error type for download engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The store could not hand out a batch.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of handling one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Final file in place and record marked downloaded.
    Downloaded,
    /// Record marked failed with this message.
    Failed(String),
    /// Not enough disk space; record left pending.
    Deferred,
    /// Transient failure within the retry budget; record left pending.
    Requeued(String),
    /// Stopped (or lease lost) mid-record; record left pending, staging file kept.
    Interrupted,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Downloaded => write!(f, "downloaded"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Deferred => write!(f, "deferred"),
            Self::Requeued(reason) => write!(f, "requeued: {reason}"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Counts per outcome for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records claimed for this batch.
    pub claimed: usize,
    /// Records downloaded.
    pub downloaded: usize,
    /// Records marked failed.
    pub failed: usize,
    /// Records deferred for lack of disk space.
    pub deferred: usize,
    /// Records left pending after a transient failure.
    pub requeued: usize,
    /// Records interrupted mid-transfer.
    pub interrupted: usize,
    /// Records released untouched because of a stop.
    pub not_started: usize,
    /// The batch was skipped because free space was already below the floor.
    pub below_floor: bool,
}

impl BatchReport {
    /// Records a per-record outcome.
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Downloaded => self.downloaded += 1,
            Outcome::Failed(_) => self.failed += 1,
            Outcome::Deferred => self.deferred += 1,
            Outcome::Requeued(_) => self.requeued += 1,
            Outcome::Interrupted => self.interrupted += 1,
        }
    }

    /// True when the pass made no progress (nothing claimed, or everything deferred).
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.claimed == 0 || self.deferred == self.claimed
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.below_floor {
            return write!(f, "skipped: free space below floor");
        }
        write!(
            f,
            "claimed={} downloaded={} failed={} deferred={} requeued={} interrupted={} not_started={}",
            self.claimed,
            self.downloaded,
            self.failed,
            self.deferred,
            self.requeued,
            self.interrupted,
            self.not_started
        )
    }
}

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Records claimed per pass.
    pub batch_size: u32,
    /// Lease length on claimed records.
    pub lease: Duration,
    /// How often an in-flight transfer renews its lease.
    pub heartbeat: Duration,
    /// Passes a record may end in transient failure before it is marked failed.
    pub max_pass_retries: u32,
    /// Remove the remote source after a successful download.
    pub delete_after_download: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            lease: DEFAULT_LEASE,
            heartbeat: DEFAULT_LEASE / 3,
            max_pass_retries: DEFAULT_MAX_PASS_RETRIES,
            delete_after_download: false,
        }
    }
}

/// How a transfer loop ended.
enum TransferEnd {
    Done(TransferResult),
    Failed {
        error: DownloadError,
        attempts: u32,
        reason: String,
    },
    Stopped,
    LeaseLost,
}

/// Sequential download engine over a [`RecordRepository`].
pub struct DownloadEngine {
    repo: Arc<dyn RecordRepository>,
    fetcher: Fetcher,
    layout: TargetLayout,
    budget: DiskBudgetGuard,
    remote: Option<Arc<dyn RemoteTree>>,
    retry_policy: RetryPolicy,
    settings: EngineSettings,
}

impl fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("layout", &self.layout)
            .field("budget", &self.budget)
            .field("retry_policy", &self.retry_policy)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Creates an engine with the default retry policy and no remote cleanup.
    #[must_use]
    pub fn new(
        repo: Arc<dyn RecordRepository>,
        fetcher: Fetcher,
        layout: TargetLayout,
        budget: DiskBudgetGuard,
        settings: EngineSettings,
    ) -> Self {
        debug!(
            batch_size = settings.batch_size,
            lease_secs = settings.lease.as_secs(),
            max_pass_retries = settings.max_pass_retries,
            "creating download engine"
        );
        Self {
            repo,
            fetcher,
            layout,
            budget,
            remote: None,
            retry_policy: RetryPolicy::default(),
            settings,
        }
    }

    /// Replaces the per-attempt retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Sets the tree used to remove sources when `delete_after_download` is on.
    #[must_use]
    pub fn with_remote_cleanup(mut self, remote: Arc<dyn RemoteTree>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Returns the engine settings.
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Returns the disk budget guard.
    #[must_use]
    pub fn budget(&self) -> &DiskBudgetGuard {
        &self.budget
    }

    /// Claims up to `n` pending records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the claim fails.
    pub async fn fetch_pending_batch(&self, n: u32) -> Result<Vec<FileRecord>, EngineError> {
        Ok(self.repo.claim_pending_batch(n, self.settings.lease).await?)
    }

    /// Handles claimed records in order, stopping early if requested.
    ///
    /// Records not reached because of a stop get their lease released.
    #[instrument(skip(self, records, stop), fields(count = records.len()))]
    pub async fn process_batch(&self, records: &[FileRecord], stop: &StopSignal) -> BatchReport {
        let mut report = BatchReport {
            claimed: records.len(),
            ..BatchReport::default()
        };

        for (index, record) in records.iter().enumerate() {
            if stop.is_stopped() {
                for skipped in &records[index..] {
                    self.release(skipped).await;
                }
                report.not_started = records.len() - index;
                info!(not_started = report.not_started, "stop requested, batch cut short");
                break;
            }

            let outcome = self.download(record, stop).await;
            info!(id = record.id, path = %record.path, %outcome, "record processed");
            report.record(&outcome);
        }

        report
    }

    /// Downloads one claimed record and writes its new status back.
    #[instrument(skip(self, record, stop), fields(id = record.id, path = %record.path))]
    pub async fn download(&self, record: &FileRecord, stop: &StopSignal) -> Outcome {
        let Some(token) = record.lease_token.as_deref() else {
            warn!("record is not claimed, leaving it alone");
            return Outcome::Requeued("record is not leased".to_string());
        };

        let target = match self.local_target(record, token).await {
            Ok(target) => target,
            Err(outcome) => return outcome,
        };
        let expected = record.size_bytes();

        // Only this record ever writes its reserved path.
        if file_len(&target.final_path).await == Some(expected) {
            debug!(path = %target.final_path.display(), "final file already present");
            return self.complete(record, token, &target).await;
        }

        let staged = file_len(&target.staging_path).await.unwrap_or(0);
        let remaining = expected.saturating_sub(staged);
        if !self.budget.admits(remaining) {
            info!(remaining, floor = self.budget.floor(), "not enough free space, deferring");
            self.release(record).await;
            return Outcome::Deferred;
        }

        let url = match self.fetcher.download_url(&record.path, &record.signature) {
            Ok(url) => url,
            Err(e) => return self.fail(record, token, &e.to_string()).await,
        };

        match self.transfer(record, token, &url, &target, expected, stop).await {
            TransferEnd::Done(result) if result.bytes_on_disk == expected => {
                if result.resumed {
                    info!(offset = staged, "resumed transfer completed");
                }
                if let Err(e) = finalize(&target).await {
                    return self.fail(record, token, &e.to_string()).await;
                }
                self.complete(record, token, &target).await
            }
            TransferEnd::Done(result) => {
                let error =
                    DownloadError::integrity(&target.staging_path, expected, result.bytes_on_disk);
                self.fail(record, token, &error.to_string()).await
            }
            TransferEnd::Failed {
                error,
                attempts,
                reason,
            } => {
                warn!(attempts, %reason, error = %error, "transfer gave up");
                if error.failure_type().is_retryable() {
                    self.requeue(record, token, &error.to_string()).await
                } else {
                    self.fail(record, token, &error.to_string()).await
                }
            }
            TransferEnd::Stopped => {
                info!("stop requested mid-transfer, staging file kept");
                self.release(record).await;
                Outcome::Interrupted
            }
            TransferEnd::LeaseLost => {
                warn!("lease lost mid-transfer, abandoning record");
                Outcome::Interrupted
            }
        }
    }

    /// Returns the record's reserved target, reserving one first if needed.
    ///
    /// The mapped path is tried first, then numbered variants; a candidate
    /// is skipped when it exists on disk or another record holds it. `Err`
    /// carries the outcome the record has already been settled with.
    async fn local_target(&self, record: &FileRecord, token: &str) -> Result<LocalTarget, Outcome> {
        if let Some(reserved) = &record.local_path {
            return Ok(LocalTarget::new(reserved.into(), &record.signature));
        }

        let preferred = match self.layout.resolve(&record.path) {
            Ok(path) => path,
            Err(e) => return Err(self.fail(record, token, &e.to_string()).await),
        };

        for n in 0..MAX_NAME_SUFFIX {
            let candidate = numbered_path(&preferred, n);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                debug!(path = %candidate.display(), "local file exists, trying next name");
                continue;
            }
            let candidate_str = candidate.to_string_lossy().into_owned();
            match self
                .repo
                .reserve_local_path(record.id, token, &candidate_str)
                .await
            {
                Ok(true) => {
                    if n > 0 {
                        info!(path = %candidate.display(), "mapped name taken, using numbered name");
                    }
                    return Ok(LocalTarget::new(candidate, &record.signature));
                }
                Ok(false) => {
                    debug!(path = %candidate.display(), "local path reserved by another record");
                }
                Err(StoreError::LeaseLost(_)) => {
                    warn!("lease lost before reserving a local path");
                    return Err(Outcome::Interrupted);
                }
                Err(e) => {
                    warn!(error = %e, "failed to reserve local path");
                    self.release(record).await;
                    return Err(Outcome::Requeued(e.to_string()));
                }
            }
        }

        let error = DownloadError::invalid_target(
            &record.path,
            format!("no free local name after {MAX_NAME_SUFFIX} candidates"),
        );
        Err(self.fail(record, token, &error.to_string()).await)
    }

    /// Runs fetch attempts with backoff while renewing the lease.
    async fn transfer(
        &self,
        record: &FileRecord,
        token: &str,
        url: &url::Url,
        target: &LocalTarget,
        expected: u64,
        stop: &StopSignal,
    ) -> TransferEnd {
        let heartbeat_every = self.settings.heartbeat.max(Duration::from_millis(10));
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let fetch = self
                .fetcher
                .fetch_to_staging(url, &target.staging_path, expected);
            tokio::pin!(fetch);
            let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);

            let result = loop {
                tokio::select! {
                    result = &mut fetch => break result,
                    () = stop.stopped() => return TransferEnd::Stopped,
                    _ = heartbeat.tick() => {
                        match self.repo.renew_lease(record.id, token, self.settings.lease).await {
                            Ok(()) => debug!("lease renewed"),
                            Err(StoreError::LeaseLost(_)) => return TransferEnd::LeaseLost,
                            Err(e) => warn!(error = %e, "lease renewal failed"),
                        }
                    }
                }
            };

            let error = match result {
                Ok(done) => return TransferEnd::Done(done),
                Err(error) => error,
            };

            let failure_type = error.failure_type();
            match self.retry_policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay: backoff_delay,
                    attempt: next_attempt,
                } => {
                    let delay = if failure_type == FailureType::RateLimited {
                        error
                            .retry_after()
                            .and_then(parse_retry_after)
                            .unwrap_or(backoff_delay)
                    } else {
                        backoff_delay
                    };
                    info!(
                        attempt = next_attempt,
                        max_attempts = self.retry_policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying download"
                    );
                    if stop.sleep(delay).await {
                        return TransferEnd::Stopped;
                    }
                }
                RetryDecision::DoNotRetry { reason } => {
                    return TransferEnd::Failed {
                        error,
                        attempts: attempt,
                        reason,
                    };
                }
            }
        }
    }

    /// Marks the record downloaded and removes the remote source if configured.
    async fn complete(&self, record: &FileRecord, token: &str, target: &LocalTarget) -> Outcome {
        match self.repo.mark_downloaded(record.id, token).await {
            Ok(()) => {}
            Err(StoreError::LeaseLost(_)) => {
                warn!("lease lost before marking downloaded; file is in place");
                return Outcome::Interrupted;
            }
            Err(e) => {
                warn!(error = %e, "failed to mark downloaded; will be picked up again");
                self.release(record).await;
                return Outcome::Requeued(e.to_string());
            }
        }
        info!(path = %target.final_path.display(), bytes = record.size, "download complete");

        if self.settings.delete_after_download
            && let Some(remote) = &self.remote
        {
            let normalized = normalize_path(&record.path);
            let (directory, name) = split_parent(&normalized);
            match remote.remove(directory, name).await {
                Ok(()) => info!("remote source removed"),
                Err(e) => warn!(error = %e, "failed to remove remote source"),
            }
        }

        Outcome::Downloaded
    }

    async fn fail(&self, record: &FileRecord, token: &str, message: &str) -> Outcome {
        warn!(error = %message, "download failed");
        if let Err(e) = self.repo.mark_failed(record.id, token, message).await {
            warn!(error = %e, "failed to mark record failed");
        }
        Outcome::Failed(message.to_string())
    }

    async fn requeue(&self, record: &FileRecord, token: &str, message: &str) -> Outcome {
        match self
            .repo
            .record_transient_failure(record.id, token, message, self.settings.max_pass_retries)
            .await
        {
            Ok(FileStatus::Failed) => {
                warn!(
                    max_pass_retries = self.settings.max_pass_retries,
                    "retry budget spent, record failed"
                );
                Outcome::Failed(message.to_string())
            }
            Ok(_) => Outcome::Requeued(message.to_string()),
            Err(e) => {
                warn!(error = %e, "failed to record transient failure");
                Outcome::Requeued(message.to_string())
            }
        }
    }

    async fn release(&self, record: &FileRecord) {
        let Some(token) = record.lease_token.as_deref() else {
            return;
        };
        if let Err(e) = self.repo.release_lease(record.id, token).await {
            warn!(id = record.id, error = %e, "failed to release lease");
        }
    }
}

/// Length of a file, or `None` if it cannot be read.
async fn file_len(path: &std::path::Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|meta| meta.len())
}

/// Atomically moves the completed staging file into place.
async fn finalize(target: &LocalTarget) -> Result<(), DownloadError> {
    if tokio::fs::metadata(&target.staging_path).await.is_err() {
        // Final file already in place from an earlier pass.
        return Ok(());
    }
    tokio::fs::rename(&target.staging_path, &target.final_path)
        .await
        .map_err(|e| DownloadError::io(&target.final_path, e))
}

/// The download loop's unit of work: claim one batch and process it.
#[derive(Debug)]
pub struct DownloadPhase {
    engine: DownloadEngine,
}

impl DownloadPhase {
    /// Wraps an engine as a supervised phase.
    #[must_use]
    pub fn new(engine: DownloadEngine) -> Self {
        Self { engine }
    }

    /// Returns the wrapped engine.
    #[must_use]
    pub fn engine(&self) -> &DownloadEngine {
        &self.engine
    }
}

#[async_trait]
impl Phase for DownloadPhase {
    type Report = BatchReport;
    type Error = EngineError;

    fn name(&self) -> &'static str {
        "download"
    }

    async fn run_pass(&self, stop: &StopSignal) -> Result<BatchReport, EngineError> {
        if !self.engine.budget().admits(0) {
            info!(
                floor = self.engine.budget().floor(),
                "free space below floor, not claiming"
            );
            return Ok(BatchReport {
                below_floor: true,
                ..BatchReport::default()
            });
        }

        let batch = self
            .engine
            .fetch_pending_batch(self.engine.settings().batch_size)
            .await?;
        if batch.is_empty() {
            debug!("no pending records");
            return Ok(BatchReport::default());
        }

        Ok(self.engine.process_batch(&batch, stop).await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::Path;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::budget::SpaceProbe;
    use crate::store::{Result as StoreResult, StoreDbErrorKind};

    /// Repository with canned answers: every write either reports a lost
    /// lease, or succeeds except `mark_downloaded`, which hits a busy database.
    struct Scripted {
        lease_lost: bool,
        released: AtomicUsize,
    }

    impl Scripted {
        fn new(lease_lost: bool) -> Self {
            Self {
                lease_lost,
                released: AtomicUsize::new(0),
            }
        }

        fn answer(&self, id: i64) -> StoreResult<()> {
            if self.lease_lost {
                Err(StoreError::LeaseLost(id))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl RecordRepository for Scripted {
        async fn claim_pending_batch(&self, _: u32, _: Duration) -> StoreResult<Vec<FileRecord>> {
            Ok(Vec::new())
        }
        async fn renew_lease(&self, id: i64, _: &str, _: Duration) -> StoreResult<()> {
            self.answer(id)
        }
        async fn release_lease(&self, id: i64, _: &str) -> StoreResult<()> {
            self.released.fetch_add(1, Ordering::SeqCst);
            self.answer(id)
        }
        async fn reserve_local_path(&self, id: i64, _: &str, _: &str) -> StoreResult<bool> {
            self.answer(id).map(|()| true)
        }
        async fn mark_downloaded(&self, id: i64, _: &str) -> StoreResult<()> {
            self.answer(id)?;
            Err(StoreError::Database {
                kind: StoreDbErrorKind::BusyOrLocked,
                message: "database is locked".to_string(),
            })
        }
        async fn mark_failed(&self, id: i64, _: &str, _: &str) -> StoreResult<()> {
            self.answer(id)
        }
        async fn record_transient_failure(
            &self,
            id: i64,
            _: &str,
            _: &str,
            _: u32,
        ) -> StoreResult<FileStatus> {
            self.answer(id).map(|()| FileStatus::Pending)
        }
        async fn count_by_status(&self, _: FileStatus) -> StoreResult<i64> {
            Ok(0)
        }
    }

    struct Plenty;

    impl SpaceProbe for Plenty {
        fn available_bytes(&self, _path: &Path) -> std::io::Result<u64> {
            Ok(u64::MAX / 2)
        }
    }

    fn engine_over(repo: Arc<dyn RecordRepository>, out: &Path) -> DownloadEngine {
        let fetcher = Fetcher::new(url::Url::parse("http://127.0.0.1:9").unwrap()).unwrap();
        DownloadEngine::new(
            repo,
            fetcher,
            TargetLayout::new(out, "/", true),
            DiskBudgetGuard::with_probe(out, 0, Box::new(Plenty)),
            EngineSettings::default(),
        )
    }

    fn record(
        path: &str,
        size: i64,
        lease_token: Option<&str>,
        local_path: Option<&str>,
    ) -> FileRecord {
        FileRecord {
            id: 1,
            name: path.rsplit('/').next().unwrap().to_string(),
            path: path.to_string(),
            size,
            signature: "s".to_string(),
            status_code: FileStatus::Pending.code(),
            error_message: String::new(),
            retry_count: 0,
            lease_token: lease_token.map(str::to_string),
            lease_expires_at: None,
            local_path: local_path.map(str::to_string),
            created_at: "2026-01-01 00:00:00.000".to_string(),
            updated_at: "2026-01-01 00:00:00.000".to_string(),
        }
    }

    #[tokio::test]
    async fn test_lease_lost_on_completion_is_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("f.bin");
        std::fs::write(&final_path, b"abc").unwrap();
        let engine = engine_over(Arc::new(Scripted::new(true)), dir.path());
        let reserved = final_path.to_string_lossy();

        let outcome = engine
            .download(
                &record("/f.bin", 3, Some("t"), Some(&reserved)),
                &StopSignal::new(),
            )
            .await;

        assert_eq!(outcome, Outcome::Interrupted);
        assert!(final_path.exists());
    }

    #[tokio::test]
    async fn test_lease_lost_before_reservation_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_over(Arc::new(Scripted::new(true)), dir.path());

        let outcome = engine
            .download(&record("/f.bin", 3, Some("t"), None), &StopSignal::new())
            .await;

        assert_eq!(outcome, Outcome::Interrupted);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_store_error_on_completion_releases_lease() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("f.bin");
        std::fs::write(&final_path, b"abc").unwrap();
        let repo = Arc::new(Scripted::new(false));
        let engine = engine_over(repo.clone(), dir.path());
        let reserved = final_path.to_string_lossy();

        let outcome = engine
            .download(
                &record("/f.bin", 3, Some("t"), Some(&reserved)),
                &StopSignal::new(),
            )
            .await;

        assert!(matches!(outcome, Outcome::Requeued(ref msg) if msg.contains("locked")));
        assert_eq!(repo.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unleased_record_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_over(Arc::new(Scripted::new(true)), dir.path());

        let outcome = engine
            .download(&record("/f.bin", 3, None, None), &StopSignal::new())
            .await;

        assert!(matches!(outcome, Outcome::Requeued(_)));
    }

    #[test]
    fn test_batch_report_counts_outcomes() {
        let mut report = BatchReport {
            claimed: 4,
            ..BatchReport::default()
        };
        report.record(&Outcome::Downloaded);
        report.record(&Outcome::Failed("x".to_string()));
        report.record(&Outcome::Deferred);
        report.record(&Outcome::Requeued("y".to_string()));

        assert_eq!(report.downloaded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.requeued, 1);
        assert!(!report.is_idle());
    }

    #[test]
    fn test_batch_report_idle_when_everything_deferred() {
        let mut report = BatchReport {
            claimed: 2,
            ..BatchReport::default()
        };
        report.record(&Outcome::Deferred);
        report.record(&Outcome::Deferred);
        assert!(report.is_idle());
        assert!(BatchReport::default().is_idle());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::Downloaded.to_string(), "downloaded");
        assert_eq!(
            Outcome::Failed("HTTP 404".to_string()).to_string(),
            "failed: HTTP 404"
        );
    }

    #[test]
    fn test_engine_settings_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(settings.lease, Duration::from_secs(900));
        assert_eq!(settings.heartbeat, Duration::from_secs(300));
        assert!(!settings.delete_after_download);
    }

    #[test]
    fn test_below_floor_report_display() {
        let report = BatchReport {
            below_floor: true,
            ..BatchReport::default()
        };
        assert!(report.to_string().contains("below floor"));
    }
}
