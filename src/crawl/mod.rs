//! Recursive crawler that turns the remote tree into ledger rows.
//!
//! Traversal is an iterative depth-first walk with an explicit frontier and
//! a visited set, so each directory is listed at most once per crawl. Each
//! directory is paged from page 1 until the server reports no more pages
//! (or returns an empty page). Files are recorded as their page arrives;
//! sub-directories are only descended into once their parent was listed
//! completely.
//!
//! Failures stay local: a directory whose listing keeps failing is logged
//! and skipped along with its subtree, and a file the store refuses is
//! skipped until the next crawl.

mod path;

use std::collections::HashSet;
use std::convert::Infallible;
use std::fmt;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

pub use path::{join_path, normalize_path, resolve_entry, split_parent};

use crate::remote::{ListPage, RemoteError, RemoteTree};
use crate::retry::{FailureType, RetryDecision, RetryPolicy, parse_retry_after};
use crate::store::{DiscoveredFile, DiscoveryOutcome, RecordStore, SignatureChangePolicy};
use crate::supervisor::{Phase, StopSignal};

/// Default number of entries requested per listing page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Counters for one crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    /// Directories listed completely.
    pub directories_listed: usize,
    /// Directories abandoned after listing errors.
    pub directories_failed: usize,
    /// Directories reached more than once and skipped.
    pub directories_revisited: usize,
    /// File entries seen.
    pub files_seen: usize,
    /// New rows created.
    pub inserted: usize,
    /// Known rows with an unchanged signature.
    pub unchanged: usize,
    /// Known rows refreshed after a signature change.
    pub refreshed: usize,
    /// Signature changes left as is (policy, terminal status, or leased).
    pub change_skipped: usize,
    /// Entries rejected as malformed.
    pub malformed_entries: usize,
    /// Files the store failed to record.
    pub store_errors: usize,
    /// Whether the crawl ended early on a stop request.
    pub interrupted: bool,
}

impl fmt::Display for CrawlStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dirs={} failed_dirs={} files={} inserted={} unchanged={} refreshed={} store_errors={}{}",
            self.directories_listed,
            self.directories_failed,
            self.files_seen,
            self.inserted,
            self.unchanged,
            self.refreshed,
            self.store_errors,
            if self.interrupted { " (interrupted)" } else { "" }
        )
    }
}

/// Why listing a directory ended early.
#[derive(Debug)]
enum DirectoryAbort {
    Stopped,
    Remote {
        error: RemoteError,
        attempts: u32,
        reason: String,
    },
}

/// Walks a remote tree and records every file in the store.
#[derive(Debug, Clone)]
pub struct Crawler<T> {
    tree: T,
    store: RecordStore,
    page_size: u32,
    retry_policy: RetryPolicy,
    signature_policy: SignatureChangePolicy,
}

impl<T: RemoteTree> Crawler<T> {
    /// Creates a crawler with the default retry and signature-change policies.
    ///
    /// A `page_size` of 0 is raised to 1.
    #[must_use]
    pub fn new(tree: T, store: RecordStore, page_size: u32) -> Self {
        Self {
            tree,
            store,
            page_size: page_size.max(1),
            retry_policy: RetryPolicy::default(),
            signature_policy: SignatureChangePolicy::default(),
        }
    }

    /// Replaces the retry policy used for listing calls.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Replaces the signature-change policy.
    #[must_use]
    pub fn with_signature_policy(mut self, policy: SignatureChangePolicy) -> Self {
        self.signature_policy = policy;
        self
    }

    /// Returns the store this crawler writes to.
    #[must_use]
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Crawls everything under `root`.
    ///
    /// Never fails as a whole; per-directory and per-file problems are
    /// counted in the returned stats.
    #[instrument(skip(self, stop), fields(page_size = self.page_size))]
    pub async fn crawl(&self, root: &str, stop: &StopSignal) -> CrawlStats {
        let mut stats = CrawlStats::default();
        let mut frontier = vec![normalize_path(root)];
        let mut visited: HashSet<String> = HashSet::new();

        while let Some(directory) = frontier.pop() {
            if stop.is_stopped() {
                stats.interrupted = true;
                break;
            }
            if !visited.insert(directory.clone()) {
                stats.directories_revisited += 1;
                continue;
            }

            match self.crawl_directory(&directory, stop, &mut stats).await {
                Ok(subdirectories) => {
                    stats.directories_listed += 1;
                    // Reverse so the first listed sub-directory is visited first.
                    frontier.extend(
                        subdirectories
                            .into_iter()
                            .rev()
                            .filter(|d| !visited.contains(d)),
                    );
                }
                Err(DirectoryAbort::Stopped) => {
                    stats.interrupted = true;
                    break;
                }
                Err(DirectoryAbort::Remote {
                    error,
                    attempts,
                    reason,
                }) => {
                    stats.directories_failed += 1;
                    warn!(
                        directory = %directory,
                        attempts,
                        %reason,
                        error = %error,
                        "skipping directory subtree"
                    );
                }
            }
        }

        info!(%stats, "crawl finished");
        stats
    }

    /// Lists all pages of one directory, recording files as they arrive.
    ///
    /// Returns the sub-directories found.
    async fn crawl_directory(
        &self,
        directory: &str,
        stop: &StopSignal,
        stats: &mut CrawlStats,
    ) -> Result<Vec<String>, DirectoryAbort> {
        let mut subdirectories = Vec::new();
        let mut page = 1u32;

        loop {
            if stop.is_stopped() {
                return Err(DirectoryAbort::Stopped);
            }

            let listing = self.list_with_retry(directory, page, stop).await?;
            debug!(directory, page, entries = listing.entries.len(), "listing page");

            if listing.entries.is_empty() {
                break;
            }

            for entry in &listing.entries {
                let (path, name) = match resolve_entry(directory, entry) {
                    Ok(resolved) => resolved,
                    Err(reason) => {
                        stats.malformed_entries += 1;
                        warn!(directory, %reason, "skipping malformed entry");
                        continue;
                    }
                };

                if entry.is_directory {
                    subdirectories.push(path);
                    continue;
                }

                stats.files_seen += 1;
                let file = DiscoveredFile {
                    path,
                    name,
                    size: entry.size,
                    signature: entry.signature.clone(),
                };
                self.record_file(&file, stats).await;
            }

            if !listing.has_more {
                break;
            }
            page = page.saturating_add(1);
        }

        Ok(subdirectories)
    }

    async fn record_file(&self, file: &DiscoveredFile, stats: &mut CrawlStats) {
        match self
            .store
            .record_discovery(file, self.signature_policy)
            .await
        {
            Ok(DiscoveryOutcome::Inserted) => {
                stats.inserted += 1;
                debug!(path = %file.path, size = file.size, "new file");
            }
            Ok(DiscoveryOutcome::Unchanged) => stats.unchanged += 1,
            Ok(DiscoveryOutcome::Refreshed) => {
                stats.refreshed += 1;
                info!(path = %file.path, "signature changed, queued again");
            }
            Ok(DiscoveryOutcome::ChangeIgnored | DiscoveryOutcome::Leased) => {
                stats.change_skipped += 1;
            }
            Err(e) => {
                stats.store_errors += 1;
                warn!(path = %file.path, error = %e, "failed to record file");
            }
        }
    }

    async fn list_with_retry(
        &self,
        directory: &str,
        page: u32,
        stop: &StopSignal,
    ) -> Result<ListPage, DirectoryAbort> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let error = match self.tree.list(directory, page, self.page_size).await {
                Ok(listing) => return Ok(listing),
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
                        directory,
                        page,
                        attempt = next_attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying listing"
                    );
                    if stop.sleep(delay).await {
                        return Err(DirectoryAbort::Stopped);
                    }
                }
                RetryDecision::DoNotRetry { reason } => {
                    return Err(DirectoryAbort::Remote {
                        error,
                        attempts: attempt,
                        reason,
                    });
                }
            }
        }
    }
}

/// The crawl loop's unit of work: one full crawl of `root`.
#[derive(Debug)]
pub struct CrawlPhase<T> {
    crawler: Crawler<T>,
    root: String,
}

impl<T: RemoteTree> CrawlPhase<T> {
    /// Creates a phase crawling `root` on every pass.
    #[must_use]
    pub fn new(crawler: Crawler<T>, root: impl Into<String>) -> Self {
        Self {
            crawler,
            root: root.into(),
        }
    }
}

#[async_trait]
impl<T: RemoteTree> Phase for CrawlPhase<T> {
    type Report = CrawlStats;
    type Error = Infallible;

    fn name(&self) -> &'static str {
        "crawl"
    }

    async fn run_pass(&self, stop: &StopSignal) -> Result<CrawlStats, Infallible> {
        Ok(self.crawler.crawl(&self.root, stop).await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::Database;
    use crate::remote::RemoteEntry;
    use crate::store::FileStatus;

    /// In-memory tree: directory → pages of entries. Errors are scripted per
    /// (directory, page) and consumed once each.
    #[derive(Default)]
    struct FakeTree {
        pages: HashMap<String, Vec<Vec<RemoteEntry>>>,
        failures: Mutex<HashMap<(String, u32), Vec<RemoteError>>>,
        calls: Mutex<Vec<(String, u32)>>,
    }

    impl FakeTree {
        fn dir(mut self, directory: &str, pages: Vec<Vec<RemoteEntry>>) -> Self {
            self.pages.insert(directory.to_string(), pages);
            self
        }

        fn fail(self, directory: &str, page: u32, errors: Vec<RemoteError>) -> Self {
            self.failures
                .lock()
                .unwrap()
                .insert((directory.to_string(), page), errors);
            self
        }

        fn calls(&self) -> Vec<(String, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteTree for FakeTree {
        async fn list(
            &self,
            directory: &str,
            page: u32,
            _page_size: u32,
        ) -> Result<ListPage, RemoteError> {
            self.calls
                .lock()
                .unwrap()
                .push((directory.to_string(), page));
            if let Some(errors) = self
                .failures
                .lock()
                .unwrap()
                .get_mut(&(directory.to_string(), page))
                && !errors.is_empty()
            {
                return Err(errors.remove(0));
            }
            let pages = self.pages.get(directory).cloned().unwrap_or_default();
            let index = (page - 1) as usize;
            Ok(ListPage {
                entries: pages.get(index).cloned().unwrap_or_default(),
                has_more: index + 1 < pages.len(),
            })
        }

        async fn remove(&self, _directory: &str, _name: &str) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    fn file(name: &str, size: u64, signature: &str) -> RemoteEntry {
        RemoteEntry {
            name: name.to_string(),
            path: None,
            size,
            signature: signature.to_string(),
            is_directory: false,
        }
    }

    fn dir(name: &str) -> RemoteEntry {
        RemoteEntry {
            name: name.to_string(),
            path: None,
            size: 0,
            signature: String::new(),
            is_directory: true,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2), 2.0)
            .with_max_jitter(Duration::ZERO)
    }

    async fn store() -> RecordStore {
        RecordStore::new(Database::new_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_crawl_records_nested_files() {
        let tree = FakeTree::default()
            .dir("/", vec![vec![dir("a")]])
            .dir("/a", vec![vec![file("f1.txt", 100, "s1"), dir("b")]])
            .dir("/a/b", vec![vec![file("f2.txt", 200, "s2")]]);
        let crawler = Crawler::new(tree, store().await, 10);

        let stats = crawler.crawl("/", &StopSignal::new()).await;

        assert_eq!(stats.directories_listed, 3);
        assert_eq!(stats.inserted, 2);
        let f2 = crawler.store().find_by_path("/a/b/f2.txt").await.unwrap().unwrap();
        assert_eq!(f2.size, 200);
        assert_eq!(f2.status(), FileStatus::Pending);
    }

    #[tokio::test]
    async fn test_crawl_pages_until_has_more_false() {
        let tree = FakeTree::default().dir(
            "/",
            vec![
                vec![file("1", 1, "a"), file("2", 1, "b")],
                vec![file("3", 1, "c")],
            ],
        );
        let crawler = Crawler::new(tree, store().await, 2);

        let stats = crawler.crawl("/", &StopSignal::new()).await;

        assert_eq!(stats.files_seen, 3);
        assert_eq!(crawler.tree.calls(), vec![("/".to_string(), 1), ("/".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_crawl_is_idempotent() {
        let tree = FakeTree::default().dir("/", vec![vec![file("f1.txt", 100, "s1")]]);
        let crawler = Crawler::new(tree, store().await, 10);

        crawler.crawl("/", &StopSignal::new()).await;
        let second = crawler.crawl("/", &StopSignal::new()).await;

        assert_eq!(second.inserted, 0);
        assert_eq!(second.unchanged, 1);
        assert_eq!(
            crawler.store().count_by_status(FileStatus::Pending).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_transient_listing_error_is_retried() {
        let tree = FakeTree::default()
            .dir("/", vec![vec![file("f1.txt", 100, "s1")]])
            .fail("/", 1, vec![RemoteError::timeout("http://api")]);
        let crawler = Crawler::new(tree, store().await, 10).with_retry_policy(fast_retry());

        let stats = crawler.crawl("/", &StopSignal::new()).await;

        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.directories_failed, 0);
    }

    #[tokio::test]
    async fn test_failing_subtree_does_not_abort_siblings() {
        let tree = FakeTree::default()
            .dir("/", vec![vec![dir("bad"), dir("good")]])
            .dir("/bad", vec![vec![file("lost.txt", 1, "x")]])
            .dir("/good", vec![vec![file("kept.txt", 1, "y")]])
            .fail(
                "/bad",
                1,
                vec![RemoteError::http_status("http://api", 404, None)],
            );
        let crawler = Crawler::new(tree, store().await, 10).with_retry_policy(fast_retry());

        let stats = crawler.crawl("/", &StopSignal::new()).await;

        assert_eq!(stats.directories_failed, 1);
        assert!(crawler.store().find_by_path("/good/kept.txt").await.unwrap().is_some());
        assert!(crawler.store().find_by_path("/bad/lost.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directory_reached_twice_is_listed_once() {
        let mut looped = dir("a");
        looped.path = Some("/a".to_string());
        let tree = FakeTree::default()
            .dir("/", vec![vec![dir("a")]])
            .dir("/a", vec![vec![looped, file("f.txt", 1, "s")]]);
        let crawler = Crawler::new(tree, store().await, 10);

        let stats = crawler.crawl("/", &StopSignal::new()).await;

        assert_eq!(stats.directories_listed, 2);
        let a_calls = crawler
            .tree
            .calls()
            .iter()
            .filter(|(d, _)| d == "/a")
            .count();
        assert_eq!(a_calls, 1);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_skipped() {
        let tree = FakeTree::default().dir("/", vec![vec![file("", 1, "s"), file("ok", 1, "s")]]);
        let crawler = Crawler::new(tree, store().await, 10);

        let stats = crawler.crawl("/", &StopSignal::new()).await;

        assert_eq!(stats.malformed_entries, 1);
        assert_eq!(stats.inserted, 1);
    }

    #[tokio::test]
    async fn test_stopped_crawl_lists_nothing() {
        let tree = FakeTree::default().dir("/", vec![vec![file("f", 1, "s")]]);
        let crawler = Crawler::new(tree, store().await, 10);
        let stop = StopSignal::new();
        stop.stop();

        let stats = crawler.crawl("/", &stop).await;

        assert!(stats.interrupted);
        assert!(crawler.tree.calls().is_empty());
    }

    #[tokio::test]
    async fn test_crawl_phase_reports_stats() {
        let tree = FakeTree::default().dir("/data", vec![vec![file("f", 1, "s")]]);
        let phase = CrawlPhase::new(Crawler::new(tree, store().await, 10), "/data/");

        let report = phase.run_pass(&StopSignal::new()).await.unwrap();

        assert_eq!(report.inserted, 1);
        assert!(report.to_string().contains("inserted=1"));
    }
}
