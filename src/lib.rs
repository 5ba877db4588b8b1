//! Harvester Core Library
//!
//! Crawls a remote file-tree listing service into a durable ledger and
//! downloads every recorded file with resumable, disk-budgeted transfers.
//!
//! # Architecture
//!
//! Two independent loops share one `SQLite` ledger and never call each other:
//!
//! - [`crawl`] - recursive, paginated walk of the remote tree into the ledger
//! - [`download`] - claims pending records and retires them through transfers
//!
//! Supporting modules:
//! - [`db`] - Database connection and schema management
//! - [`store`] - the `files` ledger and its lease-based work queue
//! - [`remote`] - HTTP client for the listing and removal endpoints
//! - [`retry`] - failure classification and backoff
//! - [`budget`] - free-space admission control
//! - [`supervisor`] - interruptible `Running`/`Sleeping`/`Stopped` loop
//! - [`config`] / [`logging`] - process setup for the binaries

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod budget;
pub mod config;
pub mod crawl;
pub mod db;
pub mod download;
pub mod logging;
pub mod remote;
pub mod retry;
pub mod store;
pub mod supervisor;

// Re-export commonly used types
pub use budget::{DiskBudgetGuard, FsSpaceProbe, SpaceProbe};
pub use config::{ConfigError, CrawlArgs, CrawlSettings, DownloadArgs, DownloadSettings};
pub use crawl::{CrawlPhase, CrawlStats, Crawler};
pub use db::{Database, DbError};
pub use download::{
    BatchReport, DownloadEngine, DownloadError, DownloadPhase, EngineError, EngineSettings,
    Fetcher, Outcome, TargetLayout,
};
pub use remote::{RemoteClient, RemoteError, RemoteTree};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy};
pub use store::{
    DiscoveredFile, FileRecord, FileStatus, RecordRepository, RecordStore,
    SignatureChangePolicy, StoreError,
};
pub use supervisor::{LoopState, Phase, RunSummary, StopSignal, Supervisor};
