//! Download side of the pipeline.
//!
//! Pending ledger records are claimed in batches and each one is fetched
//! from the download host into a staging file next to its final location,
//! verified against the recorded size, and renamed into place.
//!
//! - [`target`] maps remote paths to local final/staging paths
//! - [`transfer`] performs one resumable ranged transfer
//! - [`engine`] drives claimed records to a terminal or pending state

mod engine;
mod error;
mod target;
mod transfer;

pub use engine::{
    BatchReport, DEFAULT_BATCH_SIZE, DEFAULT_LEASE, DEFAULT_MAX_PASS_RETRIES, DownloadEngine,
    DownloadPhase, EngineError, EngineSettings, Outcome,
};
pub use error::DownloadError;
pub use target::{
    LocalTarget, MAX_NAME_SUFFIX, STAGING_INFIX, TargetLayout, numbered_path, sanitize_segment,
    staging_name,
};
pub use transfer::{Fetcher, TransferResult};
