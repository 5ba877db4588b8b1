//! Command-line and environment configuration.
//!
//! Every option is a `clap` flag that falls back to an environment variable
//! (a `.env` file is loaded by the binaries before parsing). Parsed
//! arguments are validated once into immutable [`CrawlSettings`] /
//! [`DownloadSettings`] values that are passed explicitly to each loop.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};
use thiserror::Error;
use url::Url;

use crate::crawl::{DEFAULT_PAGE_SIZE, normalize_path};
use crate::download::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_PASS_RETRIES};
use crate::retry::DEFAULT_MAX_RETRIES;
use crate::store::SignatureChangePolicy;

/// Default pause between passes, in seconds.
pub const DEFAULT_SLEEP_SECS: u64 = 60;

/// Default free-space floor on the download volume (10 GiB).
pub const DEFAULT_DISK_FREE_FLOOR: u64 = 10 * 1024 * 1024 * 1024;

/// Default lease on claimed records, in seconds.
pub const DEFAULT_LEASE_SECS: u64 = 900;

/// Default ledger database file.
pub const DEFAULT_DATABASE_PATH: &str = "harvester.db";

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A URL option could not be parsed.
    #[error("invalid {name} '{value}': {reason}")]
    InvalidUrl {
        /// Option name (environment variable spelling).
        name: &'static str,
        /// The rejected value.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// A numeric option must be positive.
    #[error("{name} must be greater than zero")]
    Zero {
        /// Option name (environment variable spelling).
        name: &'static str,
    },

    /// A required option is missing or blank.
    #[error("{name} is required{hint}")]
    Missing {
        /// Option name (environment variable spelling).
        name: &'static str,
        /// Extra context appended to the message.
        hint: &'static str,
    },
}

/// Options shared by both binaries.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Run a single pass and exit
    #[arg(long)]
    pub once: bool,

    /// SQLite ledger file shared by the crawl and download loops
    #[arg(long, env = "DATABASE_PATH", default_value = DEFAULT_DATABASE_PATH)]
    pub database_path: PathBuf,

    /// Remote directory the crawl starts from
    #[arg(long, env = "ROOT_DIR", default_value = "/")]
    pub root_dir: String,

    /// Seconds to sleep between passes
    #[arg(long, env = "SLEEP_SECS", default_value_t = DEFAULT_SLEEP_SECS)]
    pub sleep_secs: u64,

    /// Attempts per remote call before giving up on it (1-10)
    #[arg(long, env = "MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES,
          value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_retries: u32,

    /// Directory for daily-rotated log files (stderr only when unset)
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

/// Crawl a remote file tree and record every file in the ledger.
#[derive(Parser, Debug, Clone)]
#[command(name = "harvest-crawl")]
#[command(author, version, about)]
pub struct CrawlArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Base URL of the listing API
    #[arg(long, env = "API_BASE_URL")]
    pub api_base_url: Option<String>,

    /// Bearer token for the listing API
    #[arg(long, env = "API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Entries requested per listing page
    #[arg(long, env = "PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: u32,

    /// What to do when a known file reports a new signature (reset or ignore)
    #[arg(long, env = "SIGNATURE_CHANGE", default_value = "reset")]
    pub signature_change: SignatureChangePolicy,
}

/// Download pending ledger records with resumable transfers.
#[derive(Parser, Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
#[command(name = "harvest-download")]
#[command(author, version, about)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Base URL of the listing API (needed for --delete-after-download)
    #[arg(long, env = "API_BASE_URL")]
    pub api_base_url: Option<String>,

    /// Bearer token for the listing API (needed for --delete-after-download)
    #[arg(long, env = "API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Host serving file contents
    #[arg(long, env = "DOWNLOAD_HOST")]
    pub download_host: Option<String>,

    /// Local directory files are written to
    #[arg(long, env = "OUTPUT_DIR", default_value = "downloads")]
    pub output_dir: PathBuf,

    /// Records claimed per pass
    #[arg(long, env = "BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: u32,

    /// Bytes that must stay free on the output volume
    #[arg(long, env = "DISK_FREE_FLOOR", default_value_t = DEFAULT_DISK_FREE_FLOOR)]
    pub disk_free_floor: u64,

    /// Remove each remote file after it is downloaded
    #[arg(long, env = "DELETE_AFTER_DOWNLOAD")]
    pub delete_after_download: bool,

    /// Mirror the remote directory structure under the output directory
    #[arg(long, env = "PRESERVE_STRUCTURE", default_value_t = true,
          action = clap::ArgAction::Set)]
    pub preserve_structure: bool,

    /// Passes a record may end in a transient failure before it is marked failed
    #[arg(long, env = "MAX_PASS_RETRIES", default_value_t = DEFAULT_MAX_PASS_RETRIES)]
    pub max_pass_retries: u32,

    /// Seconds a claimed record stays leased without a heartbeat
    #[arg(long, env = "LEASE_SECS", default_value_t = DEFAULT_LEASE_SECS)]
    pub lease_secs: u64,

    /// Put failed records back to pending before the first pass
    #[arg(long)]
    pub retry_failed: bool,
}

/// Validated settings for the crawl loop.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub api_base: Url,
    pub api_token: String,
    pub root_dir: String,
    pub database_path: PathBuf,
    pub page_size: u32,
    pub sleep: Duration,
    pub max_retries: u32,
    pub signature_change: SignatureChangePolicy,
    pub run_once: bool,
}

/// Validated settings for the download loop.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct DownloadSettings {
    /// Listing API, present only when remote cleanup is enabled.
    pub remote: Option<(Url, String)>,
    pub download_host: Url,
    pub root_dir: String,
    pub output_dir: PathBuf,
    pub database_path: PathBuf,
    pub batch_size: u32,
    pub sleep: Duration,
    pub disk_free_floor: u64,
    pub delete_after_download: bool,
    pub preserve_structure: bool,
    pub max_retries: u32,
    pub max_pass_retries: u32,
    pub lease: Duration,
    pub retry_failed: bool,
    pub run_once: bool,
}

impl CrawlArgs {
    /// Validates the arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a missing or malformed URL or token, or a
    /// zero page size.
    pub fn into_settings(self) -> Result<CrawlSettings, ConfigError> {
        let api_base = parse_url("API_BASE_URL", self.api_base_url.as_deref())?;
        let api_token = required("API_TOKEN", self.api_token, "")?;
        let page_size = positive("PAGE_SIZE", self.page_size)?;

        Ok(CrawlSettings {
            api_base,
            api_token,
            root_dir: normalize_path(&self.common.root_dir),
            database_path: self.common.database_path,
            page_size,
            sleep: Duration::from_secs(self.common.sleep_secs),
            max_retries: self.common.max_retries,
            signature_change: self.signature_change,
            run_once: self.common.once,
        })
    }
}

impl DownloadArgs {
    /// Validates the arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a missing or malformed download host, a
    /// zero batch size or lease, or missing API credentials when remote
    /// cleanup is enabled.
    pub fn into_settings(self) -> Result<DownloadSettings, ConfigError> {
        let download_host = parse_url("DOWNLOAD_HOST", self.download_host.as_deref())?;
        let batch_size = positive("BATCH_SIZE", self.batch_size)?;
        if self.lease_secs == 0 {
            return Err(ConfigError::Zero { name: "LEASE_SECS" });
        }

        let remote = if self.delete_after_download {
            const HINT: &str = " when DELETE_AFTER_DOWNLOAD is set";
            let api_base = match self.api_base_url.as_deref() {
                Some(raw) if !raw.trim().is_empty() => parse_url("API_BASE_URL", Some(raw))?,
                _ => {
                    return Err(ConfigError::Missing {
                        name: "API_BASE_URL",
                        hint: HINT,
                    });
                }
            };
            let token = required("API_TOKEN", self.api_token, HINT)?;
            Some((api_base, token))
        } else {
            None
        };

        Ok(DownloadSettings {
            remote,
            download_host,
            root_dir: normalize_path(&self.common.root_dir),
            output_dir: self.output_dir,
            database_path: self.common.database_path,
            batch_size,
            sleep: Duration::from_secs(self.common.sleep_secs),
            disk_free_floor: self.disk_free_floor,
            delete_after_download: self.delete_after_download,
            preserve_structure: self.preserve_structure,
            max_retries: self.common.max_retries,
            max_pass_retries: self.max_pass_retries,
            lease: Duration::from_secs(self.lease_secs),
            retry_failed: self.retry_failed,
            run_once: self.common.once,
        })
    }
}

fn parse_url(name: &'static str, value: Option<&str>) -> Result<Url, ConfigError> {
    let raw = match value.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Err(ConfigError::Missing { name, hint: "" }),
    };
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            name,
            value: raw.to_string(),
            reason: "scheme must be http or https".to_string(),
        });
    }
    Ok(url)
}

fn required(
    name: &'static str,
    value: Option<String>,
    hint: &'static str,
) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing { name, hint }),
    }
}

fn positive(name: &'static str, value: u32) -> Result<u32, ConfigError> {
    if value == 0 {
        Err(ConfigError::Zero { name })
    } else {
        Ok(value)
    }
}
