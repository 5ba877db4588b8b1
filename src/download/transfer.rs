//! Ranged HTTP transfers into staging files.
//!
//! A transfer always continues from whatever the staging file already
//! holds: a non-empty staging file is resumed with `Range: bytes=<len>-`.
//! A `206` reply is appended; a `200` reply (server ignored the range)
//! rewrites the staging file from scratch. Bytes on disk are always a
//! prefix of the remote file, so an interrupted transfer can be resumed
//! from the observed file length.

use std::path::Path;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_RANGE, RANGE};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::error::DownloadError;
use crate::remote::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::remote::{RemoteError, build_http_client, check_status, join_segments, send_error};

/// What a finished transfer left on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferResult {
    /// Size of the staging file after the transfer.
    pub bytes_on_disk: u64,
    /// Bytes received in this call.
    pub bytes_received: u64,
    /// Whether an existing staging file was extended via a range request.
    pub resumed: bool,
    /// Whether an existing staging file was discarded because the server ignored the range.
    pub restarted: bool,
}

/// Client for the download host.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    download_host: Url,
}

impl Fetcher {
    /// Creates a fetcher with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Client`] if the HTTP client cannot be built.
    pub fn new(download_host: Url) -> Result<Self, RemoteError> {
        let client = build_http_client(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
            .map_err(RemoteError::Client)?;
        Ok(Self::with_client(client, download_host))
    }

    /// Creates a fetcher over an existing reqwest client.
    #[must_use]
    pub fn with_client(client: Client, download_host: Url) -> Self {
        Self {
            client,
            download_host,
        }
    }

    /// Builds `<download_host>/<percent-encoded path>?sign=<signature>`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidUrl`] if the host cannot take a path.
    pub fn download_url(&self, remote_path: &str, signature: &str) -> Result<Url, RemoteError> {
        let mut url = join_segments(
            &self.download_host,
            remote_path.split('/').filter(|s| !s.is_empty()),
        )?;
        url.query_pairs_mut().append_pair("sign", signature);
        Ok(url)
    }

    /// Fetches `url` into `staging`, resuming from the staging file's length.
    ///
    /// A staging file that already holds `expected_size` bytes is returned
    /// as is without a request.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::Integrity`] if the staging file is already larger
    ///   than `expected_size`
    /// - [`DownloadError::Remote`] for transport, status, and range errors
    /// - [`DownloadError::Io`] for local file errors
    #[instrument(skip(self, staging), fields(url = %url, staging = %staging.display()))]
    pub async fn fetch_to_staging(
        &self,
        url: &Url,
        staging: &Path,
        expected_size: u64,
    ) -> Result<TransferResult, DownloadError> {
        let existing = staging_len(staging).await?;

        if let Some(existing) = existing {
            if existing > expected_size {
                return Err(DownloadError::integrity(staging, expected_size, existing));
            }
            if existing == expected_size {
                debug!(bytes = existing, "staging file already complete");
                return Ok(TransferResult {
                    bytes_on_disk: existing,
                    bytes_received: 0,
                    resumed: false,
                    restarted: false,
                });
            }
        }

        let offset = existing.unwrap_or(0);
        let mut request = self.client.get(url.clone());
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = request.send().await.map_err(|e| send_error(url, e))?;
        let response = check_status(url, response)?;

        let append = offset > 0 && response.status().as_u16() == 206;
        if append {
            verify_content_range(url, &response, offset)?;
        }

        let file = if append {
            OpenOptions::new()
                .append(true)
                .open(staging)
                .await
                .map_err(|e| DownloadError::io(staging, e))?
        } else {
            if let Some(parent) = staging.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| DownloadError::io(parent, e))?;
            }
            File::create(staging)
                .await
                .map_err(|e| DownloadError::io(staging, e))?
        };

        let start = if append { offset } else { 0 };
        let received = stream_to_file(file, response, url, staging, start, expected_size).await?;
        let bytes_on_disk = if append {
            offset.saturating_add(received)
        } else {
            received
        };

        debug!(
            bytes_on_disk,
            received,
            resumed = append,
            restarted = offset > 0 && !append,
            "transfer finished"
        );

        Ok(TransferResult {
            bytes_on_disk,
            bytes_received: received,
            resumed: append,
            restarted: offset > 0 && !append,
        })
    }
}

/// Length of the staging file, or `None` if it does not exist.
async fn staging_len(staging: &Path) -> Result<Option<u64>, DownloadError> {
    match tokio::fs::metadata(staging).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(DownloadError::io(staging, e)),
    }
}

/// Checks that a `206` body starts where the staging file ends.
fn verify_content_range(
    url: &Url,
    response: &reqwest::Response,
    offset: u64,
) -> Result<(), DownloadError> {
    let Some(value) = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
    else {
        return Ok(());
    };

    let start = value
        .trim()
        .strip_prefix("bytes ")
        .and_then(|rest| rest.split('-').next())
        .and_then(|start| start.trim().parse::<u64>().ok());

    match start {
        Some(start) if start == offset => Ok(()),
        _ => Err(RemoteError::protocol(
            url.as_str(),
            format!("Content-Range '{value}' does not start at byte {offset}"),
        )
        .into()),
    }
}

/// Streams a response body to `file`, returning bytes written.
///
/// `start` is the file length the body continues from. A body that would
/// take the file past `expected_size` is cut off there with
/// [`DownloadError::Integrity`]; the overflowing chunk is not written.
/// On a cut stream the bytes received so far are flushed before the error
/// is returned, so the staging file stays a resumable prefix.
async fn stream_to_file(
    file: File,
    response: reqwest::Response,
    url: &Url,
    file_path: &Path,
    start: u64,
    expected_size: u64,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = match chunk_result {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = writer.flush().await;
                return Err(send_error(url, e).into());
            }
        };

        let on_disk = start + bytes_written + chunk.len() as u64;
        if on_disk > expected_size {
            let _ = writer.flush().await;
            return Err(DownloadError::integrity(file_path, expected_size, on_disk));
        }

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;
    writer
        .get_ref()
        .sync_all()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;

    Ok(bytes_written)
}
