//! HTTP client for the remote listing and removal endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use tracing::{debug, instrument};
use url::Url;

use super::RemoteTree;
use super::constants::{
    API_CALL_TIMEOUT_SECS, CONNECT_TIMEOUT_SECS, LIST_ENDPOINT, READ_TIMEOUT_SECS, REMOVE_ENDPOINT,
    USER_AGENT,
};
use super::error::RemoteError;
use super::types::{ListPage, RemoveRequest};

/// Builds the shared reqwest client.
///
/// `read_timeout` bounds the gap between body chunks rather than the whole
/// transfer, so large files are not cut off.
///
/// # Errors
///
/// Returns the reqwest builder error (TLS backend initialization).
pub fn build_http_client(
    connect_timeout_secs: u64,
    read_timeout_secs: u64,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .read_timeout(Duration::from_secs(read_timeout_secs))
        .user_agent(USER_AGENT)
        .build()
}

/// Appends endpoint segments to a base URL, keeping any base path prefix.
pub(crate) fn join_segments<'a>(
    base: &Url,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url, RemoteError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| RemoteError::invalid_url(base.as_str()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Maps a send failure to the timeout/network variants.
pub(crate) fn send_error(url: &Url, error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::timeout(url.as_str())
    } else {
        RemoteError::network(url.as_str(), error)
    }
}

/// Turns a non-success response into [`RemoteError::HttpStatus`].
pub(crate) fn check_status(
    url: &Url,
    response: reqwest::Response,
) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    Err(RemoteError::http_status(
        url.as_str(),
        status.as_u16(),
        retry_after,
    ))
}

/// Authenticated client for `GET /api/fs/list` and `POST /api/fs/remove`.
///
/// Created once per process and cloned freely; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    client: Client,
    api_base: Url,
    token: String,
}

impl RemoteClient {
    /// Creates a client with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Client`] if the HTTP client cannot be built.
    pub fn new(api_base: Url, token: impl Into<String>) -> Result<Self, RemoteError> {
        let client = build_http_client(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
            .map_err(RemoteError::Client)?;
        Ok(Self::with_client(client, api_base, token))
    }

    /// Creates a client over an existing reqwest client.
    #[must_use]
    pub fn with_client(client: Client, api_base: Url, token: impl Into<String>) -> Self {
        Self {
            client,
            api_base,
            token: token.into(),
        }
    }

    /// Returns the configured API base URL.
    #[must_use]
    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// Fetches one page of a directory listing.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Timeout`]/[`RemoteError::Network`] on transport
    /// failures, [`RemoteError::HttpStatus`] for non-2xx responses, and
    /// [`RemoteError::Protocol`] when the body is not a listing page.
    #[instrument(skip(self), level = "debug")]
    pub async fn list_page(
        &self,
        directory: &str,
        page: u32,
        page_size: u32,
    ) -> Result<ListPage, RemoteError> {
        let mut url = join_segments(&self.api_base, LIST_ENDPOINT)?;
        url.query_pairs_mut()
            .append_pair("dir", directory)
            .append_pair("page", &page.to_string())
            .append_pair("size", &page_size.to_string());

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.token)
            .timeout(Duration::from_secs(API_CALL_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| send_error(&url, e))?;
        let response = check_status(&url, response)?;

        let body = response.bytes().await.map_err(|e| send_error(&url, e))?;
        let page: ListPage = serde_json::from_slice(&body)
            .map_err(|e| RemoteError::protocol(url.as_str(), e.to_string()))?;

        debug!(
            entries = page.entries.len(),
            has_more = page.has_more,
            "listed page"
        );
        Ok(page)
    }

    /// Removes one entry from the remote tree.
    ///
    /// # Errors
    ///
    /// Same transport and status errors as [`list_page`](Self::list_page).
    #[instrument(skip(self), level = "debug")]
    pub async fn remove_entry(&self, directory: &str, name: &str) -> Result<(), RemoteError> {
        let url = join_segments(&self.api_base, REMOVE_ENDPOINT)?;
        let body = RemoveRequest {
            dir: directory,
            names: vec![name],
        };

        let response = self
            .client
            .post(url.clone())
            .bearer_auth(&self.token)
            .timeout(Duration::from_secs(API_CALL_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(&url, e))?;
        check_status(&url, response)?;

        debug!("removed remote entry");
        Ok(())
    }
}

#[async_trait]
impl RemoteTree for RemoteClient {
    async fn list(
        &self,
        directory: &str,
        page: u32,
        page_size: u32,
    ) -> Result<ListPage, RemoteError> {
        self.list_page(directory, page, page_size).await
    }

    async fn remove(&self, directory: &str, name: &str) -> Result<(), RemoteError> {
        self.remove_entry(directory, name).await
    }
}
