//! Error types for the remote file-tree API.

use thiserror::Error;

use crate::retry::{FailureType, classify_http_status, classify_transport_error};

/// Errors returned by listing and removal calls.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error calling {url}: {source}")]
    Network {
        /// The endpoint that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout calling {url}")]
    Timeout {
        /// The endpoint that timed out.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// The endpoint that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// The response did not have the expected shape.
    #[error("unexpected response from {url}: {reason}")]
    Protocol {
        /// The endpoint that answered.
        url: String,
        /// What was wrong with the response.
        reason: String,
    },

    /// A configured base URL could not be joined with an endpoint path.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The URL that failed to parse.
        url: String,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl RemoteError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16, retry_after: Option<String>) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a protocol error.
    pub fn protocol(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Classifies this error for retry decisions.
    #[must_use]
    pub fn failure_type(&self) -> FailureType {
        match self {
            Self::Timeout { .. } => FailureType::Transient,
            Self::Network { source, .. } => classify_transport_error(source),
            Self::HttpStatus { status, .. } => classify_http_status(*status),
            Self::Protocol { .. } | Self::InvalidUrl { .. } | Self::Client(_) => {
                FailureType::Permanent
            }
        }
    }

    /// Returns the raw Retry-After header, if the server sent one.
    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { retry_after, .. } => retry_after.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_http_status_display() {
        let error = RemoteError::http_status("http://api/api/fs/list", 502, None);
        let msg = error.to_string();
        assert!(msg.contains("502"), "Expected '502' in: {msg}");
        assert!(msg.contains("/api/fs/list"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_remote_error_classification() {
        assert_eq!(
            RemoteError::timeout("http://api").failure_type(),
            FailureType::Transient
        );
        assert_eq!(
            RemoteError::http_status("http://api", 503, None).failure_type(),
            FailureType::Transient
        );
        assert_eq!(
            RemoteError::http_status("http://api", 401, None).failure_type(),
            FailureType::NeedsAuth
        );
        assert_eq!(
            RemoteError::protocol("http://api", "missing entries").failure_type(),
            FailureType::Permanent
        );
    }

    #[test]
    fn test_remote_error_retry_after() {
        let error = RemoteError::http_status("http://api", 429, Some("7".to_string()));
        assert_eq!(error.retry_after(), Some("7"));
        assert_eq!(RemoteError::timeout("http://api").retry_after(), None);
    }
}
