//! Retry logic with exponential backoff for transient remote failures.
//!
//! Shared by the crawler (listing calls) and the download engine (ranged
//! transfers). Errors are classified into a [`FailureType`]; a
//! [`RetryPolicy`] then decides whether and when to try again.
//!
//! # Example
//!
//! ```
//! use harvester_core::retry::{FailureType, RetryDecision, RetryPolicy, classify_http_status};
//!
//! let policy = RetryPolicy::default();
//! let failure_type = classify_http_status(503);
//!
//! match policy.should_retry(failure_type, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

/// Default maximum attempts per call (including the first).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Default maximum jitter added to delays (500ms).
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(500);

/// Longest Retry-After value honored (1 hour).
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Classification of remote call failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, 5xx server errors, a cut body stream.
    Transient,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, malformed listing JSON, local IO errors.
    Permanent,

    /// The API token was rejected (401/403).
    NeedsAuth,

    /// Server rate limiting (HTTP 429).
    RateLimited,
}

impl FailureType {
    /// Returns true if another attempt may succeed.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// Decision on whether to retry a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt-1), max_delay) + jitter
/// ```
///
/// With defaults, delays are approximately: 1s, 2s, 4s (before hitting max attempts).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f32,

    /// Upper bound of the random jitter.
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Replaces the jitter bound.
    #[must_use]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::NeedsAuth => {
                return RetryDecision::DoNotRetry {
                    reason: "authentication rejected - check the API token".to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt 1 = 1x base
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);

        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..=max_ms))
    }
}

/// Classifies an HTTP status code into a failure type.
///
/// | Status | Type |
/// |--------|------|
/// | 401, 403 | NeedsAuth |
/// | 408 | Transient |
/// | 429 | RateLimited |
/// | other 4xx | Permanent |
/// | 5xx | Transient |
/// | anything else | Permanent |
#[must_use]
#[allow(clippy::match_same_arms)]
pub fn classify_http_status(status: u16) -> FailureType {
    match status {
        401 | 403 => FailureType::NeedsAuth,
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

/// Classifies a reqwest transport error.
///
/// TLS/certificate problems are configuration errors; everything else
/// (refused connection, reset, DNS hiccup) may recover.
#[must_use]
pub fn classify_transport_error(error: &reqwest::Error) -> FailureType {
    let text = error.to_string().to_lowercase();
    if text.contains("certificate")
        || text.contains("tls")
        || text.contains("ssl")
        || text.contains("handshake")
    {
        FailureType::Permanent
    } else {
        FailureType::Transient
    }
}

/// Parses a `Retry-After` header given in seconds.
///
/// Negative or non-numeric values yield `None`; values above
/// [`MAX_RETRY_AFTER`] are capped.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let seconds = header_value.trim().parse::<i64>().ok()?;
    let seconds = u64::try_from(seconds).ok()?;
    let duration = Duration::from_secs(seconds);

    if duration > MAX_RETRY_AFTER {
        warn!(
            seconds,
            max_seconds = MAX_RETRY_AFTER.as_secs(),
            "Retry-After exceeds maximum, capping"
        );
        return Some(MAX_RETRY_AFTER);
    }

    Some(duration)
}
