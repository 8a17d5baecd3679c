//! Whole-download retry with exponential backoff.
//!
//! The coordinator itself never retries: any segment failure ends the
//! download. This module sits above [`Downloader::start`] and re-runs the
//! whole download when the failure looks transient.
//!
//! Errors are classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - network trouble, 5xx, short or broken bodies
//! - [`FailureType::RateLimited`] - HTTP 429, retried with backoff
//! - [`FailureType::Permanent`] - bad input, 4xx, local IO, cancellation
//!
//! # Example
//!
//! ```
//! use rangedl::download::{
//!     ByteRange, DownloadError, FailureType, RetryDecision, RetryPolicy, classify_error,
//! };
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::request_status(
//!     "https://example.com/file.iso",
//!     ByteRange::new(0, 1024),
//!     503,
//!     "HTTP 503",
//! );
//! assert_eq!(classify_error(&error), FailureType::Transient);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => println!("Not retrying: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, instrument, warn};

use super::coordinator::{DownloadHandle, DownloadOutcome, Downloader};
use super::error::DownloadError;

/// Default maximum attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;
const MAX_JITTER: Duration = Duration::from_millis(500);

/// How a failed download should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed if the whole download is started again.
    Transient,
    /// Will fail the same way every time.
    Permanent,
    /// The server asked us to slow down (HTTP 429).
    RateLimited,
}

/// Outcome of [`RetryPolicy::should_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Start again after `delay`.
    Retry {
        /// How long to wait first.
        delay: Duration,
        /// Number of the upcoming attempt (1-indexed).
        attempt: u32,
    },
    /// Give up.
    DoNotRetry {
        /// Why no further attempt is made.
        reason: String,
    },
}

/// Exponential backoff settings.
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt - 1), max_delay) + jitter
/// ```
///
/// With the defaults the delays are roughly 1s then 2s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is raised to at least 1.
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
        }
    }

    /// Default backoff with a custom attempt limit.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::with_max_attempts(1)
    }

    /// Maximum attempts, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what to do after `attempt` (1-indexed) failed.
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(attempt, delay_ms = delay.as_millis(), "will retry");
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
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + jitter()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn jitter() -> Duration {
    let max_ms = MAX_JITTER.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// Classifies a download error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | `Probe`/`Request` with 429 | RateLimited |
/// | `Probe`/`Request` with 408 or 5xx | Transient |
/// | `Probe`/`Request` with other 4xx | Permanent |
/// | `Probe`/`Request` transport failure | Transient |
/// | `Read`, `CorruptSegment`, `Integrity`, `TaskFailed` | Transient |
/// | `InvalidUrl`, `InvalidConfig`, `SizeUnknown`, `Write`, `Cancelled` | Permanent |
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::Probe { status, .. } | DownloadError::Request { status, .. } => {
            status.map_or(FailureType::Transient, classify_http_status)
        }
        DownloadError::Read { .. }
        | DownloadError::CorruptSegment { .. }
        | DownloadError::Integrity { .. }
        | DownloadError::TaskFailed { .. } => FailureType::Transient,
        DownloadError::InvalidUrl { .. }
        | DownloadError::InvalidConfig { .. }
        | DownloadError::SizeUnknown { .. }
        | DownloadError::Write { .. }
        | DownloadError::Cancelled { .. } => FailureType::Permanent,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        500..=599 => FailureType::Transient,
        // A 2xx here means a ranged request came back without 206.
        200..=299 => FailureType::Permanent,
        _ => FailureType::Permanent,
    }
}

/// Downloads `url`, starting over after transient failures.
///
/// `on_attempt` is called with the attempt number and the fresh handle each
/// time a download is started, so the caller can attach progress reporting.
///
/// # Errors
///
/// Returns the error of the last attempt when it is permanent or the policy
/// is exhausted.
#[instrument(skip_all, fields(url = %url))]
pub async fn download_with_retry<F>(
    downloader: &Downloader,
    url: &str,
    policy: &RetryPolicy,
    mut on_attempt: F,
) -> Result<DownloadOutcome, DownloadError>
where
    F: FnMut(u32, &DownloadHandle),
{
    let mut attempt = 1;
    loop {
        let handle = downloader.start(url)?;
        on_attempt(attempt, &handle);

        let error = match handle.await_result().await {
            Ok(outcome) => {
                if attempt > 1 {
                    info!(attempt, "download succeeded after retry");
                }
                return Ok(outcome);
            }
            Err(error) => error,
        };

        match policy.should_retry(classify_error(&error), attempt) {
            RetryDecision::Retry {
                delay,
                attempt: next,
            } => {
                warn!(
                    attempt,
                    error = %error,
                    delay_ms = delay.as_millis(),
                    "download failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt = next;
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(attempt, %reason, "not retrying");
                return Err(error);
            }
        }
    }
}
