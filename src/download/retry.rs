//! Retry logic with linear backoff for transient transfer failures.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying transfer errors and determining retry behavior.
//!
//! # Overview
//!
//! When a transfer fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - the network misbehaved (reset, truncated body, timeout)
//! - [`FailureType::Permanent`] - the server said no, or the failure is local
//!
//! Only transient failures are retried. The delay before retry `n + 1` is
//! `backoff_base * n`, so with the defaults the waits are 1s, 2s, 3s, 4s.
//!
//! # Example
//!
//! ```
//! use manga_core::download::{DownloadError, RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::timeout("https://example.com/0001-001.png");
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::DownloadError;

/// Default maximum attempts per page.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default backoff base (1 second); attempt `n` waits `n` times this.
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Classification of transfer failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: connection reset, truncated body, timeout.
    Transient,

    /// Failure that will not succeed regardless of retries.
    ///
    /// Examples: any non-2xx status, invalid URL, local IO error.
    Permanent,
}

/// Decision on whether to retry a failed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the transfer after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry the transfer.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with linear backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = backoff_base * failed_attempt
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Unit delay multiplied by the failed attempt number.
    backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum attempts including initial (clamped to >= 1)
    /// * `backoff_base` - Unit delay for linear backoff
    #[must_use]
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using the default backoff base.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the backoff unit delay.
    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    /// Determines whether to retry a failed transfer.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.backoff_base.saturating_mul(attempt);

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
}

/// Classifies a transfer error into a failure type for retry decisions.
///
/// | Error | Type | Rationale |
/// |-------|------|-----------|
/// | Timeout | Transient | Network may recover |
/// | Network | Transient | Reset or truncated body |
/// | `HttpStatus` | Permanent | The server answered; asking again will not change it |
/// | Io | Permanent | Local file system issue |
/// | `InvalidUrl` | Permanent | Won't succeed |
#[instrument]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::Timeout { .. } | DownloadError::Network { .. } => FailureType::Transient,
        DownloadError::HttpStatus { .. }
        | DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. } => FailureType::Permanent,
    }
}
