//! Per-key sliding-window rate limiting.
//!
//! This module provides the [`RateLimiter`] struct which admits at most
//! `max_calls` requests per key in any trailing `per` interval. Page traffic
//! is keyed by host (see [`extract_domain`]); catalog endpoints use their own
//! keys so they get separate, stricter budgets than bulk page probing.
//!
//! # Overview
//!
//! Keys are independent windows: requests under different keys never wait
//! for each other. Within one key, eviction of expired admissions, the
//! capacity check and recording the new admission happen inside one mutex
//! region, so two concurrent callers can never both see the last free slot.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use manga_core::download::{Quota, RateLimiter};
//!
//! # async fn example() {
//! let limiter = Arc::new(
//!     RateLimiter::new(Quota::new(20, Duration::from_secs(1)))
//!         .with_quota("catalog-at-home", Quota::new(40, Duration::from_secs(60))),
//! );
//!
//! // Page traffic, keyed by host
//! limiter.acquire("scans.example.com").await;
//!
//! // Catalog traffic, separate budget
//! limiter.acquire("catalog-at-home").await;
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::CUMULATIVE_DELAY_WARNING_THRESHOLD;

/// Admission budget for one key: at most `max_calls` in any trailing `per`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    max_calls: usize,
    per: Duration,
}

impl Quota {
    /// Creates a quota. `max_calls` is clamped to at least 1.
    #[must_use]
    pub fn new(max_calls: usize, per: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            per,
        }
    }

    /// Returns the maximum admissions per window.
    #[must_use]
    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    /// Returns the window length.
    #[must_use]
    pub fn per(&self) -> Duration {
        self.per
    }
}

/// Per-key sliding-window rate limiter.
///
/// Designed to be wrapped in `Arc` and shared across Tokio tasks. `DashMap`
/// holds the per-key state; each key's admission log sits behind a
/// `tokio::sync::Mutex` that is held while waiting for capacity, so waiting
/// callers are parked rather than spinning.
#[derive(Debug)]
pub struct RateLimiter {
    /// Quota applied to keys without an override.
    default_quota: Quota,

    /// Per-key overrides (catalog endpoint classes).
    overrides: HashMap<String, Quota>,

    /// Whether rate limiting is disabled.
    disabled: bool,

    /// Per-key state. Arc lets us release the `DashMap` shard lock before awaiting.
    windows: DashMap<String, Arc<KeyWindow>>,
}

/// State tracked for each key.
#[derive(Debug)]
struct KeyWindow {
    quota: Quota,

    /// Admission instants still inside the trailing window, oldest first.
    admitted: Mutex<VecDeque<Instant>>,

    /// Total time callers spent waiting on this key (milliseconds).
    cumulative_delay_ms: AtomicU64,
}

impl KeyWindow {
    fn new(quota: Quota) -> Self {
        Self {
            quota,
            admitted: Mutex::new(VecDeque::with_capacity(quota.max_calls)),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Adds to the cumulative delay and returns the new total.
    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

/// Drops admissions that have aged out of the window ending at `now`.
fn evict_expired(admitted: &mut VecDeque<Instant>, per: Duration, now: Instant) {
    while let Some(oldest) = admitted.front() {
        if now.saturating_duration_since(*oldest) >= per {
            admitted.pop_front();
        } else {
            break;
        }
    }
}

impl RateLimiter {
    /// Creates a limiter applying `default_quota` to every key.
    #[must_use]
    #[instrument(skip_all, fields(max_calls = default_quota.max_calls, per_ms = default_quota.per.as_millis()))]
    pub fn new(default_quota: Quota) -> Self {
        debug!("creating rate limiter");
        Self {
            default_quota,
            overrides: HashMap::new(),
            disabled: false,
            windows: DashMap::new(),
        }
    }

    /// Creates a disabled rate limiter that admits every call immediately.
    #[must_use]
    #[instrument]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            default_quota: Quota::new(usize::MAX, Duration::ZERO),
            overrides: HashMap::new(),
            disabled: true,
            windows: DashMap::new(),
        }
    }

    /// Gives `key` its own quota instead of the default.
    ///
    /// Overrides apply even when the default is disabled, so catalog budgets
    /// hold when page throttling is turned off.
    #[must_use]
    pub fn with_quota(mut self, key: impl Into<String>, quota: Quota) -> Self {
        self.overrides.insert(key.into(), quota);
        self
    }

    /// Returns whether default rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the quota that applies to `key`, or `None` if it is unthrottled.
    #[must_use]
    pub fn quota_for(&self, key: &str) -> Option<Quota> {
        match self.overrides.get(key) {
            Some(quota) => Some(*quota),
            None if self.disabled => None,
            None => Some(self.default_quota),
        }
    }

    /// Waits until `key` has capacity, then records an admission.
    ///
    /// Callers are admitted in lock order; while one caller sleeps waiting
    /// for the oldest admission to age out, later callers queue on the mutex.
    #[instrument(skip(self))]
    pub async fn acquire(&self, key: &str) {
        let Some(quota) = self.quota_for(key) else {
            return;
        };

        // Clone the Arc so the DashMap shard lock is released before awaiting
        let window = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(KeyWindow::new(quota)))
            .clone();

        let mut admitted = window.admitted.lock().await;

        loop {
            let now = Instant::now();
            evict_expired(&mut admitted, window.quota.per, now);

            if admitted.len() < window.quota.max_calls {
                admitted.push_back(now);
                return;
            }

            let Some(oldest) = admitted.front().copied() else {
                // max_calls >= 1, so a full window is never empty
                admitted.push_back(now);
                return;
            };
            let delay = (oldest + window.quota.per).saturating_duration_since(now);
            let cumulative = window.add_cumulative_delay(delay);

            debug!(
                key,
                delay_ms = delay.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "window full, waiting for capacity"
            );

            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                warn!(
                    key,
                    cumulative_delay_secs = cumulative.as_secs(),
                    "excessive rate limiting - consider lowering worker count"
                );
            }

            tokio::time::sleep(delay).await;
        }
    }

    /// Returns the total time callers have waited on `key` so far.
    #[must_use]
    pub fn cumulative_delay(&self, key: &str) -> Duration {
        self.windows.get(key).map_or(Duration::ZERO, |window| {
            Duration::from_millis(window.cumulative_delay_ms.load(Ordering::SeqCst))
        })
    }
}

/// Extracts the lowercase host from a URL for use as a rate limit key.
///
/// Returns "unknown" for malformed URLs, ensuring all requests are still
/// rate limited even if the URL cannot be parsed.
///
/// # Examples
///
/// ```
/// use manga_core::download::rate_limiter::extract_domain;
///
/// assert_eq!(extract_domain("https://Scans.Example.US/manga/x/0001-001.png"), "scans.example.us");
/// assert_eq!(extract_domain("https://localhost:8080/x"), "localhost");
/// assert_eq!(extract_domain("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn per_second(max_calls: usize) -> Quota {
        Quota::new(max_calls, Duration::from_secs(1))
    }

    // ==================== RateLimiter Tests ====================

    #[test]
    fn test_quota_clamps_zero_calls() {
        assert_eq!(Quota::new(0, Duration::from_secs(1)).max_calls(), 1);
    }

    #[test]
    fn test_disabled_limiter_reports_no_quota() {
        let limiter = RateLimiter::disabled();
        assert!(limiter.is_disabled());
        assert_eq!(limiter.quota_for("example.com"), None);
    }

    #[test]
    fn test_override_applies_even_when_disabled() {
        let limiter = RateLimiter::disabled().with_quota("catalog-list", per_second(5));
        assert_eq!(limiter.quota_for("catalog-list"), Some(per_second(5)));
        assert_eq!(limiter.quota_for("example.com"), None);
    }

    #[tokio::test]
    async fn test_disabled_limiter_no_delay() {
        tokio::time::pause();

        let limiter = RateLimiter::disabled();
        let start = Instant::now();
        for _ in 0..50 {
            limiter.acquire("example.com").await;
        }

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_calls_within_quota_are_immediate() {
        tokio::time::pause();

        let limiter = RateLimiter::new(per_second(5));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire("example.com").await;
        }

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_call_over_quota_waits_for_oldest_to_age_out() {
        tokio::time::pause();

        let limiter = RateLimiter::new(per_second(2));
        let start = Instant::now();

        limiter.acquire("example.com").await;
        tokio::time::advance(Duration::from_millis(400)).await;
        limiter.acquire("example.com").await;

        // Third call must wait until the first admission (t=0) ages out at t=1s
        limiter.acquire("example.com").await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1100), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_keys_are_independent_windows() {
        tokio::time::pause();

        let limiter = RateLimiter::new(per_second(1));
        limiter.acquire("a.example.com").await;

        let start = Instant::now();
        limiter.acquire("b.example.com").await;
        limiter.acquire("catalog-list").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_override_quota_is_stricter_than_default() {
        tokio::time::pause();

        let limiter = RateLimiter::new(per_second(100))
            .with_quota("catalog-at-home", Quota::new(1, Duration::from_secs(60)));

        let start = Instant::now();
        limiter.acquire("catalog-at-home").await;
        limiter.acquire("catalog-at-home").await;
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_concurrent_acquires_never_exceed_quota_per_window() {
        tokio::time::pause();

        let limiter = Arc::new(RateLimiter::new(per_second(5)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire("example.com").await;
                Instant::now()
            }));
        }

        let mut admissions = Vec::new();
        for handle in handles {
            admissions.push(handle.await.unwrap());
        }
        admissions.sort();

        // (20 / 5 - 1) * 1s
        assert!(start.elapsed() >= Duration::from_secs(3));

        // Any six consecutive admissions must span at least one full window
        for pair in admissions.windows(6) {
            assert!(
                pair[5].duration_since(pair[0]) >= Duration::from_secs(1),
                "more than 5 admissions inside one second"
            );
        }
    }

    #[tokio::test]
    async fn test_cumulative_delay_is_tracked_per_key() {
        tokio::time::pause();

        let limiter = RateLimiter::new(per_second(1));
        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;

        assert!(limiter.cumulative_delay("example.com") >= Duration::from_millis(900));
        assert_eq!(limiter.cumulative_delay("other.com"), Duration::ZERO);
    }

    // ==================== extract_domain Tests ====================

    #[test]
    fn test_extract_domain_lowercase() {
        assert_eq!(extract_domain("https://Example.COM/Path"), "example.com");
    }

    #[test]
    fn test_extract_domain_with_port() {
        assert_eq!(extract_domain("http://127.0.0.1:8080/a.png"), "127.0.0.1");
    }

    #[test]
    fn test_extract_domain_malformed_url() {
        assert_eq!(extract_domain("not a valid url"), "unknown");
    }

    #[test]
    fn test_extract_domain_empty() {
        assert_eq!(extract_domain(""), "unknown");
    }
}
