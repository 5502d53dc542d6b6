//! Single-page fetch with retry, write-then-rename and cancellation.
//!
//! The [`Fetcher`] takes one [`WorkItem`] to local storage. A page that is
//! already on disk is never re-fetched, and a page is only ever visible under
//! its final name once its body has been completely written, so an
//! interrupted run can simply be started again. Every attempt writes to its
//! own uniquely named `.part` file, so concurrent fetches never share one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::client::HttpClient;
use super::constants::PARTIAL_SUFFIX;
use super::error::DownloadError;
use super::rate_limiter::{RateLimiter, extract_domain};
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use crate::cancel::CancelToken;
use crate::discovery::WorkItem;

/// Moves bytes from an address into a local file.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Writes the body of `url` to `path`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns a [`DownloadError`] describing why the transfer failed.
    async fn fetch_to(&self, url: &str, path: &Path) -> Result<u64, DownloadError>;
}

#[async_trait]
impl Transport for HttpClient {
    async fn fetch_to(&self, url: &str, path: &Path) -> Result<u64, DownloadError> {
        HttpClient::fetch_to(self, url, path).await
    }
}

/// Outcome of fetching one [`WorkItem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadResult {
    /// The page was transferred and renamed to this path.
    Saved(PathBuf),
    /// A file with this name already existed; no network call was made.
    AlreadyPresent(PathBuf),
    /// Retries were exhausted or the failure was permanent.
    Failed(String),
    /// Cancellation was requested before the transfer started.
    Skipped,
}

/// Fetches single pages with linear-backoff retry.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("policy", &self.policy)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    /// Creates a fetcher.
    ///
    /// # Arguments
    ///
    /// * `transport` - Moves the bytes (the shared `HttpClient` in production)
    /// * `limiter` - Every attempt acquires this limiter under the page's host
    /// * `policy` - Attempt budget and backoff unit
    /// * `cancel` - Checked before each attempt
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        cancel: CancelToken,
    ) -> Self {
        Self {
            transport,
            limiter,
            policy,
            cancel,
        }
    }

    /// Returns the retry policy in use.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetches `item` into its destination directory.
    ///
    /// The local name is [`WorkItem::file_name`]. Each attempt writes the
    /// body to a fresh `.{name}.XXXXXX.part` file in the destination and
    /// renames it once complete; the partial file is removed after any
    /// failed attempt.
    #[instrument(skip(self, item), fields(url = %item.address))]
    pub async fn fetch(&self, item: &WorkItem) -> DownloadResult {
        let Some(file_name) = item.file_name() else {
            return DownloadResult::Failed(format!(
                "cannot derive a file name from {}",
                item.address
            ));
        };
        let final_path = item.destination.join(&file_name);

        if tokio::fs::try_exists(&final_path).await.unwrap_or(false) {
            debug!(path = %final_path.display(), "already present");
            return DownloadResult::AlreadyPresent(final_path);
        }

        let temp_prefix = format!(".{file_name}.");
        let limiter_key = extract_domain(&item.address);
        let mut attempt = 1;

        loop {
            if self.cancel.is_cancelled() {
                debug!("cancelled before attempt");
                return DownloadResult::Skipped;
            }

            self.limiter.acquire(&limiter_key).await;

            let error = match self.attempt(item, &temp_prefix, &final_path).await {
                Ok(bytes) => {
                    debug!(path = %final_path.display(), bytes, "page saved");
                    return DownloadResult::Saved(final_path);
                }
                Err(e) => e,
            };

            match self.policy.should_retry(classify_error(&error), attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next_attempt;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(attempt, reason = %reason, "giving up");
                    return DownloadResult::Failed(error.to_string());
                }
            }
        }
    }

    /// One transfer into a unique partial file, renamed onto `final_path`.
    ///
    /// The partial file is deleted when this returns an error.
    async fn attempt(
        &self,
        item: &WorkItem,
        temp_prefix: &str,
        final_path: &Path,
    ) -> Result<u64, DownloadError> {
        let partial = tempfile::Builder::new()
            .prefix(temp_prefix)
            .suffix(PARTIAL_SUFFIX)
            .tempfile_in(&item.destination)
            .map_err(|e| DownloadError::io(&item.destination, e))?
            .into_temp_path();

        let bytes = self.transport.fetch_to(&item.address, &partial).await?;
        partial
            .persist(final_path)
            .map_err(|e| DownloadError::io(final_path, e.error))?;
        Ok(bytes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::time::Instant;

    use super::*;

    /// Transport that fails transiently `failures` times, then writes `body`.
    struct FlakyTransport {
        failures: u32,
        calls: AtomicU32,
        body: &'static [u8],
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                body: b"page bytes",
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn fetch_to(&self, url: &str, path: &Path) -> Result<u64, DownloadError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                // Leave a truncated body behind, as a dropped connection would
                tokio::fs::write(path, b"trunc").await.unwrap();
                return Err(DownloadError::network_message(url, "connection reset"));
            }
            tokio::fs::write(path, self.body).await.unwrap();
            Ok(self.body.len() as u64)
        }
    }

    struct StatusTransport(u16, AtomicU32);

    #[async_trait]
    impl Transport for StatusTransport {
        async fn fetch_to(&self, url: &str, _path: &Path) -> Result<u64, DownloadError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Err(DownloadError::http_status(url, self.0))
        }
    }

    fn fetcher(transport: Arc<dyn Transport>, cancel: CancelToken) -> Fetcher {
        Fetcher::new(
            transport,
            Arc::new(RateLimiter::disabled()),
            RetryPolicy::default(),
            cancel,
        )
    }

    /// Names of in-progress files left in `dir`.
    fn leftover_partials(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(PARTIAL_SUFFIX))
            .collect()
    }

    fn item(dir: &Path) -> WorkItem {
        WorkItem::new("https://scans.example.us/manga/x/0001-001.png", dir)
    }

    #[tokio::test]
    async fn test_fetch_then_refetch_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let transport = Arc::new(FlakyTransport::new(0));
        let fetcher = fetcher(transport.clone(), CancelToken::new());
        let item = item(temp_dir.path());
        let expected = temp_dir.path().join("0001-001.png");

        let first = fetcher.fetch(&item).await;
        let bytes_after_first = std::fs::read(&expected).unwrap();
        let second = fetcher.fetch(&item).await;

        assert_eq!(first, DownloadResult::Saved(expected.clone()));
        assert_eq!(second, DownloadResult::AlreadyPresent(expected.clone()));
        assert_eq!(transport.calls(), 1);
        assert_eq!(std::fs::read(&expected).unwrap(), bytes_after_first);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success_leaves_no_partial() {
        tokio::time::pause();
        let temp_dir = TempDir::new().unwrap();
        let transport = Arc::new(FlakyTransport::new(2));
        let fetcher = fetcher(transport.clone(), CancelToken::new());

        let result = fetcher.fetch(&item(temp_dir.path())).await;

        assert!(matches!(result, DownloadResult::Saved(_)));
        assert_eq!(transport.calls(), 3);
        assert!(leftover_partials(temp_dir.path()).is_empty());
        assert_eq!(
            std::fs::read(temp_dir.path().join("0001-001.png")).unwrap(),
            b"page bytes"
        );
    }

    #[tokio::test]
    async fn test_retry_exhaustion_makes_max_attempts_with_linear_backoff() {
        tokio::time::pause();
        let temp_dir = TempDir::new().unwrap();
        let transport = Arc::new(FlakyTransport::new(u32::MAX));
        let fetcher = fetcher(transport.clone(), CancelToken::new());

        let start = Instant::now();
        let result = fetcher.fetch(&item(temp_dir.path())).await;
        let elapsed = start.elapsed();

        assert!(matches!(result, DownloadResult::Failed(_)));
        assert_eq!(transport.calls(), 5);
        // 1s + 2s + 3s + 4s
        assert!(elapsed >= Duration::from_secs(10), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(11), "elapsed {elapsed:?}");
        assert!(!temp_dir.path().join("0001-001.png").exists());
        assert!(leftover_partials(temp_dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_fetches_of_one_page_both_succeed() {
        let temp_dir = TempDir::new().unwrap();
        let transport = Arc::new(FlakyTransport::new(0));
        let fetcher = fetcher(transport.clone(), CancelToken::new());
        let item = item(temp_dir.path());
        let expected = temp_dir.path().join("0001-001.png");

        let (first, second) = tokio::join!(fetcher.fetch(&item), fetcher.fetch(&item));

        for result in [first, second] {
            assert!(
                matches!(
                    &result,
                    DownloadResult::Saved(p) | DownloadResult::AlreadyPresent(p) if *p == expected
                ),
                "unexpected {result:?}"
            );
        }
        assert!(transport.calls() >= 1);
        assert_eq!(std::fs::read(&expected).unwrap(), b"page bytes");
        assert!(leftover_partials(temp_dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_local_name_override_sets_saved_path() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = fetcher(Arc::new(FlakyTransport::new(0)), CancelToken::new());
        let item = item(temp_dir.path()).with_local_name("0001-001.mirror2.png");

        let result = fetcher.fetch(&item).await;

        assert_eq!(
            result,
            DownloadResult::Saved(temp_dir.path().join("0001-001.mirror2.png"))
        );
        assert!(!temp_dir.path().join("0001-001.png").exists());
    }

    #[tokio::test]
    async fn test_http_status_fails_immediately() {
        let temp_dir = TempDir::new().unwrap();
        let transport = Arc::new(StatusTransport(503, AtomicU32::new(0)));
        let fetcher = fetcher(transport.clone(), CancelToken::new());

        let result = fetcher.fetch(&item(temp_dir.path())).await;

        match result {
            DownloadResult::Failed(message) => assert!(message.contains("503")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(transport.1.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let transport = Arc::new(FlakyTransport::new(0));
        let cancel = CancelToken::new();
        cancel.cancel();
        let fetcher = fetcher(transport.clone(), cancel);

        let result = fetcher.fetch(&item(temp_dir.path())).await;

        assert_eq!(result, DownloadResult::Skipped);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_present_file_wins_over_cancellation() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("0001-001.png"), b"old").unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let fetcher = fetcher(Arc::new(FlakyTransport::new(0)), cancel);

        let result = fetcher.fetch(&item(temp_dir.path())).await;

        assert!(matches!(result, DownloadResult::AlreadyPresent(_)));
    }

    #[tokio::test]
    async fn test_address_without_file_name_fails() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = fetcher(Arc::new(FlakyTransport::new(0)), CancelToken::new());
        let item = WorkItem::new("https://example.com/manga/", temp_dir.path());

        assert!(matches!(fetcher.fetch(&item).await, DownloadResult::Failed(_)));
    }
}
