//! Download engine for concurrent page downloads.
//!
//! This module provides the `DownloadEngine` which takes the flat list of
//! [`WorkItem`]s produced by discovery and fetches them using a
//! semaphore-based concurrency control pattern. Retries, rate limiting and
//! write-then-rename live in the [`Fetcher`]; the engine owns dispatch,
//! cancellation and the run summary.
//!
//! # Example
//!
//! ```no_run
//! use manga_core::download::{DownloadEngine, DownloadStats, Fetcher, HttpClient, RateLimiter, RetryPolicy};
//! use manga_core::CancelToken;
//! use std::sync::Arc;
//!
//! # async fn example(items: Vec<manga_core::WorkItem>) -> Result<(), Box<dyn std::error::Error>> {
//! let cancel = CancelToken::new();
//! let fetcher = Arc::new(Fetcher::new(
//!     Arc::new(HttpClient::new()?),
//!     Arc::new(RateLimiter::disabled()),
//!     RetryPolicy::default(),
//!     cancel.clone(),
//! ));
//! let engine = DownloadEngine::new(10, fetcher, cancel)?;
//! let stats = Arc::new(DownloadStats::new());
//! let summary = engine.download_all(&items, &stats).await?;
//! println!("saved {}, failed {}", summary.saved, summary.failed);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::fetcher::{DownloadResult, Fetcher};
use crate::cancel::CancelToken;
use crate::discovery::WorkItem;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Error type for download engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Live counters for a download run.
///
/// Uses atomic counters so concurrent download tasks can update them while a
/// progress display reads them.
#[derive(Debug)]
pub struct DownloadStats {
    total: AtomicUsize,
    saved: AtomicUsize,
    already_present: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    started: Instant,
}

impl Default for DownloadStats {
    fn default() -> Self {
        Self {
            total: AtomicUsize::new(0),
            saved: AtomicUsize::new(0),
            already_present: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts, started now.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of items in the current run.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Returns the number of pages transferred this run.
    #[must_use]
    pub fn saved(&self) -> usize {
        self.saved.load(Ordering::SeqCst)
    }

    /// Returns the number of pages found on disk.
    #[must_use]
    pub fn already_present(&self) -> usize {
        self.already_present.load(Ordering::SeqCst)
    }

    /// Returns the number of failed pages.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the number of pages skipped because of cancellation.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Returns the number of items with a final outcome. Never decreases.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.saved() + self.already_present() + self.failed() + self.skipped()
    }

    /// Returns time since the tracker was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Returns pages saved or found per second so far.
    #[must_use]
    pub fn pages_per_second(&self) -> f64 {
        rate(self.saved() + self.already_present(), self.elapsed())
    }

    fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn record(&self, result: &DownloadResult) {
        let counter = match result {
            DownloadResult::Saved(_) => &self.saved,
            DownloadResult::AlreadyPresent(_) => &self.already_present,
            DownloadResult::Failed(_) => &self.failed,
            DownloadResult::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[allow(clippy::cast_precision_loss)]
fn rate(count: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

/// A page that could not be downloaded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FailedItem {
    /// Chapter directory the page belongs in.
    pub destination: PathBuf,
    /// Local name the page would have had.
    pub file_name: String,
    /// Address that failed.
    pub address: String,
    /// Last error seen.
    pub reason: String,
}

impl FailedItem {
    fn new(item: &WorkItem, reason: String) -> Self {
        Self {
            destination: item.destination.clone(),
            file_name: item.file_name().unwrap_or_default(),
            address: item.address.clone(),
            reason,
        }
    }
}

/// Final outcome of [`DownloadEngine::download_all`].
///
/// `saved + already_present + failed + skipped` always equals the number of
/// items submitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Pages transferred this run.
    pub saved: usize,
    /// Pages already on disk.
    pub already_present: usize,
    /// Pages that failed.
    pub failed: usize,
    /// Pages not attempted because of cancellation.
    pub skipped: usize,
    /// Wall time of the run.
    pub elapsed: Duration,
    /// Failed pages, sorted by directory then file name.
    pub failures: Vec<FailedItem>,
}

impl RunSummary {
    /// Returns the number of items accounted for.
    #[must_use]
    pub fn total(&self) -> usize {
        self.saved + self.already_present + self.failed + self.skipped
    }

    /// Returns pages that are on disk after the run.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.saved + self.already_present
    }

    /// Returns pages saved or found per second.
    #[must_use]
    pub fn pages_per_second(&self) -> f64 {
        rate(self.succeeded(), self.elapsed)
    }
}

/// Download engine for concurrent page downloads.
///
/// # Concurrency Model
///
/// - Each page runs in its own Tokio task
/// - A semaphore permit is acquired before starting each download
/// - Permits are released automatically when downloads complete (RAII)
/// - Once cancellation is requested no further tasks are started; items not
///   yet dispatched are counted as skipped
#[derive(Debug)]
pub struct DownloadEngine {
    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
    /// Configured concurrency limit.
    concurrency: usize,
    /// Shared single-page fetcher.
    fetcher: Arc<Fetcher>,
    /// Stops dispatch when set.
    cancel: CancelToken,
}

impl DownloadEngine {
    /// Creates a new download engine.
    ///
    /// # Arguments
    ///
    /// * `concurrency` - Maximum number of concurrent downloads (1-100)
    /// * `fetcher` - Performs each download, including retries
    /// * `cancel` - Checked before each dispatch
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    #[instrument(level = "debug", skip(fetcher, cancel))]
    pub fn new(
        concurrency: usize,
        fetcher: Arc<Fetcher>,
        cancel: CancelToken,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            max_retries = fetcher.policy().max_attempts(),
            "creating download engine"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            fetcher,
            cancel,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Downloads every item, at most `concurrency` at a time.
    ///
    /// Destination directories are created up front. Individual failures are
    /// logged and counted; they never abort the run. `stats` is updated live
    /// so a progress display can poll it while this future runs.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SemaphoreClosed`] if the semaphore is closed.
    #[instrument(skip_all, fields(items = items.len(), concurrency = self.concurrency))]
    pub async fn download_all(
        &self,
        items: &[WorkItem],
        stats: &Arc<DownloadStats>,
    ) -> Result<RunSummary, EngineError> {
        stats.set_total(items.len());
        info!("starting downloads");

        let directories: BTreeSet<&Path> =
            items.iter().map(|item| item.destination.as_path()).collect();
        for directory in directories {
            if let Err(e) = tokio::fs::create_dir_all(directory).await {
                // Items for this directory will fail individually with the IO error
                warn!(path = %directory.display(), error = %e, "failed to create chapter directory");
            }
        }

        let mut handles = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            if self.cancel.is_cancelled() {
                stats.record(&DownloadResult::Skipped);
                continue;
            }

            // Acquire semaphore permit (blocks if at concurrency limit)
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| EngineError::SemaphoreClosed)?;

            // Cancellation may have arrived while waiting for the permit
            if self.cancel.is_cancelled() {
                stats.record(&DownloadResult::Skipped);
                continue;
            }

            let fetcher = Arc::clone(&self.fetcher);
            let stats = Arc::clone(stats);
            let item = item.clone();

            handles.push((
                index,
                tokio::spawn(async move {
                    let _permit = permit;
                    let result = fetcher.fetch(&item).await;
                    stats.record(&result);
                    if let DownloadResult::Failed(reason) = &result {
                        warn!(url = %item.address, error = %reason, "page download failed");
                    }
                    result
                }),
            ));
        }

        debug!(task_count = handles.len(), "waiting for downloads to complete");

        let mut failures = Vec::new();
        for (index, handle) in handles {
            match handle.await {
                Ok(DownloadResult::Failed(reason)) => {
                    failures.push(FailedItem::new(&items[index], reason));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "download task panicked");
                    let reason = format!("download task panicked: {e}");
                    stats.record(&DownloadResult::Failed(reason.clone()));
                    failures.push(FailedItem::new(&items[index], reason));
                }
            }
        }
        failures.sort();

        let summary = RunSummary {
            saved: stats.saved(),
            already_present: stats.already_present(),
            failed: stats.failed(),
            skipped: stats.skipped(),
            elapsed: stats.elapsed(),
            failures,
        };

        info!(
            saved = summary.saved,
            already_present = summary.already_present,
            failed = summary.failed,
            skipped = summary.skipped,
            pages_per_sec = summary.pages_per_second(),
            "downloads complete"
        );

        Ok(summary)
    }
}
