//! Page probing, fetching and the concurrent download engine.
//!
//! This module provides everything between a discovered address and a file
//! on disk.
//!
//! # Features
//!
//! - HEAD-based existence probing that never errors
//! - Per-key sliding-window rate limiting
//! - Streaming page downloads written under a `.part` name, then renamed
//! - Linear-backoff retry for transient transfer failures
//! - Bounded-concurrency download engine with cooperative cancellation
//!
//! # Example
//!
//! ```no_run
//! use manga_core::download::{HttpClient, HttpProber, Prober};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let prober = HttpProber::new(HttpClient::new()?);
//! if prober.exists("https://scans.example.us/manga/x/0001-001.png").await {
//!     println!("chapter 1 is up");
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod engine;
mod error;
mod fetcher;
pub mod filename;
mod probe;
pub mod rate_limiter;
mod retry;

pub use client::{ClientBuildError, HttpClient};
pub use constants::{BROWSER_USER_AGENT, PARTIAL_SUFFIX, PROBE_TIMEOUT_SECS};
pub use engine::{
    DEFAULT_CONCURRENCY, DownloadEngine, DownloadStats, EngineError, FailedItem, RunSummary,
};
pub use error::DownloadError;
pub use fetcher::{DownloadResult, Fetcher, Transport};
pub use probe::{HttpProber, Prober};
pub use rate_limiter::{Quota, RateLimiter, extract_domain};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
