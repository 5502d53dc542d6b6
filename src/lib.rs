//! Manga Downloader Core Library
//!
//! This library discovers chapter page images for a manga series across
//! mirror image hosts, a catalog API, or a rendered reader site, downloads
//! them concurrently under per-key rate limits, and packages the result into
//! a single CBZ archive.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`discovery`] - Input classification and the three discovery providers
//! - [`download`] - Existence probing, rate limiting, fetching and the download engine
//! - [`archive`] - CBZ packaging and chapter folder pruning
//! - [`cancel`] - Cooperative cancellation shared by every stage
//! - [`config`] - JSON file configuration and merged run settings

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod archive;
pub mod cancel;
pub mod config;
pub mod discovery;
pub mod download;

// Re-export commonly used types
pub use archive::{ArchiveError, ArchiveOutcome, ArchiveSkip, archive};
pub use cancel::CancelToken;
pub use config::{FileConfig, RunSettings};
pub use discovery::{
    ChapterKey, Discover, Discovery, DiscoveryError, MirrorPolicy, SourceKind, WorkItem,
    classify_input,
};
pub use download::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DownloadEngine, DownloadError, DownloadResult,
    DownloadStats, EngineError, FailureType, Fetcher, HttpClient, HttpProber, Prober, Quota,
    RateLimiter, RetryPolicy, RunSummary, Transport, classify_error,
};
