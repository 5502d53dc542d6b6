//! Discovery of page addresses for a work.
//!
//! Every provider turns a user-supplied identifier into a flat list of
//! [`WorkItem`]s that the download engine consumes.
//!
//! # Architecture
//!
//! - [`Discover`] - Async trait that each provider implements
//! - [`AxisWalker`] - Walks the chapter/page number space across mirror image hosts
//! - [`CatalogDiscovery`] - Lists chapters and page manifests from a catalog API
//! - [`RenderedDiscovery`] - Reads page images from a rendered chapter page
//! - [`classify_input`] - Decides which provider handles an input
//!
//! # Example
//!
//! ```no_run
//! use manga_core::discovery::{classify_input, SourceKind};
//!
//! let kind = classify_input("https://scans.lastation.us/manga/one-piece/").unwrap();
//! assert_eq!(kind, SourceKind::Mirrors { slug: "one-piece".to_string() });
//! ```

mod axis;
mod catalog;
mod chapter;
mod rendered;
mod source;

pub use axis::{AxisSettings, AxisWalker, DEFAULT_MIRRORS, MirrorPolicy, MirrorSet};
pub use catalog::{
    AT_HOME_KEY, CatalogDiscovery, CatalogSettings, DEFAULT_CATALOG_BASE_URL, LIST_KEY, METADATA_KEY,
    with_catalog_quotas,
};
pub use chapter::ChapterKey;
pub use rendered::{PageRenderer, RenderedDiscovery, StaticHtmlRenderer};
pub use source::{ProviderContext, SourceKind, build_provider, classify_input, extract_work_slug};

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::download::ClientBuildError;
use crate::download::filename::{file_name_from_url, sanitize_filename};

/// One page to download: where it lives and which directory it belongs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Absolute page address.
    pub address: String,
    /// Chapter directory the page is written into.
    pub destination: PathBuf,
    /// Local name overriding the one derived from the address.
    pub local_name: Option<String>,
}

impl WorkItem {
    /// Creates a work item.
    #[must_use]
    pub fn new(address: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            destination: destination.into(),
            local_name: None,
        }
    }

    /// Stores the page under `name` instead of the address's last segment.
    #[must_use]
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    /// Returns the local file name: the explicit local name if one was set,
    /// otherwise the sanitized last path segment of the address.
    #[must_use]
    pub fn file_name(&self) -> Option<String> {
        match &self.local_name {
            Some(name) => Some(sanitize_filename(name)),
            None => file_name_from_url(&self.address),
        }
    }
}

/// Result of running a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Sanitized work name; also the root directory and archive name.
    pub work_name: String,
    /// Directory chapter folders are created under.
    pub root: PathBuf,
    /// Pages in chapter order.
    pub items: Vec<WorkItem>,
}

/// Errors that stop discovery before any page address is produced.
///
/// Failures after that point (a chapter listing page, a manifest, a probe)
/// are logged and degrade to partial results instead.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The input could not be turned into a work identifier.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A catalog search or rendered page yielded no work.
    #[error("no work found for {query}")]
    WorkNotFound {
        /// What was searched for.
        query: String,
    },

    /// An HTTP request failed.
    #[error("request to {url} failed: {message}")]
    Http {
        /// Requested address.
        url: String,
        /// Status or transport failure.
        message: String,
    },

    /// A response body could not be decoded.
    #[error("unexpected response from {url}: {message}")]
    Decode {
        /// Requested address.
        url: String,
        /// Decoder message.
        message: String,
    },

    /// The shared HTTP client could not be constructed.
    #[error(transparent)]
    ClientBuild(#[from] ClientBuildError),
}

impl DiscoveryError {
    /// Creates an HTTP error.
    pub fn http(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// A source of page addresses for one work.
///
/// Uses `async_trait` so providers can be selected at runtime behind
/// `Box<dyn Discover>`.
#[async_trait]
pub trait Discover: Send + Sync {
    /// Returns the provider name for logs ("mirrors", "catalog", "rendered").
    fn name(&self) -> &'static str;

    /// Discovers every page of the work.
    ///
    /// Honors cancellation by returning what was found so far.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] only when no work could be identified.
    async fn discover(&self) -> Result<Discovery, DiscoveryError>;
}
