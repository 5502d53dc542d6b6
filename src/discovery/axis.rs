//! Chapter axis walk across a set of mirror image hosts.
//!
//! Mirror hosts serve pages at deterministic addresses,
//! `{mirror}/{slug}/{chapter}-{page:03}.png`, with no index to list them.
//! The walker finds the work's extent by probing:
//!
//! 1. Probe page 1 of chapter `n` on every mirror. Any hit: enumerate its
//!    pages and move on to `n + 1`.
//! 2. Otherwise probe page 1 of `n.1 ..= n.max_decimals` on the first mirror,
//!    enumerating every hit. At least one hit: move on to `n + 1`.
//! 3. No hit at all ends the walk.
//!
//! Step 3 is the only way the walk ends, so a mirror outage at chapter `n`
//! looks exactly like a work that ends at `n - 1`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::{ChapterKey, Discover, Discovery, DiscoveryError, WorkItem};
use crate::cancel::CancelToken;
use crate::download::Prober;
use crate::download::filename::sanitize_work_name;

/// Mirror hosts tried when none are configured, in priority order.
pub const DEFAULT_MIRRORS: [&str; 3] = [
    "https://scans.lastation.us/manga",
    "https://official.lowee.us/manga",
    "https://hot.planeptune.us/manga",
];

/// Which mirror addresses are emitted when several mirrors have a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorPolicy {
    /// Only the highest-priority mirror that has the page.
    #[default]
    FirstMatch,
    /// Every mirror that has the page, in priority order. Copies from
    /// mirrors after the first are stored as `{page}.mirrorN.{ext}` so no two
    /// copies share a local name.
    AllMatches,
}

/// Ordered list of equivalent base addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorSet {
    bases: Vec<String>,
}

impl Default for MirrorSet {
    fn default() -> Self {
        Self {
            bases: DEFAULT_MIRRORS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl MirrorSet {
    /// Creates a mirror set. Trailing slashes are removed.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidInput`] if no mirror is given.
    pub fn new<I, S>(bases: I) -> Result<Self, DiscoveryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let bases: Vec<String> = bases
            .into_iter()
            .map(|b| b.as_ref().trim().trim_end_matches('/').to_string())
            .filter(|b| !b.is_empty())
            .collect();
        if bases.is_empty() {
            return Err(DiscoveryError::InvalidInput(
                "at least one mirror is required".to_string(),
            ));
        }
        Ok(Self { bases })
    }

    /// Returns the number of mirrors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    /// Returns whether the set is empty. Never true for a constructed set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Builds the address of `page` of `chapter` on mirror `mirror`.
    ///
    /// # Examples
    ///
    /// ```
    /// use manga_core::discovery::{ChapterKey, MirrorSet};
    ///
    /// let mirrors = MirrorSet::new(["https://scans.example.us/manga/"]).unwrap();
    /// assert_eq!(
    ///     mirrors.page_address(0, "one-piece", ChapterKey::Fractional(12, 5), 3),
    ///     "https://scans.example.us/manga/one-piece/0012.5-003.png"
    /// );
    /// ```
    #[must_use]
    pub fn page_address(&self, mirror: usize, slug: &str, chapter: ChapterKey, page: u32) -> String {
        format!("{}/{slug}/{chapter}-{page:03}.png", self.bases[mirror])
    }
}

/// Bounds for one axis walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisSettings {
    /// First chapter probed.
    pub start_chapter: u32,
    /// First page enumerated in the first chapter found.
    pub start_page: u32,
    /// Highest page number probed per chapter.
    pub max_pages: u32,
    /// Highest decimal suffix probed for sub-chapters.
    pub max_decimals: u32,
    /// Concurrent probes while enumerating pages.
    pub workers: usize,
    /// Which addresses are emitted for pages on several mirrors.
    pub policy: MirrorPolicy,
}

impl Default for AxisSettings {
    fn default() -> Self {
        Self {
            start_chapter: 1,
            start_page: 1,
            max_pages: 50,
            max_decimals: 50,
            workers: 10,
            policy: MirrorPolicy::FirstMatch,
        }
    }
}

/// Discovers a work's pages by walking the chapter axis on mirror hosts.
pub struct AxisWalker {
    prober: Arc<dyn Prober>,
    mirrors: MirrorSet,
    slug: String,
    work_name: String,
    root: PathBuf,
    settings: AxisSettings,
    cancel: CancelToken,
}

impl std::fmt::Debug for AxisWalker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxisWalker")
            .field("slug", &self.slug)
            .field("root", &self.root)
            .field("mirrors", &self.mirrors)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AxisWalker {
    /// Creates a walker for `slug`, storing chapters under
    /// `{output_dir}/{sanitized slug}`.
    #[must_use]
    pub fn new(
        prober: Arc<dyn Prober>,
        mirrors: MirrorSet,
        slug: impl Into<String>,
        output_dir: &Path,
        settings: AxisSettings,
        cancel: CancelToken,
    ) -> Self {
        let slug = slug.into();
        let work_name = sanitize_work_name(&slug);
        let root = output_dir.join(&work_name);
        Self {
            prober,
            mirrors,
            slug,
            work_name,
            root,
            settings,
            cancel,
        }
    }

    /// Walks the chapter axis and returns every page found, in chapter order.
    ///
    /// On cancellation the pages found so far are returned.
    #[instrument(skip(self), fields(slug = %self.slug))]
    pub async fn walk(&self) -> Vec<WorkItem> {
        let mut items = Vec::new();
        let mut first_page = self.settings.start_page.max(1);
        let mut chapter = self.settings.start_chapter;

        info!(start_chapter = chapter, "walking chapter axis");

        loop {
            if self.cancel.is_cancelled() {
                warn!(chapter, "discovery interrupted; keeping pages found so far");
                break;
            }

            let whole = ChapterKey::Whole(chapter);
            if self.chapter_on_any_mirror(whole).await {
                items.extend(self.enumerate_pages(whole, first_page).await);
                first_page = 1;
            } else {
                let mut fractional_found = false;
                for decimal in 1..=self.settings.max_decimals {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    let key = ChapterKey::Fractional(chapter, decimal);
                    let address = self.mirrors.page_address(0, &self.slug, key, 1);
                    if self.prober.exists(&address).await {
                        fractional_found = true;
                        items.extend(self.enumerate_pages(key, first_page).await);
                        first_page = 1;
                    }
                }

                if !fractional_found {
                    if !self.cancel.is_cancelled() {
                        info!(chapter = %whole, "chapter not found; stopping");
                    }
                    break;
                }
            }

            let Some(next) = chapter.checked_add(1) else {
                break;
            };
            chapter = next;
        }

        info!(pages = items.len(), "chapter axis walk complete");
        items
    }

    /// Probes page 1 of `key` on every mirror in parallel.
    async fn chapter_on_any_mirror(&self, key: ChapterKey) -> bool {
        let probes = (0..self.mirrors.len()).map(|mirror| {
            let address = self.mirrors.page_address(mirror, &self.slug, key, 1);
            async move { self.prober.exists(&address).await }
        });
        join_all(probes).await.into_iter().any(|found| found)
    }

    /// Probes the `mirrors × pages` matrix of one chapter and applies the mirror policy.
    async fn enumerate_pages(&self, key: ChapterKey, first_page: u32) -> Vec<WorkItem> {
        let pages: Vec<u32> = (first_page..=self.settings.max_pages).collect();
        let mirror_count = self.mirrors.len();
        let semaphore = Arc::new(Semaphore::new(self.settings.workers.max(1)));

        // Page-major, mirror-minor: the order items are emitted in
        let mut handles = Vec::with_capacity(pages.len() * mirror_count);
        for &page in &pages {
            for mirror in 0..mirror_count {
                let address = self.mirrors.page_address(mirror, &self.slug, key, page);
                let prober = Arc::clone(&self.prober);
                let semaphore = Arc::clone(&semaphore);
                let cancel = self.cancel.clone();
                handles.push(tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return (mirror, address, false);
                    };
                    if cancel.is_cancelled() {
                        return (mirror, address, false);
                    }
                    let found = prober.exists(&address).await;
                    (mirror, address, found)
                }));
            }
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(error = %e, "probe task panicked");
                    results.push((0, String::new(), false));
                }
            }
        }

        let destination = self.root.join(key.dir_name());
        let mut items = Vec::new();
        for page_results in results.chunks(mirror_count) {
            let mut hits = page_results.iter().filter(|(_, _, found)| *found);
            match self.settings.policy {
                MirrorPolicy::FirstMatch => {
                    if let Some((_, address, _)) = hits.next() {
                        items.push(WorkItem::new(address.clone(), destination.clone()));
                    }
                }
                MirrorPolicy::AllMatches => {
                    items.extend(hits.map(|(mirror, address, _)| {
                        let item = WorkItem::new(address.clone(), destination.clone());
                        match item.file_name() {
                            Some(name) if *mirror > 0 => {
                                let local = mirror_copy_name(&name, *mirror);
                                item.with_local_name(local)
                            }
                            _ => item,
                        }
                    }));
                }
            }
        }

        info!(chapter = %key, pages = items.len(), "chapter pages found");
        debug!(chapter = %key, probes = pages.len() * mirror_count, "chapter enumeration probes");
        items
    }
}

/// Local name of the copy of a page held by the mirror at `mirror` (0-based).
fn mirror_copy_name(file_name: &str, mirror: usize) -> String {
    let n = mirror + 1;
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}.mirror{n}.{ext}"),
        _ => format!("{file_name}.mirror{n}"),
    }
}

#[async_trait]
impl Discover for AxisWalker {
    fn name(&self) -> &'static str {
        "mirrors"
    }

    async fn discover(&self) -> Result<Discovery, DiscoveryError> {
        let items = self.walk().await;
        Ok(Discovery {
            work_name: self.work_name.clone(),
            root: self.root.clone(),
            items,
        })
    }
}
