//! Catalog-driven discovery against a MangaDex-style REST API.
//!
//! The catalog knows which chapters exist, so there is no probing: the work
//! identifier is resolved, the chapter list is paginated, and each chapter's
//! page manifest is fetched from the at-home endpoint. Every call passes
//! through the rate limiter under its endpoint class.
//!
//! Remote throttling (HTTP 429) is handled per endpoint: the listing retries
//! the same page after a fixed delay for as long as it takes, while manifest
//! resolution gives up on a chapter after a bounded number of retries.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{ChapterKey, Discover, Discovery, DiscoveryError, WorkItem};
use crate::cancel::CancelToken;
use crate::download::filename::{sanitize_filename, sanitize_work_name};
use crate::download::{HttpClient, Quota, RateLimiter};

/// Default catalog API base URL.
pub const DEFAULT_CATALOG_BASE_URL: &str = "https://api.mangadex.org";

/// Rate limiter key for chapter listing and title search.
pub const LIST_KEY: &str = "catalog-list";

/// Rate limiter key for page manifest resolution.
pub const AT_HOME_KEY: &str = "catalog-at-home";

/// Rate limiter key for work metadata.
pub const METADATA_KEY: &str = "catalog-metadata";

/// Fallback language for titles.
const FALLBACK_LANGUAGE: &str = "en";

/// Catalog ids are UUIDs, found anywhere in a title URL.
#[allow(clippy::expect_used)]
static UUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .expect("UUID regex is valid") // Static pattern, safe to panic
});

// ==================== Catalog API Response Types ====================

/// Paginated collection response.
#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    total: u32,
}

/// Single-entity response.
#[derive(Debug, Deserialize)]
struct EntityResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct MangaEntry {
    id: String,
    #[serde(default)]
    attributes: MangaAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct MangaAttributes {
    #[serde(default)]
    title: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ChapterEntry {
    id: String,
    #[serde(default)]
    attributes: ChapterAttributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterAttributes {
    chapter: Option<String>,
    pages: Option<u32>,
    external_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtHomeResponse {
    base_url: String,
    chapter: AtHomeChapter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtHomeChapter {
    hash: String,
    #[serde(default)]
    data: Vec<String>,
    #[serde(default)]
    data_saver: Vec<String>,
}

// ==================== Settings ====================

/// Tunables for catalog discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSettings {
    /// API base URL.
    pub base_url: String,
    /// Translated language requested from the listing.
    pub language: String,
    /// Use the compressed `data-saver` page set.
    pub data_saver: bool,
    /// Listing page size.
    pub page_size: u32,
    /// Fixed wait before retrying a throttled listing page.
    pub list_retry_delay: Duration,
    /// Manifest retry `n` waits `n` times this.
    pub at_home_retry_unit: Duration,
    /// Manifest retries before a throttled chapter is skipped.
    pub at_home_max_retries: u32,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CATALOG_BASE_URL.to_string(),
            language: FALLBACK_LANGUAGE.to_string(),
            data_saver: false,
            page_size: 100,
            list_retry_delay: Duration::from_secs(5),
            at_home_retry_unit: Duration::from_secs(5),
            at_home_max_retries: 5,
        }
    }
}

/// Adds the catalog endpoint budgets to `limiter`.
///
/// Listing and metadata allow 5 calls per second; the at-home endpoint
/// allows 40 calls per minute.
#[must_use]
pub fn with_catalog_quotas(limiter: RateLimiter) -> RateLimiter {
    limiter
        .with_quota(LIST_KEY, Quota::new(5, Duration::from_secs(1)))
        .with_quota(METADATA_KEY, Quota::new(5, Duration::from_secs(1)))
        .with_quota(AT_HOME_KEY, Quota::new(40, Duration::from_secs(60)))
}

/// Why a single catalog call did not produce a value.
#[derive(Debug)]
enum CallError {
    RateLimited,
    Failed(DiscoveryError),
}

// ==================== CatalogDiscovery ====================

/// Discovers pages through the catalog API.
pub struct CatalogDiscovery {
    client: HttpClient,
    limiter: Arc<RateLimiter>,
    identifier: String,
    output_dir: PathBuf,
    settings: CatalogSettings,
    cancel: CancelToken,
}

impl std::fmt::Debug for CatalogDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogDiscovery")
            .field("identifier", &self.identifier)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CatalogDiscovery {
    /// Creates a catalog provider for `identifier` (a title URL, a bare id or a title).
    #[must_use]
    pub fn new(
        client: HttpClient,
        limiter: Arc<RateLimiter>,
        identifier: impl Into<String>,
        output_dir: &Path,
        settings: CatalogSettings,
        cancel: CancelToken,
    ) -> Self {
        Self {
            client,
            limiter,
            identifier: identifier.into(),
            output_dir: output_dir.to_path_buf(),
            settings,
            cancel,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, DiscoveryError> {
        let raw = format!("{}/{path}", self.settings.base_url.trim_end_matches('/'));
        Url::parse(&raw).map_err(|e| DiscoveryError::InvalidInput(format!("{raw}: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str, url: &Url) -> Result<T, CallError> {
        self.limiter.acquire(key).await;

        let response = self
            .client
            .inner()
            .get(url.clone())
            .send()
            .await
            .map_err(|e| CallError::Failed(DiscoveryError::http(url.as_str(), e.to_string())))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CallError::RateLimited);
        }
        if !status.is_success() {
            return Err(CallError::Failed(DiscoveryError::http(
                url.as_str(),
                format!("HTTP {}", status.as_u16()),
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CallError::Failed(DiscoveryError::http(url.as_str(), e.to_string())))?;
        serde_json::from_slice(&body)
            .map_err(|e| CallError::Failed(DiscoveryError::decode(url.as_str(), e.to_string())))
    }

    /// Resolves the identifier to a catalog id, searching by title if needed.
    #[instrument(skip(self), fields(identifier = %self.identifier))]
    async fn resolve_work_id(&self) -> Result<String, DiscoveryError> {
        if let Some(id) = extract_uuid(&self.identifier) {
            return Ok(id);
        }

        let query = search_query(&self.identifier);
        if query.is_empty() {
            return Err(DiscoveryError::InvalidInput(format!(
                "cannot derive a catalog title from {}",
                self.identifier
            )));
        }

        let mut url = self.endpoint("manga")?;
        url.query_pairs_mut()
            .append_pair("title", &query)
            .append_pair("limit", "1");

        loop {
            match self.get_json::<ListResponse<MangaEntry>>(LIST_KEY, &url).await {
                Ok(found) => {
                    return found
                        .data
                        .into_iter()
                        .next()
                        .map(|entry| entry.id)
                        .ok_or(DiscoveryError::WorkNotFound { query });
                }
                Err(CallError::RateLimited) if !self.cancel.is_cancelled() => {
                    warn!("title search rate limited; retrying");
                    tokio::time::sleep(self.settings.list_retry_delay).await;
                }
                Err(CallError::RateLimited) => {
                    return Err(DiscoveryError::http(url.as_str(), "HTTP 429"));
                }
                Err(CallError::Failed(e)) => return Err(e),
            }
        }
    }

    /// Fetches the work title, falling back to the id if metadata is unavailable.
    async fn fetch_title(&self, work_id: &str) -> String {
        let url = match self.endpoint(&format!("manga/{work_id}")) {
            Ok(url) => url,
            Err(_) => return work_id.to_string(),
        };

        match self.get_json::<EntityResponse<MangaEntry>>(METADATA_KEY, &url).await {
            Ok(entity) => pick_title(&entity.data.attributes.title, &self.settings.language)
                .unwrap_or_else(|| work_id.to_string()),
            Err(CallError::RateLimited) => {
                warn!("work metadata rate limited; using id as title");
                work_id.to_string()
            }
            Err(CallError::Failed(e)) => {
                warn!(error = %e, "work metadata unavailable; using id as title");
                work_id.to_string()
            }
        }
    }

    /// Paginates the chapter listing.
    ///
    /// A throttled page is retried after a fixed delay until it succeeds or
    /// the run is cancelled. Any other failure ends pagination and keeps the
    /// chapters gathered so far.
    #[instrument(skip(self))]
    async fn list_chapters(&self, work_id: &str) -> Vec<ChapterEntry> {
        let mut chapters = Vec::new();
        let mut offset: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let Ok(mut url) = self.endpoint("chapter") else {
                break;
            };
            url.query_pairs_mut()
                .append_pair("manga", work_id)
                .append_pair("translatedLanguage[]", &self.settings.language)
                .append_pair("limit", &self.settings.page_size.to_string())
                .append_pair("offset", &offset.to_string())
                .append_pair("order[chapter]", "asc");

            match self.get_json::<ListResponse<ChapterEntry>>(LIST_KEY, &url).await {
                Ok(page) => {
                    let received = page.data.len();
                    debug!(offset, received, total = page.total, "chapter listing page");
                    chapters.extend(page.data);
                    offset = offset.saturating_add(self.settings.page_size);
                    if received == 0 || offset >= page.total {
                        break;
                    }
                }
                Err(CallError::RateLimited) => {
                    warn!(
                        offset,
                        delay_secs = self.settings.list_retry_delay.as_secs_f64(),
                        "chapter listing rate limited; retrying"
                    );
                    tokio::time::sleep(self.settings.list_retry_delay).await;
                }
                Err(CallError::Failed(e)) => {
                    warn!(error = %e, offset, "chapter listing failed; keeping chapters gathered so far");
                    break;
                }
            }
        }

        chapters
    }

    /// Resolves one chapter's page addresses. Throttling past the retry
    /// budget, or any other failure, skips the chapter.
    #[instrument(skip(self))]
    async fn resolve_pages(&self, chapter_id: &str) -> Vec<String> {
        let Ok(url) = self.endpoint(&format!("at-home/server/{chapter_id}")) else {
            return Vec::new();
        };
        let mut retries = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Vec::new();
            }

            match self.get_json::<AtHomeResponse>(AT_HOME_KEY, &url).await {
                Ok(manifest) => return page_addresses(&manifest, self.settings.data_saver),
                Err(CallError::RateLimited) if retries < self.settings.at_home_max_retries => {
                    retries += 1;
                    let delay = self.settings.at_home_retry_unit.saturating_mul(retries);
                    warn!(
                        retries,
                        delay_secs = delay.as_secs_f64(),
                        "page manifest rate limited; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(CallError::RateLimited) => {
                    warn!(retries, "page manifest still rate limited; skipping chapter");
                    return Vec::new();
                }
                Err(CallError::Failed(e)) => {
                    warn!(error = %e, "page manifest unavailable; skipping chapter");
                    return Vec::new();
                }
            }
        }
    }
}

#[async_trait]
impl Discover for CatalogDiscovery {
    fn name(&self) -> &'static str {
        "catalog"
    }

    async fn discover(&self) -> Result<Discovery, DiscoveryError> {
        let work_id = self.resolve_work_id().await?;
        let title = self.fetch_title(&work_id).await;
        let work_name = sanitize_work_name(&title);
        let root = self.output_dir.join(&work_name);

        info!(work_id = %work_id, title = %title, "resolved catalog work");

        let chapters = self.list_chapters(&work_id).await;
        info!(chapters = chapters.len(), "chapter listing complete");

        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for chapter in chapters {
            if self.cancel.is_cancelled() {
                warn!("discovery interrupted; keeping pages found so far");
                break;
            }

            if chapter.attributes.external_url.is_some() {
                debug!(chapter_id = %chapter.id, "chapter hosted externally; skipping");
                continue;
            }
            if chapter.attributes.pages == Some(0) {
                debug!(chapter_id = %chapter.id, "chapter has no pages; skipping");
                continue;
            }

            let dir_name = chapter_dir_name(chapter.attributes.chapter.as_deref());
            if !seen.insert(dir_name.clone()) {
                debug!(chapter_id = %chapter.id, dir_name = %dir_name, "duplicate chapter number; skipping");
                continue;
            }

            let addresses = self.resolve_pages(&chapter.id).await;
            info!(chapter = %dir_name, pages = addresses.len(), "chapter pages found");

            let destination = root.join(&dir_name);
            items.extend(
                addresses
                    .into_iter()
                    .map(|address| WorkItem::new(address, destination.clone())),
            );
        }

        Ok(Discovery {
            work_name,
            root,
            items,
        })
    }
}

// ==================== Helpers ====================

/// Returns the first UUID-shaped token in `input`, lowercased.
fn extract_uuid(input: &str) -> Option<String> {
    UUID_PATTERN
        .find(input)
        .map(|m| m.as_str().to_lowercase())
}

/// Derives a title search query from a URL or plain text.
fn search_query(identifier: &str) -> String {
    let text = if identifier.starts_with("http") {
        Url::parse(identifier)
            .ok()
            .and_then(|url| {
                url.path_segments()?
                    .filter(|s| !s.is_empty())
                    .next_back()
                    .map(|s| urlencoding::decode(s).map_or_else(|_| s.to_string(), |d| d.into_owned()))
            })
            .unwrap_or_default()
    } else {
        identifier.to_string()
    };
    text.replace(['-', '_'], " ").trim().to_string()
}

/// Picks a title: requested language, then English, then the first available.
fn pick_title(titles: &BTreeMap<String, String>, language: &str) -> Option<String> {
    titles
        .get(language)
        .or_else(|| titles.get(FALLBACK_LANGUAGE))
        .or_else(|| titles.values().next())
        .filter(|t| !t.trim().is_empty())
        .cloned()
}

/// Directory for a catalog chapter number; unparseable numbers keep their raw text.
fn chapter_dir_name(raw: Option<&str>) -> String {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => "chapter_oneshot".to_string(),
        Some(raw) => ChapterKey::parse(raw).map_or_else(
            || format!("chapter_{}", sanitize_filename(raw)),
            ChapterKey::dir_name,
        ),
    }
}

fn page_addresses(manifest: &AtHomeResponse, data_saver: bool) -> Vec<String> {
    let (segment, files) = if data_saver {
        ("data-saver", &manifest.chapter.data_saver)
    } else {
        ("data", &manifest.chapter.data)
    };
    let base = manifest.base_url.trim_end_matches('/');
    files
        .iter()
        .map(|file| format!("{base}/{segment}/{}/{file}", manifest.chapter.hash))
        .collect()
}
