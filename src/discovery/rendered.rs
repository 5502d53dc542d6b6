//! Discovery from a reader site that renders chapter pages as HTML.
//!
//! The chapter page embeds every page image; the work slug and chapter
//! number are recovered from the image addresses themselves
//! (`.../manga/{slug}/{chapter}-{page}.png`). Obtaining the image sources is
//! delegated to a [`PageRenderer`] so a headless browser can be plugged in
//! for sites that lazy-load images.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, instrument};
use url::Url;

use super::{ChapterKey, Discover, Discovery, DiscoveryError, WorkItem};
use crate::download::HttpClient;
use crate::download::filename::{file_name_from_url, sanitize_filename, sanitize_work_name};

/// Page images are named `{chapter}-{page}.png`.
#[allow(clippy::expect_used)]
static PAGE_IMAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d{3,4}-\d{3,4}\.png$").expect("page image regex is valid") // Static pattern, safe to panic
});

/// The work slug is the path segment after `/manga/`.
#[allow(clippy::expect_used)]
static WORK_SLUG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/manga/([^/]+)/").expect("work slug regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static IMG_SRC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?\ssrc\s*=\s*["']([^"']+)["']"#).expect("img regex is valid") // Static pattern, safe to panic
});

/// Produces the image sources of a rendered page.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Returns the absolute `src` of every `<img>` on the page at `url`, in document order.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if the page cannot be loaded.
    async fn image_sources(&self, url: &str) -> Result<Vec<String>, DiscoveryError>;
}

/// Renderer that reads `<img>` tags from the HTML the server returns.
#[derive(Debug, Clone)]
pub struct StaticHtmlRenderer {
    client: HttpClient,
}

impl StaticHtmlRenderer {
    /// Creates a renderer using the shared client.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageRenderer for StaticHtmlRenderer {
    #[instrument(level = "debug", skip(self))]
    async fn image_sources(&self, url: &str) -> Result<Vec<String>, DiscoveryError> {
        let base = Url::parse(url).map_err(|e| DiscoveryError::InvalidInput(format!("{url}: {e}")))?;

        let response = self
            .client
            .inner()
            .get(base.clone())
            .send()
            .await
            .map_err(|e| DiscoveryError::http(url, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::http(url, format!("HTTP {}", status.as_u16())));
        }
        let html = response
            .text()
            .await
            .map_err(|e| DiscoveryError::http(url, e.to_string()))?;

        Ok(extract_image_sources(&html, &base))
    }
}

/// Extracts absolute `<img src>` values from `html`, resolving relative ones against `base`.
fn extract_image_sources(html: &str, base: &Url) -> Vec<String> {
    IMG_SRC_PATTERN
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .filter_map(|src| base.join(src.as_str().trim()).ok())
        .map(String::from)
        .collect()
}

/// Discovers one chapter's pages from a rendered chapter URL.
pub struct RenderedDiscovery {
    renderer: Arc<dyn PageRenderer>,
    chapter_url: String,
    output_dir: PathBuf,
}

impl std::fmt::Debug for RenderedDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedDiscovery")
            .field("chapter_url", &self.chapter_url)
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

impl RenderedDiscovery {
    /// Creates a provider for the chapter at `chapter_url`.
    #[must_use]
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        chapter_url: impl Into<String>,
        output_dir: &Path,
    ) -> Self {
        Self {
            renderer,
            chapter_url: chapter_url.into(),
            output_dir: output_dir.to_path_buf(),
        }
    }
}

/// Returns whether `src` looks like a page image, ignoring any query or fragment.
fn is_page_image(src: &str) -> bool {
    let path = src.split(['?', '#']).next().unwrap_or(src);
    PAGE_IMAGE_PATTERN.is_match(path)
}

/// Chapter directory from a page file name such as `0012-001.png`.
fn chapter_dir_for(src: &str) -> String {
    let name = file_name_from_url(src).unwrap_or_default();
    let chapter = name.rsplit_once('-').map_or("", |(chapter, _)| chapter);
    ChapterKey::parse(chapter).map_or_else(
        || format!("chapter_{}", sanitize_filename(chapter)),
        ChapterKey::dir_name,
    )
}

#[async_trait]
impl Discover for RenderedDiscovery {
    fn name(&self) -> &'static str {
        "rendered"
    }

    #[instrument(skip(self), fields(url = %self.chapter_url))]
    async fn discover(&self) -> Result<Discovery, DiscoveryError> {
        let sources = self.renderer.image_sources(&self.chapter_url).await?;
        debug!(images = sources.len(), "page rendered");

        let mut seen = HashSet::new();
        let pages: Vec<String> = sources
            .into_iter()
            .filter(|src| is_page_image(src))
            .filter(|src| seen.insert(src.clone()))
            .collect();

        let slug = pages
            .iter()
            .find_map(|src| WORK_SLUG_PATTERN.captures(src))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| DiscoveryError::WorkNotFound {
                query: self.chapter_url.clone(),
            })?;

        let work_name = sanitize_work_name(&slug);
        let root = self.output_dir.join(&work_name);

        let items: Vec<WorkItem> = pages
            .into_iter()
            .map(|src| {
                let destination = root.join(chapter_dir_for(&src));
                WorkItem::new(src, destination)
            })
            .collect();

        info!(work = %work_name, pages = items.len(), "chapter pages found");

        Ok(Discovery {
            work_name,
            root,
            items,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct FixedRenderer(Vec<String>);

    #[async_trait]
    impl PageRenderer for FixedRenderer {
        async fn image_sources(&self, _url: &str) -> Result<Vec<String>, DiscoveryError> {
            Ok(self.0.clone())
        }
    }

    fn discovery(sources: &[&str]) -> RenderedDiscovery {
        RenderedDiscovery::new(
            Arc::new(FixedRenderer(sources.iter().map(|s| (*s).to_string()).collect())),
            "https://reader.example.com/chapters/01ABC",
            Path::new("/out"),
        )
    }

    #[test]
    fn test_is_page_image_filter() {
        assert!(is_page_image("https://cdn.example.com/manga/Kagurabachi/0012-001.png"));
        assert!(is_page_image("https://cdn.example.com/manga/x/012-0010.PNG?v=2"));
        assert!(!is_page_image("https://cdn.example.com/static/logo.png"));
        assert!(!is_page_image("https://cdn.example.com/manga/x/0012-001.jpg"));
        assert!(!is_page_image("https://cdn.example.com/avatars/12-1.png"));
    }

    #[test]
    fn test_extract_image_sources_resolves_relative() {
        let base = Url::parse("https://reader.example.com/chapters/01ABC").unwrap();
        let html = r#"
            <div><img class="page" src="https://cdn.example.com/manga/x/0001-001.png" alt=""></div>
            <IMG alt="p2" SRC='/manga/x/0001-002.png'>
            <img data-src="lazy.png">
        "#;
        assert_eq!(
            extract_image_sources(html, &base),
            vec![
                "https://cdn.example.com/manga/x/0001-001.png",
                "https://reader.example.com/manga/x/0001-002.png",
            ]
        );
    }

    #[test]
    fn test_chapter_dir_for_page_names() {
        assert_eq!(chapter_dir_for("https://c.example.com/manga/x/0012-003.png"), "chapter_0012");
        assert_eq!(chapter_dir_for("https://c.example.com/manga/x/012-0003.png"), "chapter_0012");
    }

    #[tokio::test]
    async fn test_discover_filters_and_groups_pages() {
        let discovery = discovery(&[
            "https://reader.example.com/static/logo.png",
            "https://cdn.example.com/manga/Kagurabachi-Colored/0012-001.png",
            "https://cdn.example.com/manga/Kagurabachi-Colored/0012-002.png",
            "https://cdn.example.com/manga/Kagurabachi-Colored/0012-001.png",
        ])
        .discover()
        .await
        .unwrap();

        assert_eq!(discovery.work_name, "Kagurabachi Colored");
        assert_eq!(discovery.items.len(), 2);
        assert_eq!(
            discovery.items[1].destination,
            PathBuf::from("/out/Kagurabachi Colored/chapter_0012")
        );
    }

    #[tokio::test]
    async fn test_discover_without_page_images_is_not_found() {
        let result = discovery(&["https://reader.example.com/static/logo.png"])
            .discover()
            .await;
        assert!(matches!(result, Err(DiscoveryError::WorkNotFound { .. })));
    }
}
