//! Input classification and provider selection.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use url::Url;

use super::axis::{AxisSettings, AxisWalker, MirrorSet};
use super::catalog::{CatalogDiscovery, CatalogSettings};
use super::rendered::{RenderedDiscovery, StaticHtmlRenderer};
use super::{Discover, DiscoveryError};
use crate::cancel::CancelToken;
use crate::download::{HttpClient, HttpProber, RateLimiter};

/// Host marker for catalog title URLs.
const CATALOG_HOST_MARKER: &str = "mangadex.org";

/// Host marker for rendered reader URLs.
const RENDERED_HOST_MARKER: &str = "weebcentral.com";

/// Which provider handles an input, with the identifier it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Axis walk over mirror hosts for a work slug.
    Mirrors {
        /// Work slug as it appears in mirror addresses.
        slug: String,
    },
    /// Catalog API lookup by title URL, id or title text.
    Catalog {
        /// Raw identifier.
        identifier: String,
    },
    /// A rendered chapter page.
    Rendered {
        /// Chapter page URL.
        url: String,
    },
}

/// Classifies a user-supplied work identifier.
///
/// Catalog and rendered-site URLs are recognised by host; any other URL is
/// treated as a mirror address and reduced to its work slug; bare text is
/// used as the slug unchanged.
///
/// # Errors
///
/// Returns [`DiscoveryError::InvalidInput`] for empty input or a URL
/// without a work slug.
///
/// # Examples
///
/// ```
/// use manga_core::discovery::{classify_input, SourceKind};
///
/// assert_eq!(
///     classify_input("one-piece").unwrap(),
///     SourceKind::Mirrors { slug: "one-piece".to_string() }
/// );
/// assert!(matches!(
///     classify_input("https://mangadex.org/title/abc").unwrap(),
///     SourceKind::Catalog { .. }
/// ));
/// ```
pub fn classify_input(input: &str) -> Result<SourceKind, DiscoveryError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(DiscoveryError::InvalidInput(
            "a manga name or URL is required".to_string(),
        ));
    }

    let kind = if input.contains(CATALOG_HOST_MARKER) {
        SourceKind::Catalog {
            identifier: input.to_string(),
        }
    } else if input.contains(RENDERED_HOST_MARKER) {
        SourceKind::Rendered {
            url: input.to_string(),
        }
    } else if input.starts_with("http://") || input.starts_with("https://") {
        SourceKind::Mirrors {
            slug: extract_work_slug(input)?,
        }
    } else {
        SourceKind::Mirrors {
            slug: input.to_string(),
        }
    };

    debug!(?kind, "input classified");
    Ok(kind)
}

/// Extracts the work slug from a mirror URL.
///
/// The slug is the second path segment (`/manga/{slug}/...`), or the last
/// segment when the path has fewer than two.
///
/// # Errors
///
/// Returns [`DiscoveryError::InvalidInput`] if the URL cannot be parsed or
/// has no path segments.
pub fn extract_work_slug(url: &str) -> Result<String, DiscoveryError> {
    let parsed =
        Url::parse(url).map_err(|e| DiscoveryError::InvalidInput(format!("{url}: {e}")))?;
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let slug = if segments.len() >= 2 {
        segments[1]
    } else {
        segments.last().copied().unwrap_or_default()
    };
    let slug = urlencoding::decode(slug).map_or_else(|_| slug.to_string(), |s| s.into_owned());

    if slug.trim().is_empty() {
        return Err(DiscoveryError::InvalidInput(format!(
            "no work slug in {url}"
        )));
    }
    Ok(slug)
}

/// Everything a provider needs besides its identifier.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    /// Shared HTTP client.
    pub client: HttpClient,
    /// Shared rate limiter.
    pub limiter: Arc<RateLimiter>,
    /// Run-wide cancellation.
    pub cancel: CancelToken,
    /// Directory the work folder is created in.
    pub output_dir: PathBuf,
    /// Axis walk bounds.
    pub axis: AxisSettings,
    /// Mirror hosts for the axis walk.
    pub mirrors: MirrorSet,
    /// Per-probe timeout.
    pub probe_timeout: Duration,
    /// Catalog tunables.
    pub catalog: CatalogSettings,
}

/// Builds the provider for `kind`.
#[must_use]
pub fn build_provider(kind: SourceKind, ctx: &ProviderContext) -> Box<dyn Discover> {
    match kind {
        SourceKind::Mirrors { slug } => {
            let prober = HttpProber::new(ctx.client.clone())
                .with_timeout(ctx.probe_timeout)
                .with_rate_limiter(Arc::clone(&ctx.limiter));
            Box::new(AxisWalker::new(
                Arc::new(prober),
                ctx.mirrors.clone(),
                slug,
                &ctx.output_dir,
                ctx.axis,
                ctx.cancel.clone(),
            ))
        }
        SourceKind::Catalog { identifier } => Box::new(CatalogDiscovery::new(
            ctx.client.clone(),
            Arc::clone(&ctx.limiter),
            identifier,
            &ctx.output_dir,
            ctx.catalog.clone(),
            ctx.cancel.clone(),
        )),
        SourceKind::Rendered { url } => Box::new(RenderedDiscovery::new(
            Arc::new(StaticHtmlRenderer::new(ctx.client.clone())),
            url,
            &ctx.output_dir,
        )),
    }
}
