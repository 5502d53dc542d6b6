//! Integration tests for discovery providers against mock servers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use manga_core::discovery::{
    AxisSettings, AxisWalker, CatalogDiscovery, CatalogSettings, MirrorSet, ProviderContext,
    SourceKind, build_provider,
};
use manga_core::download::{HttpClient, HttpProber, RateLimiter};
use manga_core::{CancelToken, Discover, DiscoveryError, MirrorPolicy};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WORK_ID: &str = "a96676e5-8ae2-425e-b549-7f15dd34a6d8";

fn client() -> HttpClient {
    HttpClient::new().expect("client builds")
}

fn fast_settings(server: &MockServer) -> CatalogSettings {
    CatalogSettings {
        base_url: server.uri(),
        page_size: 2,
        list_retry_delay: Duration::from_millis(5),
        at_home_retry_unit: Duration::from_millis(1),
        ..CatalogSettings::default()
    }
}

fn catalog(server: &MockServer, identifier: &str, settings: CatalogSettings, out: &Path) -> CatalogDiscovery {
    CatalogDiscovery::new(
        client(),
        Arc::new(RateLimiter::disabled()),
        identifier,
        out,
        settings,
        CancelToken::new(),
    )
}

fn chapter(id: &str, number: &str) -> serde_json::Value {
    json!({ "id": id, "type": "chapter", "attributes": { "chapter": number, "pages": 2 } })
}

async fn mount_title(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/manga/{WORK_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "id": WORK_ID,
                "attributes": { "title": { "ja-ro": "Komi-san wa", "en": "Komi Can't Communicate" } }
            }
        })))
        .mount(server)
        .await;
}

async fn mount_manifest(server: &MockServer, chapter_id: &str, hash: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/at-home/server/{chapter_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "ok",
            "baseUrl": format!("{}/cdn", server.uri()),
            "chapter": { "hash": hash, "data": ["1.png", "2.png"], "dataSaver": ["1.jpg", "2.jpg"] }
        })))
        .mount(server)
        .await;
}

/// Mounts a two-page chapter listing: chapters 1 and 2, then 2.5.
async fn mount_listing(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/chapter"))
        .and(query_param("manga", WORK_ID))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [chapter("c1", "1"), chapter("c2", "2")],
            "total": 3
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chapter"))
        .and(query_param("manga", WORK_ID))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [chapter("c3", "2.5")],
            "total": 3
        })))
        .expect(1)
        .mount(server)
        .await;
}

// ==================== Catalog Tests ====================

#[tokio::test]
async fn test_catalog_paginates_and_resolves_manifests() {
    let server = MockServer::start().await;
    mount_title(&server).await;
    mount_listing(&server).await;
    for (id, hash) in [("c1", "h1"), ("c2", "h2"), ("c3", "h3")] {
        mount_manifest(&server, id, hash).await;
    }
    let temp = TempDir::new().expect("temp dir");

    let url = format!("https://mangadex.org/title/{WORK_ID}/komi-san");
    let discovery = catalog(&server, &url, fast_settings(&server), temp.path())
        .discover()
        .await
        .expect("discovery succeeds");

    assert_eq!(discovery.work_name, "Komi Can't Communicate");
    assert_eq!(discovery.items.len(), 6);
    assert_eq!(
        discovery.items[0].address,
        format!("{}/cdn/data/h1/1.png", server.uri())
    );
    assert_eq!(
        discovery.items[5].destination,
        temp.path().join("Komi Can't Communicate").join("chapter_0002.5")
    );
}

#[tokio::test]
async fn test_catalog_listing_retries_after_rate_limit() {
    let server = MockServer::start().await;
    mount_title(&server).await;
    Mock::given(method("GET"))
        .and(path("/chapter"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chapter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [chapter("c1", "1")],
            "total": 1
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_manifest(&server, "c1", "h1").await;
    let temp = TempDir::new().expect("temp dir");

    let discovery = catalog(&server, WORK_ID, fast_settings(&server), temp.path())
        .discover()
        .await
        .expect("discovery succeeds");

    assert_eq!(discovery.items.len(), 2);
}

#[tokio::test]
async fn test_catalog_manifest_gives_up_after_retry_budget() {
    let server = MockServer::start().await;
    mount_title(&server).await;
    Mock::given(method("GET"))
        .and(path("/chapter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [chapter("c1", "1"), chapter("c2", "2")],
            "total": 2
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/at-home/server/c1"))
        .respond_with(ResponseTemplate::new(429))
        .expect(6)
        .mount(&server)
        .await;
    mount_manifest(&server, "c2", "h2").await;
    let temp = TempDir::new().expect("temp dir");

    let discovery = catalog(&server, WORK_ID, fast_settings(&server), temp.path())
        .discover()
        .await
        .expect("a throttled chapter is not fatal");

    assert_eq!(discovery.items.len(), 2, "only chapter 2 resolves");
    assert!(discovery.items.iter().all(|item| item.address.contains("/h2/")));
}

#[tokio::test]
async fn test_catalog_listing_failure_keeps_earlier_pages() {
    let server = MockServer::start().await;
    mount_title(&server).await;
    Mock::given(method("GET"))
        .and(path("/chapter"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [chapter("c1", "1"), chapter("c2", "2")],
            "total": 10
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chapter"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    mount_manifest(&server, "c1", "h1").await;
    mount_manifest(&server, "c2", "h2").await;
    let temp = TempDir::new().expect("temp dir");

    let discovery = catalog(&server, WORK_ID, fast_settings(&server), temp.path())
        .discover()
        .await
        .expect("discovery succeeds");

    assert_eq!(discovery.items.len(), 4);
}

#[tokio::test]
async fn test_catalog_title_search_and_data_saver() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manga"))
        .and(query_param("title", "komi san"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": WORK_ID, "attributes": { "title": { "en": "Komi" } } }],
            "total": 1
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_title(&server).await;
    Mock::given(method("GET"))
        .and(path("/chapter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [chapter("c1", "1")],
            "total": 1
        })))
        .mount(&server)
        .await;
    mount_manifest(&server, "c1", "h1").await;
    let temp = TempDir::new().expect("temp dir");

    let settings = CatalogSettings {
        data_saver: true,
        ..fast_settings(&server)
    };
    let discovery = catalog(&server, "komi-san", settings, temp.path())
        .discover()
        .await
        .expect("discovery succeeds");

    assert_eq!(
        discovery.items[0].address,
        format!("{}/cdn/data-saver/h1/1.jpg", server.uri())
    );
}

#[tokio::test]
async fn test_catalog_search_without_hit_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manga"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [], "total": 0 })))
        .mount(&server)
        .await;
    let temp = TempDir::new().expect("temp dir");

    let result = catalog(&server, "no such work", fast_settings(&server), temp.path())
        .discover()
        .await;

    assert!(matches!(result, Err(DiscoveryError::WorkNotFound { .. })));
}

// ==================== Axis Walk Tests ====================

async fn mount_head(server: &MockServer, page_path: &str) {
    Mock::given(method("HEAD"))
        .and(path(page_path))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

/// Chapter 1 on the first mirror, chapter 2 on the second, 3.1 on the first.
async fn mount_mirrors(server: &MockServer) {
    for page in ["0001-001", "0001-002", "0001-003", "0003.1-001"] {
        mount_head(server, &format!("/m1/work/{page}.png")).await;
    }
    for page in ["0001-001", "0002-001", "0002-002"] {
        mount_head(server, &format!("/m2/work/{page}.png")).await;
    }
}

fn walker(server: &MockServer, policy: MirrorPolicy, out: &Path) -> AxisWalker {
    let mirrors = MirrorSet::new([format!("{}/m1", server.uri()), format!("{}/m2", server.uri())])
        .expect("mirrors");
    let prober = HttpProber::new(client()).with_timeout(Duration::from_secs(2));
    AxisWalker::new(
        Arc::new(prober),
        mirrors,
        "work",
        out,
        AxisSettings {
            max_pages: 4,
            max_decimals: 2,
            workers: 4,
            policy,
            ..AxisSettings::default()
        },
        CancelToken::new(),
    )
}

#[tokio::test]
async fn test_axis_walk_over_http_mirrors() {
    let server = MockServer::start().await;
    mount_mirrors(&server).await;
    let temp = TempDir::new().expect("temp dir");

    let items = walker(&server, MirrorPolicy::FirstMatch, temp.path()).walk().await;
    let addresses: Vec<String> = items
        .iter()
        .map(|item| item.address.trim_start_matches(&server.uri()).to_string())
        .collect();

    assert_eq!(
        addresses,
        vec![
            "/m1/work/0001-001.png",
            "/m1/work/0001-002.png",
            "/m1/work/0001-003.png",
            "/m2/work/0002-001.png",
            "/m2/work/0002-002.png",
            "/m1/work/0003.1-001.png",
        ]
    );
    assert_eq!(items[5].destination, temp.path().join("work").join("chapter_0003.1"));
}

#[tokio::test]
async fn test_axis_walk_all_matches_keeps_duplicates() {
    let server = MockServer::start().await;
    mount_mirrors(&server).await;
    let temp = TempDir::new().expect("temp dir");

    let items = walker(&server, MirrorPolicy::AllMatches, temp.path()).walk().await;

    assert_eq!(items.len(), 7);
    assert!(items[1].address.ends_with("/m2/work/0001-001.png"));
    assert_eq!(items[0].file_name().as_deref(), Some("0001-001.png"));
    assert_eq!(items[1].file_name().as_deref(), Some("0001-001.mirror2.png"));
}

// ==================== Provider Dispatch Tests ====================

#[tokio::test]
async fn test_build_provider_runs_catalog_against_mock() {
    let server = MockServer::start().await;
    mount_title(&server).await;
    Mock::given(method("GET"))
        .and(path("/chapter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [], "total": 0 })))
        .mount(&server)
        .await;
    let temp = TempDir::new().expect("temp dir");

    let ctx = ProviderContext {
        client: client(),
        limiter: Arc::new(RateLimiter::disabled()),
        cancel: CancelToken::new(),
        output_dir: temp.path().to_path_buf(),
        axis: AxisSettings::default(),
        mirrors: MirrorSet::default(),
        probe_timeout: Duration::from_secs(1),
        catalog: fast_settings(&server),
    };
    let provider = build_provider(
        SourceKind::Catalog {
            identifier: WORK_ID.to_string(),
        },
        &ctx,
    );

    let discovery = provider.discover().await.expect("discovery succeeds");
    assert_eq!(provider.name(), "catalog");
    assert!(discovery.items.is_empty());
    assert_eq!(discovery.root, temp.path().join("Komi Can't Communicate"));
}
