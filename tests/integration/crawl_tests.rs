//! Integration tests for the harvester
//!
//! These tests use wiremock to stand in for a booru-style site and run
//! the full list, resolve, download, commit cycle end-to-end.

use std::path::Path;
use sumi_harvest::config::{parse_config, Config};
use sumi_harvest::crawler::run_crawl;
use sumi_harvest::storage::{JsonStore, StateStore, StorePaths};
use sumi_harvest::{ItemId, StopReason};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration with every delay turned off
fn create_test_config(base_url: &str, dir: &Path, workers: u32) -> Config {
    parse_config(&format!(
        r#"
[crawler]
workers = {workers}
page-size = 2
inter-page-delay-ms = 0
inter-download-delay-ms = 0
item-delay-ms = 0
listing-delay-ms = 0
shutdown-grace-ms = 500

[http]
retry-base-delay-ms = 10
retry-step-ms = 10

[site]
base-url = "{base_url}"
tags = "alpha"
canonical-media-host = "media.booru.example"
media-host-aliases = ["127.0.0.1"]

[output]
download-dir = "{downloads}"
state-dir = "{state}"
"#,
        workers = workers,
        base_url = base_url,
        downloads = dir.join("downloads").display(),
        state = dir.join("state").display(),
    ))
    .expect("test config should be valid")
}

fn open_store(config: &Config) -> JsonStore {
    let destination = config.destination_dir();
    std::fs::create_dir_all(&destination).unwrap();
    JsonStore::load(
        StorePaths {
            processed: config.processed_path(),
            fetched: config.fetched_path(),
        },
        &destination,
        &config.site.media_extensions,
    )
}

fn listing_html(ids: &[u32]) -> String {
    let mut html = String::from("<html><body><div class=\"image-list\">");
    for id in ids {
        html.push_str(&format!(
            "<span class=\"thumb\"><a href=\"index.php?page=post&amp;s=view&amp;id={id}\">\
             <img src=\"/thumbnails/1/thumbnail_0a1b2c{id}.jpg?{id}\"></a></span>",
            id = id
        ));
    }
    html.push_str("</div></body></html>");
    html
}

fn item_html(asset: &str) -> String {
    format!(
        "<html><body><video><source src=\"{asset}\"></video>\
         <ul><li><a href=\"{asset}\">Original image</a></li></ul></body></html>",
        asset = asset
    )
}

async fn mount_listing(server: &MockServer, offset: u32, ids: &[u32]) {
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("s", "list"))
        .and(query_param("pid", offset.to_string().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(ids)))
        .mount(server)
        .await;
}

async fn mount_item(server: &MockServer, id: u32, asset: &str, expected: u64) {
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("s", "view"))
        .and(query_param("id", id.to_string().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(item_html(asset)))
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_media(server: &MockServer, media_path: &str, status: u16, expected: u64) {
    Mock::given(method("GET"))
        .and(path(media_path))
        .respond_with(ResponseTemplate::new(status).set_body_bytes(vec![9u8; 64]))
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_harvest_then_idempotent_rerun() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path(), 2);

    mount_listing(&server, 0, &[1, 2]).await;
    mount_listing(&server, 2, &[3]).await;
    mount_listing(&server, 4, &[]).await;
    mount_item(&server, 1, "/images/a.mp4", 1).await;
    mount_item(&server, 2, "/images/b.webm", 1).await;
    mount_item(&server, 3, "/images/c.mp4", 1).await;
    mount_media(&server, "/images/a.mp4", 200, 1).await;
    mount_media(&server, "/images/b.webm", 200, 1).await;
    mount_media(&server, "/images/c.mp4", 200, 1).await;

    let first = run_crawl(&config, Box::new(open_store(&config)), &CancellationToken::new())
        .await
        .expect("first run should succeed");

    assert_eq!(first.stop, StopReason::Exhausted);
    assert_eq!(first.pages_completed, 2);
    assert_eq!(first.downloaded, 3);

    let destination = config.destination_dir();
    for name in ["a_1.mp4", "b_2.webm", "c_3.mp4"] {
        let bytes = std::fs::read(destination.join(name)).unwrap();
        assert_eq!(bytes.len(), 64, "{} should be complete", name);
    }

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(config.results_path()).unwrap()).unwrap();
    assert_eq!(summary["tags"], "alpha");
    assert_eq!(summary["downloaded_count"], 3);
    let mut files: Vec<&str> = summary["downloaded_files"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f.as_str())
        .collect();
    files.sort_unstable();
    assert_eq!(files, vec!["a_1.mp4", "b_2.webm", "c_3.mp4"]);

    // Second run against the persisted state: no item page or asset is requested again
    let second = run_crawl(&config, Box::new(open_store(&config)), &CancellationToken::new())
        .await
        .expect("second run should succeed");

    assert_eq!(second.stop, StopReason::Exhausted);
    assert_eq!(second.downloaded, 0);
    assert_eq!(second.already_present, 0);

    // The summary describes the latest run only
    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(config.results_path()).unwrap()).unwrap();
    assert_eq!(summary["downloaded_count"], 0);
    assert_eq!(summary["stop_reason"], "listing exhausted");

    let store = open_store(&config);
    assert_eq!(store.processed_count(), 3);
    assert_eq!(store.fetched_count(), 3);
    assert!(store
        .fetched("b_2.webm")
        .unwrap()
        .is_owned_by(&ItemId::new("2")));
}

#[tokio::test]
async fn test_canonical_duplicates_download_once() {
    let site = MockServer::start().await;
    let mirror = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&site.uri(), dir.path(), 1);

    // Both servers are 127.0.0.1 on different ports; the alias collapses them
    mount_listing(&site, 0, &[1, 2]).await;
    mount_listing(&site, 2, &[]).await;
    mount_item(&site, 1, &format!("{}/images/same.mp4", site.uri()), 1).await;
    mount_item(&site, 2, &format!("{}/images/same.mp4", mirror.uri()), 1).await;
    mount_media(&site, "/images/same.mp4", 200, 1).await;
    mount_media(&mirror, "/images/same.mp4", 200, 0).await;

    let report = run_crawl(&config, Box::new(open_store(&config)), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stop, StopReason::Exhausted);
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.already_present, 1);

    let destination = config.destination_dir();
    assert!(destination.join("same_1.mp4").exists());
    assert!(!destination.join("same_2.mp4").exists());

    let store = open_store(&config);
    assert!(store.is_processed(&ItemId::new("1")));
    assert!(store.is_processed(&ItemId::new("2")));
}

#[tokio::test]
async fn test_failed_item_is_retried_on_next_run() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path(), 2);

    mount_listing(&server, 0, &[1, 2]).await;
    mount_listing(&server, 2, &[]).await;
    mount_item(&server, 1, "/images/a.mp4", 1).await;
    mount_item(&server, 2, "/images/b.mp4", 1).await;
    mount_media(&server, "/images/a.mp4", 200, 1).await;
    mount_media(&server, "/images/b.mp4", 500, 1).await;

    let first = run_crawl(&config, Box::new(open_store(&config)), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        first.stop,
        StopReason::Incomplete {
            page_offset: 0,
            remaining: vec![ItemId::new("2")]
        }
    );
    assert_eq!(first.unprocessed, vec![ItemId::new("2")]);
    assert_eq!(first.downloaded, 1);
    assert_eq!(first.failed, 1);
    assert!(!config.destination_dir().join("b_2.mp4").exists());

    server.verify().await;
    server.reset().await;

    // Only the failed item is resolved and downloaded again
    mount_listing(&server, 0, &[1, 2]).await;
    mount_listing(&server, 2, &[]).await;
    mount_item(&server, 1, "/images/a.mp4", 0).await;
    mount_item(&server, 2, "/images/b.mp4", 1).await;
    mount_media(&server, "/images/a.mp4", 200, 0).await;
    mount_media(&server, "/images/b.mp4", 200, 1).await;

    let second = run_crawl(&config, Box::new(open_store(&config)), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.stop, StopReason::Exhausted);
    assert_eq!(second.downloaded, 1);
    assert_eq!(second.failed, 0);
    assert!(config.destination_dir().join("b_2.mp4").exists());
}

#[tokio::test]
async fn test_empty_leftover_file_gets_duplicate_name() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path(), 1);

    mount_listing(&server, 0, &[1]).await;
    mount_listing(&server, 2, &[]).await;
    mount_item(&server, 1, "/images/a.mp4", 1).await;
    mount_media(&server, "/images/a.mp4", 200, 1).await;

    let store = open_store(&config);
    let destination = config.destination_dir();
    std::fs::write(destination.join("a_1.mp4"), b"").unwrap();

    let report = run_crawl(&config, Box::new(store), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.downloaded, 1);
    assert_eq!(std::fs::metadata(destination.join("a_1.mp4")).unwrap().len(), 0);
    assert_eq!(
        std::fs::read(destination.join("a_1_duplicate-1.mp4")).unwrap().len(),
        64
    );

    let store = open_store(&config);
    assert!(store
        .fetched("a_1_duplicate-1.mp4")
        .unwrap()
        .is_owned_by(&ItemId::new("1")));
}

#[tokio::test]
async fn test_reconciled_file_is_not_fetched_again() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path(), 1);

    mount_listing(&server, 0, &[1]).await;
    mount_listing(&server, 2, &[]).await;
    mount_item(&server, 1, "/images/a.mp4", 1).await;
    mount_media(&server, "/images/a.mp4", 200, 0).await;

    let mut store = open_store(&config);
    std::fs::write(config.destination_dir().join("a_1.mp4"), vec![1u8; 32]).unwrap();
    let reconciled = store.reconcile().unwrap();
    assert_eq!(reconciled.added, 1);

    let report = run_crawl(&config, Box::new(store), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.downloaded, 0);
    assert_eq!(report.already_present, 1);

    let store = open_store(&config);
    assert!(store.is_processed(&ItemId::new("1")));
    assert!(store
        .fetched("a_1.mp4")
        .unwrap()
        .is_owned_by(&ItemId::new("1")));
}

#[tokio::test]
async fn test_empty_listing_writes_state_and_stops() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path(), 1);

    mount_listing(&server, 0, &[]).await;

    let report = run_crawl(&config, Box::new(open_store(&config)), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stop, StopReason::Exhausted);
    assert_eq!(report.pages_completed, 0);
    assert!(config.processed_path().exists());
    assert!(config.fetched_path().exists());
}

#[tokio::test]
async fn test_item_without_media_is_processed() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path(), 1);

    mount_listing(&server, 0, &[1]).await;
    mount_listing(&server, 2, &[]).await;
    mount_item(&server, 1, "/images/a.jpg", 1).await;

    let report = run_crawl(&config, Box::new(open_store(&config)), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.no_asset, 1);
    assert_eq!(report.stop, StopReason::Exhausted);
    assert!(open_store(&config).is_processed(&ItemId::new("1")));
}

#[tokio::test]
async fn test_cancelled_run_stops_without_listing() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path(), 1);

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(&[1])))
        .expect(0)
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    token.cancel();

    let report = run_crawl(&config, Box::new(open_store(&config)), &token)
        .await
        .unwrap();
    assert_eq!(report.stop, StopReason::Cancelled);
}
