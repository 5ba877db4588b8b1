//! Integration tests for the crawler against a mock listing API.

use std::time::Duration;

use harvester_core::{
    CrawlPhase, Crawler, Database, FileStatus, Phase, RecordStore, RemoteClient, RetryPolicy,
    StopSignal,
};
use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Retry policy without noticeable waits.
fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(
        3,
        Duration::from_millis(1),
        Duration::from_millis(5),
        2.0,
    )
    .with_max_jitter(Duration::ZERO)
}

async fn crawler_for(server: &MockServer) -> Crawler<RemoteClient> {
    let db = Database::new_in_memory().await.unwrap();
    let client = RemoteClient::new(Url::parse(&server.uri()).unwrap(), "t0ken").unwrap();
    Crawler::new(client, RecordStore::new(db), 2).with_retry_policy(fast_retry())
}

async fn mount_page(server: &MockServer, dir: &str, page: u32, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/api/fs/list"))
        .and(query_param("dir", dir))
        .and(query_param("page", page.to_string()))
        .and(header("authorization", "Bearer t0ken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// `/` → `a/` → { f1.txt (page 1), b/ (page 1), f3.txt (page 2) }; `b/` → f2.txt.
async fn mount_tree(server: &MockServer) {
    mount_page(
        server,
        "/",
        1,
        json!({ "entries": [ { "name": "a", "isDirectory": true } ], "hasMore": false }),
    )
    .await;
    mount_page(
        server,
        "/a",
        1,
        json!({
            "entries": [
                { "name": "f1.txt", "path": "/a/f1.txt", "size": 100, "signature": "s1", "isDirectory": false },
                { "name": "b", "path": "/a/b", "isDirectory": true }
            ],
            "hasMore": true
        }),
    )
    .await;
    mount_page(
        server,
        "/a",
        2,
        json!({
            "entries": [ { "name": "f3.txt", "size": 7, "sign": "s3" } ],
            "hasMore": false
        }),
    )
    .await;
    mount_page(
        server,
        "/a/b",
        1,
        json!({
            "entries": [ { "name": "f2.txt", "path": "/a/b/f2.txt", "size": 200, "signature": "s2" } ],
            "hasMore": false
        }),
    )
    .await;
}

#[tokio::test]
async fn test_crawl_walks_nested_paged_tree() {
    let server = MockServer::start().await;
    mount_tree(&server).await;
    let crawler = crawler_for(&server).await;

    let stats = crawler.crawl("/", &StopSignal::new()).await;

    assert_eq!(stats.directories_listed, 3);
    assert_eq!(stats.files_seen, 3);
    assert_eq!(stats.inserted, 3);
    assert_eq!(stats.directories_failed, 0);

    let store = crawler.store();
    let f1 = store.find_by_path("/a/f1.txt").await.unwrap().unwrap();
    assert_eq!((f1.size, f1.signature.as_str()), (100, "s1"));
    let f2 = store.find_by_path("/a/b/f2.txt").await.unwrap().unwrap();
    assert_eq!((f2.size, f2.signature.as_str()), (200, "s2"));
    let f3 = store.find_by_path("/a/f3.txt").await.unwrap().unwrap();
    assert_eq!(f3.signature, "s3");
    assert_eq!(store.count_by_status(FileStatus::Pending).await.unwrap(), 3);
}

#[tokio::test]
async fn test_repeated_crawls_keep_one_row_per_path() {
    let server = MockServer::start().await;
    mount_tree(&server).await;
    let crawler = crawler_for(&server).await;

    crawler.crawl("/", &StopSignal::new()).await;
    let second = crawler.crawl("/", &StopSignal::new()).await;
    let third = crawler.crawl("/", &StopSignal::new()).await;

    assert_eq!(second.inserted, 0);
    assert_eq!(second.unchanged, 3);
    assert_eq!(third.unchanged, 3);
    assert_eq!(
        crawler
            .store()
            .count_by_status(FileStatus::Pending)
            .await
            .unwrap(),
        3
    );
}

#[tokio::test]
async fn test_failing_directory_skips_only_its_subtree() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        1,
        json!({
            "entries": [
                { "name": "bad", "isDirectory": true },
                { "name": "good", "isDirectory": true }
            ],
            "hasMore": false
        }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/api/fs/list"))
        .and(query_param("dir", "/bad"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    mount_page(
        &server,
        "/good",
        1,
        json!({ "entries": [ { "name": "ok.bin", "size": 1, "signature": "s" } ], "hasMore": false }),
    )
    .await;
    let crawler = crawler_for(&server).await;

    let stats = crawler.crawl("/", &StopSignal::new()).await;

    assert_eq!(stats.directories_failed, 1);
    assert_eq!(stats.inserted, 1);
    assert!(
        crawler
            .store()
            .find_by_path("/good/ok.bin")
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_transient_listing_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/fs/list"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_page(
        &server,
        "/",
        1,
        json!({ "entries": [ { "name": "x.bin", "size": 3, "signature": "s" } ], "hasMore": false }),
    )
    .await;
    let crawler = crawler_for(&server).await;

    let stats = crawler.crawl("/", &StopSignal::new()).await;

    assert_eq!(stats.directories_failed, 0);
    assert_eq!(stats.inserted, 1);
}

#[tokio::test]
async fn test_crawl_phase_reports_stats() {
    let server = MockServer::start().await;
    mount_tree(&server).await;
    let phase = CrawlPhase::new(crawler_for(&server).await, "/a/b");

    let stats = phase.run_pass(&StopSignal::new()).await.unwrap();

    assert_eq!(phase.name(), "crawl");
    assert_eq!(stats.directories_listed, 1);
    assert_eq!(stats.inserted, 1);
}
