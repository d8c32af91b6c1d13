//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end: page fetch, extraction, probing,
//! cataloguing and download.

use image_trawler::config::{parse_config, Config};
use image_trawler::crawler::{CrawlRequest, RunRegistry, RunState};
use image_trawler::state::DownloadStatus;
use image_trawler::storage::{open_storage, ImageStore, NewImage, SqliteStorage};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing one source at the mock server
fn create_test_config(dir: &Path, source: &str, candidate_delay_ms: u64) -> Config {
    create_test_config_with(dir, source, candidate_delay_ms, "")
}

/// Same as [`create_test_config`], with extra `[crawler]` keys
fn create_test_config_with(
    dir: &Path,
    source: &str,
    candidate_delay_ms: u64,
    crawler_extra: &str,
) -> Config {
    parse_config(&format!(
        r#"
[crawler]
rate-limit-interval-ms = 0
max-attempts = 2
backoff-base-ms = 1
max-jitter-ms = 0
candidate-delay-min-ms = {delay}
candidate-delay-max-ms = {delay}
default-max-links = 5
{crawler_extra}

[storage]
database-path = "{db}"
blob-root = "{blob}"

[extraction]
patterns = [{{ kind = "prefix", prefix = "http://" }}]

{source}
"#,
        delay = candidate_delay_ms,
        crawler_extra = crawler_extra,
        db = dir.join("images.db").display(),
        blob = dir.join("blob").display(),
        source = source,
    ))
    .expect("Failed to parse test config")
}

fn get_source(base_url: &str) -> String {
    format!(
        r#"
[[source]]
name = "mock"
url = "{}/api/page"
query-param = "q"
cursor-param = "first"
"#,
        base_url
    )
}

/// A page body listing `count` image URLs the way a JSON search API would
fn page_body(base_url: &str, range: std::ops::Range<usize>) -> String {
    let items: Vec<String> = range
        .map(|i| format!(r#"{{"murl":"{}/img/{}.jpg"}}"#, base_url, i))
        .collect();
    format!(r#"{{"results":[{}]}}"#, items.join(","))
}

/// Mounts HEAD and GET handlers answering every /img/ path with a JPEG
async fn mount_images(mock_server: &MockServer) {
    Mock::given(method("HEAD"))
        .and(path_regex(r"^/img/.*"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/jpeg"))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/img/.*"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"\xff\xd8\xff\xe0fakejpeg".to_vec())
                .insert_header("content-type", "image/jpeg"),
        )
        .mount(mock_server)
        .await;
}

fn reopen(dir: &Path) -> SqliteStorage {
    SqliteStorage::new(&dir.join("images.db")).expect("Failed to reopen catalog")
}

#[tokio::test]
async fn test_crawl_respects_max_links() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/page"))
        .and(query_param("q", "red fox"))
        .and(query_param("first", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_body(&base_url, 0..8)))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_images(&mock_server).await;

    let config = create_test_config(dir.path(), &get_source(&base_url), 0);
    let storage = open_storage(&dir.path().join("images.db")).unwrap();
    let registry = RunRegistry::new(config, storage).unwrap();

    let mut request = CrawlRequest::new("mock", "red fox");
    request.max_links = Some(5);
    let run_id = registry.start_crawl(request).unwrap();
    let report = registry.wait(&run_id).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert!(!report.is_running);
    assert_eq!(report.counters.found, 8);
    assert_eq!(report.counters.saved, 5);
    assert_eq!(report.counters.downloaded, 5);
    assert_eq!(report.counters.errors, 0);

    let catalog = reopen(dir.path());
    assert_eq!(catalog.count_total().unwrap(), 5);
    assert_eq!(
        catalog.count_by_status(DownloadStatus::Completed).unwrap(),
        5
    );

    let record = catalog
        .find_by_url(&format!("{}/img/0.jpg", base_url))
        .unwrap()
        .expect("first candidate should be catalogued");
    assert!(record.is_downloaded);
    assert_eq!(record.format, "jpg");
    assert_eq!(record.source, "mock");
    assert_eq!(record.tags, vec!["red fox".to_string()]);
    assert!(record.filename.starts_with("red_fox_"));
    assert!(Path::new(&record.file_path).exists());
    assert!(record.file_path.contains("mock"));
}

#[tokio::test]
async fn test_second_run_skips_known_urls() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_body(&base_url, 0..3)))
        .expect(2)
        .mount(&mock_server)
        .await;
    mount_images(&mock_server).await;

    let config = create_test_config(dir.path(), &get_source(&base_url), 0);
    let storage = open_storage(&dir.path().join("images.db")).unwrap();
    let registry = RunRegistry::new(config, storage).unwrap();

    let first = registry
        .start_crawl(CrawlRequest::new("mock", "owl"))
        .unwrap();
    let first = registry.wait(&first).await.unwrap();
    assert_eq!(first.counters.saved, 3);

    let second = registry
        .start_crawl(CrawlRequest::new("mock", "owl"))
        .unwrap();
    let second = registry.wait(&second).await.unwrap();
    assert_eq!(second.state, RunState::Completed);
    assert_eq!(second.counters.unique, 3);
    assert_eq!(second.counters.saved, 0);
    assert_eq!(second.counters.downloaded, 0);

    assert_eq!(reopen(dir.path()).count_total().unwrap(), 3);
}

#[tokio::test]
async fn test_page_failure_ends_run() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/page"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&mock_server)
        .await;

    let config = create_test_config(dir.path(), &get_source(&base_url), 0);
    let storage = open_storage(&dir.path().join("images.db")).unwrap();
    let registry = RunRegistry::new(config, storage).unwrap();

    let mut request = CrawlRequest::new("mock", "heron");
    request.loop_count = 3;
    let run_id = registry.start_crawl(request).unwrap();
    let report = registry.wait(&run_id).await.unwrap();

    assert_eq!(report.state, RunState::FailedToFetch);
    assert_eq!(report.units_completed, 0);
    assert_eq!(report.counters.errors, 1);
    assert_eq!(report.counters.retries, 1);
    assert!(report.last_error.is_some());
    assert_eq!(reopen(dir.path()).count_total().unwrap(), 0);
}

#[tokio::test]
async fn test_non_images_are_skipped() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"{{"results":[{{"murl":"{0}/img/1.jpg"}},{{"murl":"{0}/article.html"}}]}}"#,
            base_url
        )))
        .mount(&mock_server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/article.html"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
        .mount(&mock_server)
        .await;
    mount_images(&mock_server).await;

    let config = create_test_config(dir.path(), &get_source(&base_url), 0);
    let storage = open_storage(&dir.path().join("images.db")).unwrap();
    let registry = RunRegistry::new(config, storage).unwrap();

    let run_id = registry
        .start_crawl(CrawlRequest::new("mock", "egret"))
        .unwrap();
    let report = registry.wait(&run_id).await.unwrap();

    assert_eq!(report.counters.unique, 2);
    assert_eq!(report.counters.verified, 1);
    assert_eq!(report.counters.saved, 1);
    // A definite "not an image" is a plain skip
    assert_eq!(report.counters.errors, 0);
    assert_eq!(reopen(dir.path()).count_total().unwrap(), 1);
}

#[tokio::test]
async fn test_unverifiable_candidates_are_counted() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"{{"results":[{{"murl":"{0}/img/1.jpg"}},{{"murl":"{0}/down/2.jpg"}}]}}"#,
            base_url
        )))
        .mount(&mock_server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/down/2.jpg"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/down/2.jpg"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_images(&mock_server).await;

    let config = create_test_config(dir.path(), &get_source(&base_url), 0);
    let storage = open_storage(&dir.path().join("images.db")).unwrap();
    let registry = RunRegistry::new(config, storage).unwrap();

    let run_id = registry
        .start_crawl(CrawlRequest::new("mock", "stork"))
        .unwrap();
    let report = registry.wait(&run_id).await.unwrap();

    // The failure is counted and the run carries on
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.counters.unique, 2);
    assert_eq!(report.counters.verified, 1);
    assert_eq!(report.counters.errors, 1);
    assert_eq!(report.counters.downloaded, 1);

    let catalog = reopen(dir.path());
    assert_eq!(catalog.count_total().unwrap(), 1);
    assert!(!catalog
        .exists(&format!("{}/down/2.jpg", base_url))
        .unwrap());
}

#[tokio::test]
async fn test_failed_download_recorded() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_body(&base_url, 0..1)))
        .mount(&mock_server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/img/0.jpg"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/jpeg"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/0.jpg"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&mock_server)
        .await;

    let config = create_test_config(dir.path(), &get_source(&base_url), 0);
    let storage = open_storage(&dir.path().join("images.db")).unwrap();
    let registry = RunRegistry::new(config, storage).unwrap();

    let run_id = registry
        .start_crawl(CrawlRequest::new("mock", "crane"))
        .unwrap();
    let report = registry.wait(&run_id).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.counters.saved, 1);
    assert_eq!(report.counters.downloaded, 0);
    assert_eq!(report.counters.errors, 1);

    let catalog = reopen(dir.path());
    let record = catalog
        .find_by_url(&format!("{}/img/0.jpg", base_url))
        .unwrap()
        .unwrap();
    assert_eq!(record.status, DownloadStatus::Failed);
    assert!(!record.is_downloaded);
    assert!(record.error_message.is_some());
}

#[tokio::test]
async fn test_loop_count_advances_cursor() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/page"))
        .and(query_param("first", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_body(&base_url, 0..2)))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/page"))
        .and(query_param("first", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_body(&base_url, 2..4)))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_images(&mock_server).await;

    let source = format!(
        r#"
[[source]]
name = "mock"
url = "{}/api/page"
query-param = "q"
cursor-param = "first"
cursor-step = 10
"#,
        base_url
    );
    let config = create_test_config(dir.path(), &source, 0);
    let storage = open_storage(&dir.path().join("images.db")).unwrap();
    let registry = RunRegistry::new(config, storage).unwrap();

    let mut request = CrawlRequest::new("mock", "ibis");
    request.cursor_start = 10;
    request.loop_count = 2;
    let run_id = registry.start_crawl(request).unwrap();
    let report = registry.wait(&run_id).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.units_completed, 2);
    assert_eq!(report.cursor, 20);
    assert_eq!(report.counters.saved, 4);
}

#[tokio::test]
async fn test_post_source_sends_form() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/api/search"))
        .and(body_string_contains("query=kite"))
        .and(body_string_contains("page=3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_body(&base_url, 0..1)))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_images(&mock_server).await;

    let source = format!(
        r#"
[[source]]
name = "mock"
url = "{}/api/search"
method = "POST"
query-param = "query"
cursor-param = "page"
"#,
        base_url
    );
    let config = create_test_config(dir.path(), &source, 0);
    let storage = open_storage(&dir.path().join("images.db")).unwrap();
    let registry = RunRegistry::new(config, storage).unwrap();

    let mut request = CrawlRequest::new("mock", "kite");
    request.cursor_start = 3;
    let run_id = registry.start_crawl(request).unwrap();
    let report = registry.wait(&run_id).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.counters.saved, 1);
}

#[tokio::test]
async fn test_stop_crawl() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_body(&base_url, 0..5)))
        .mount(&mock_server)
        .await;
    mount_images(&mock_server).await;

    // Long polite delay so the run is parked between candidates
    let config = create_test_config(dir.path(), &get_source(&base_url), 30_000);
    let storage = open_storage(&dir.path().join("images.db")).unwrap();
    let registry = RunRegistry::new(config, storage).unwrap();

    let run_id = registry
        .start_crawl(CrawlRequest::new("mock", "lark"))
        .unwrap();

    let mut waited = Duration::ZERO;
    while registry.status(&run_id).unwrap().counters.saved < 1 {
        assert!(waited < Duration::from_secs(10), "run never saved a record");
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    assert!(registry.status(&run_id).unwrap().is_running);

    registry.stop(&run_id).unwrap();
    let report = tokio::time::timeout(Duration::from_secs(5), registry.wait(&run_id))
        .await
        .expect("run did not stop")
        .unwrap();

    assert_eq!(report.state, RunState::Stopped);
    assert!(!report.is_running);
    assert_eq!(report.counters.saved, 1);

    // Stopping a finished run is a no-op
    registry.stop(&run_id).unwrap();
}

#[tokio::test]
async fn test_unknown_source_fails_before_network() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = create_test_config(dir.path(), &get_source(&mock_server.uri()), 0);
    let storage = open_storage(&dir.path().join("images.db")).unwrap();
    let registry = RunRegistry::new(config, storage).unwrap();

    assert!(registry
        .start_crawl(CrawlRequest::new("elsewhere", "cats"))
        .is_err());
    assert!(registry.list().is_empty());
}

#[tokio::test]
async fn test_overlapping_runs_download_once() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_body(&base_url, 0..1)))
        .mount(&mock_server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/img/0.jpg"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/jpeg"))
        .mount(&mock_server)
        .await;
    // Slow enough that the second run finds the record mid-download
    Mock::given(method("GET"))
        .and(path("/img/0.jpg"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"\xff\xd8\xff\xe0fakejpeg".to_vec())
                .insert_header("content-type", "image/jpeg")
                .set_delay(Duration::from_secs(1)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    // Two registries sharing one catalog file, as two processes would
    let config = create_test_config(dir.path(), &get_source(&base_url), 0);
    let db = dir.path().join("images.db");
    let first = RunRegistry::new(config.clone(), open_storage(&db).unwrap()).unwrap();
    let second = RunRegistry::new(config, open_storage(&db).unwrap()).unwrap();

    let first_id = first
        .start_crawl(CrawlRequest::new("mock", "gull"))
        .unwrap();

    let mut waited = Duration::ZERO;
    while first.status(&first_id).unwrap().counters.saved < 1 {
        assert!(waited < Duration::from_secs(10), "first run never saved a record");
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }

    let second_id = second
        .start_crawl(CrawlRequest::new("mock", "gull"))
        .unwrap();

    let second_report = second.wait(&second_id).await.unwrap();
    let first_report = first.wait(&first_id).await.unwrap();

    assert_eq!(first_report.state, RunState::Completed, "{:?}", first_report.last_error);
    assert_eq!(second_report.state, RunState::Completed, "{:?}", second_report.last_error);
    assert_eq!(
        first_report.counters.downloaded + second_report.counters.downloaded,
        1
    );
    assert_eq!(first_report.counters.errors + second_report.counters.errors, 0);

    let catalog = reopen(dir.path());
    assert_eq!(catalog.count_total().unwrap(), 1);
    assert_eq!(
        catalog.count_by_status(DownloadStatus::Completed).unwrap(),
        1
    );
}

#[tokio::test]
async fn test_abandoned_download_is_taken_over() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_body(&base_url, 0..1)))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/0.jpg"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"\xff\xd8\xff\xe0fakejpeg".to_vec())
                .insert_header("content-type", "image/jpeg"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config_with(
        dir.path(),
        &get_source(&base_url),
        0,
        "request-timeout-secs = 1\nstale-download-secs = 1",
    );

    // A run that claimed the record and then died
    let url = format!("{}/img/0.jpg", base_url);
    {
        let mut catalog = open_storage(&dir.path().join("images.db")).unwrap();
        let id = catalog
            .upsert_pending(&NewImage {
                url: url.clone(),
                filename: "gull_0123456789ab.jpg".to_string(),
                file_path: dir
                    .path()
                    .join("blob/mock/gull_0123456789ab.jpg")
                    .to_string_lossy()
                    .into_owned(),
                format: "jpg".to_string(),
                source: "mock".to_string(),
                search_query: "gull".to_string(),
                tags: vec!["gull".to_string()],
            })
            .unwrap()
            .id;
        catalog
            .mark_status(&id, DownloadStatus::Downloading, None)
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let storage = open_storage(&dir.path().join("images.db")).unwrap();
    let registry = RunRegistry::new(config, storage).unwrap();
    let run_id = registry
        .start_crawl(CrawlRequest::new("mock", "gull"))
        .unwrap();
    let report = registry.wait(&run_id).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.counters.saved, 0);
    assert_eq!(report.counters.downloaded, 1);

    let record = reopen(dir.path()).find_by_url(&url).unwrap().unwrap();
    assert_eq!(record.status, DownloadStatus::Completed);
    assert!(Path::new(&record.file_path).exists());
}
