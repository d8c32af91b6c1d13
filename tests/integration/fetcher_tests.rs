//! Integration tests for the fetcher and content verifier
//!
//! These tests use wiremock to create mock HTTP servers and check retry,
//! backoff and content verification against real HTTP exchanges.

use image_trawler::config::{parse_config, Config};
use image_trawler::crawler::{
    ContentVerifier, FetchError, FetchRequest, Fetcher, RateLimiter, RetryPolicy, RetryReason,
    VerifyError,
};
use image_trawler::storage::BlobStore;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration with fast retries and no rate limiting
fn create_test_config(max_attempts: u32) -> Config {
    parse_config(&format!(
        r#"
[crawler]
rate-limit-interval-ms = 0
max-attempts = {}
backoff-base-ms = 1
max-jitter-ms = 0
candidate-delay-min-ms = 0
candidate-delay-max-ms = 0

[storage]
database-path = "./unused.db"
blob-root = "./unused"

[[source]]
name = "mock"
url = "http://127.0.0.1/"
"#,
        max_attempts
    ))
    .expect("Failed to parse test config")
}

fn create_fetcher(max_attempts: u32) -> Arc<Fetcher> {
    let config = create_test_config(max_attempts);
    Arc::new(Fetcher::new(&config, Arc::new(RateLimiter::new())).expect("Failed to build fetcher"))
}

#[tokio::test]
async fn test_rate_limited_once_then_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .mount(&mock_server)
        .await;

    let fetcher = create_fetcher(3);
    let request = FetchRequest::get(format!("{}/page", mock_server.uri())).rate_limited("mock");

    let fetched = fetcher.fetch_text(&request).await.unwrap();
    assert_eq!(fetched.value, "hello");
    assert_eq!(fetched.attempts, 2);
    assert_eq!(fetched.retries(), 1);
}

#[tokio::test]
async fn test_blocked_until_exhausted() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(403))
        .expect(3)
        .mount(&mock_server)
        .await;

    let fetcher = create_fetcher(3);
    let request = FetchRequest::get(format!("{}/page", mock_server.uri()));

    let result = fetcher.fetch_text(&request).await;
    match result {
        Err(FetchError::Exhausted { attempts, reason }) => {
            assert_eq!(attempts, 3);
            assert_eq!(reason, RetryReason::Blocked);
        }
        other => panic!("expected exhausted retries, got {:?}", other),
    }
}

#[tokio::test]
async fn test_server_error_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let fetcher = create_fetcher(3);
    let request = FetchRequest::get(format!("{}/page", mock_server.uri()));

    let fetched = fetcher.fetch_text(&request).await.unwrap();
    assert_eq!(fetched.attempts, 3);
}

#[tokio::test]
async fn test_request_policy_overrides_fetcher_policy() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/img/slow.jpg"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = create_fetcher(3);
    let request = FetchRequest::get(format!("{}/img/slow.jpg", mock_server.uri()))
        .with_policy(RetryPolicy::new(1, Duration::from_millis(1), Duration::ZERO));

    match fetcher.fetch_text(&request).await {
        Err(FetchError::Exhausted { attempts, reason }) => {
            assert_eq!(attempts, 1);
            assert_eq!(reason, RetryReason::ServerError(503));
        }
        other => panic!("expected exhausted retries, got {:?}", other),
    }
    // The fetcher's own budget is untouched
    assert_eq!(fetcher.policy().max_attempts, 3);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = create_fetcher(3);
    let request = FetchRequest::get(format!("{}/missing", mock_server.uri()));

    let result = fetcher.fetch_text(&request).await;
    assert!(matches!(
        result,
        Err(FetchError::Rejected {
            status: 404,
            attempts: 1
        })
    ));
}

#[tokio::test]
async fn test_download_writes_blob() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/img/a.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"\x89PNG\r\n\x1a\n".to_vec())
                .insert_header("content-type", "image/png"),
        )
        .mount(&mock_server)
        .await;

    let fetcher = create_fetcher(3);
    let blobs = BlobStore::new(dir.path());
    let target = blobs.path_in("mock", "a.png");
    let request = FetchRequest::get(format!("{}/img/a.png", mock_server.uri()));

    let fetched = fetcher.download_to(&request, &blobs, &target).await.unwrap();
    assert_eq!(fetched.value, 8);
    assert_eq!(std::fs::read(&target).unwrap(), b"\x89PNG\r\n\x1a\n");
}

#[tokio::test]
async fn test_verify_falls_back_to_ranged_get() {
    let mock_server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/img/b"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/img/b"))
        .and(header("range", "bytes=0-0"))
        .respond_with(ResponseTemplate::new(206).insert_header("content-type", "image/png"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let verifier = ContentVerifier::new(create_fetcher(3), "jpg");
    let extension = verifier
        .verify(&format!("{}/img/b", mock_server.uri()))
        .await
        .unwrap();
    assert_eq!(extension.as_deref(), Some("png"));
}

#[tokio::test]
async fn test_verify_head_content_types() {
    let mock_server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/img/c"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/webp"))
        .mount(&mock_server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/page.html"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/img/d"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/x-icon"))
        .mount(&mock_server)
        .await;

    let verifier = ContentVerifier::new(create_fetcher(3), "jpg");
    let base = mock_server.uri();

    assert_eq!(
        verifier.verify(&format!("{}/img/c", base)).await.unwrap().as_deref(),
        Some("webp")
    );
    assert_eq!(
        verifier.verify(&format!("{}/page.html", base)).await,
        Ok(None)
    );
    // Unknown image types fall back to the default extension
    assert_eq!(
        verifier.verify(&format!("{}/img/d", base)).await.unwrap().as_deref(),
        Some("jpg")
    );
}

#[tokio::test]
async fn test_verify_reports_unreachable_candidates() {
    let mock_server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/img/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/broken"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&mock_server)
        .await;

    let verifier = ContentVerifier::new(create_fetcher(3), "jpg");
    let base = mock_server.uri();

    assert_eq!(
        verifier.verify(&format!("{}/img/broken", base)).await,
        Err(VerifyError::Status(502))
    );

    // Nothing listens on port 9 of the loopback interface
    assert!(matches!(
        verifier.verify("http://127.0.0.1:9/img/gone.jpg").await,
        Err(VerifyError::Transport(_))
    ));
}
