//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the trawler, including:
//! - Building HTTP clients with timeouts and compression
//! - Per-source rate limiting
//! - Bounded retries with exponential backoff and jitter
//! - Identity rotation when a source blocks us
//! - Streaming binary downloads into blob storage

use crate::config::{Config, CrawlerConfig, HttpMethod};
use crate::crawler::identity::{Identity, IdentityPool, RotatingIdentityPool};
use crate::crawler::rate_limit::RateLimiter;
use crate::crawler::retry::{
    classify_error, classify_status, AttemptOutcome, RetryDecision, RetryPolicy, RetryReason,
};
use crate::storage::BlobStore;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::{redirect::Policy, Client, Method, Response};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Typed failure of a fetch after the retry policy has run its course
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("gave up after {attempts} attempts: {reason}")]
    Exhausted { attempts: u32, reason: RetryReason },

    #[error("HTTP {status} after {attempts} attempts")]
    Rejected { status: u16, attempts: u32 },

    #[error("transport error after {attempts} attempts: {reason}")]
    Transport { attempts: u32, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// Attempts consumed before the failure
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::Rejected { attempts, .. }
            | Self::Transport { attempts, .. } => *attempts,
            Self::Io(_) => 1,
            Self::InvalidRequest(_) => 0,
        }
    }
}

/// A successful fetch and the attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<T> {
    pub value: T,
    pub attempts: u32,
}

impl<T> Fetched<T> {
    /// Retries spent before success
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Everything needed to issue one logical request
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub url: String,
    pub method: HttpMethod,
    pub query: Vec<(String, String)>,
    /// Form body, sent only for POST
    pub form: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    /// Rate-limit bucket; `None` skips the limiter
    pub rate_key: Option<String>,
    /// Overrides the fetcher's retry policy for this request
    pub policy: Option<RetryPolicy>,
}

impl FetchRequest {
    /// A plain GET without rate limiting
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Spaces this request against others sharing `key`
    pub fn rate_limited(mut self, key: impl Into<String>) -> Self {
        self.rate_key = Some(key.into());
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// Builds an HTTP client with proper configuration
///
/// Redirects are followed (up to 10 hops): image hosts and search pages
/// routinely bounce through CDNs. The user agent is not fixed here; it comes
/// from the identity pool on every request.
///
/// # Example
///
/// ```no_run
/// use image_trawler::config::CrawlerConfig;
/// use image_trawler::crawler::build_http_client;
///
/// let client = build_http_client(&CrawlerConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &CrawlerConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Rate-limited, retrying HTTP fetcher
pub struct Fetcher {
    client: Client,
    identities: Arc<dyn IdentityPool>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    rate_interval: Duration,
    default_headers: BTreeMap<String, String>,
    default_cookies: BTreeMap<String, String>,
}

impl Fetcher {
    /// Creates a fetcher from configuration
    ///
    /// The limiter is shared so that concurrent runs against the same source
    /// still respect one interval between them.
    pub fn new(config: &Config, limiter: Arc<RateLimiter>) -> Result<Self, reqwest::Error> {
        let client = build_http_client(&config.crawler)?;
        let policy = RetryPolicy::new(
            config.crawler.max_attempts,
            Duration::from_millis(config.crawler.backoff_base_ms),
            Duration::from_millis(config.crawler.max_jitter_ms),
        );

        Ok(Self {
            client,
            identities: Arc::new(RotatingIdentityPool::from_config(&config.identity)),
            limiter,
            policy,
            rate_interval: Duration::from_millis(config.crawler.rate_limit_interval_ms),
            default_headers: config.headers.clone(),
            default_cookies: config.cookies.clone(),
        })
    }

    /// Replaces the identity pool
    pub fn with_identities(mut self, identities: Arc<dyn IdentityPool>) -> Self {
        self.identities = identities;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetches a page or API response as text
    pub async fn fetch_text(&self, request: &FetchRequest) -> Result<Fetched<String>, FetchError> {
        self.execute(request, read_text).await
    }

    /// Downloads a binary body into blob storage at `path`
    ///
    /// Returns the number of bytes written. A failed attempt never leaves a
    /// partial file behind.
    pub async fn download_to(
        &self,
        request: &FetchRequest,
        blobs: &BlobStore,
        path: &Path,
    ) -> Result<Fetched<u64>, FetchError> {
        self.execute(request, move |response| stream_to_blob(response, blobs, path))
            .await
    }

    /// Sends a single request with the default headers and a fresh identity
    ///
    /// No rate limiting and no retries; used for content-type checks.
    pub async fn send_once(
        &self,
        method: Method,
        url: &str,
        extra: HeaderMap,
    ) -> Result<Response, reqwest::Error> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.default_headers {
            insert_header(&mut headers, name, value);
        }
        if let Some(cookie) = cookie_header(&self.default_cookies, &BTreeMap::new()) {
            headers.insert(COOKIE, cookie);
        }
        self.identities.initial().apply(&mut headers);
        headers.extend(extra);

        self.client
            .request(method, url)
            .headers(headers)
            .send()
            .await
    }

    /// Runs the retry loop for one request under its own policy, or ours
    ///
    /// `on_success` consumes a 200 response; it may itself report a
    /// retryable failure (for example a body cut off mid-stream).
    async fn execute<T, F, Fut>(
        &self,
        request: &FetchRequest,
        mut on_success: F,
    ) -> Result<Fetched<T>, FetchError>
    where
        F: FnMut(Response) -> Fut,
        Fut: Future<Output = Result<AttemptOutcome<T>, FetchError>>,
    {
        let policy = request.policy.as_ref().unwrap_or(&self.policy);
        let base_headers = self.base_headers(request)?;
        let mut identity = self.identities.initial();
        let mut last_reason = None;

        for attempt in 0..policy.max_attempts {
            if let Some(key) = &request.rate_key {
                self.limiter.acquire(key, self.rate_interval).await;
            }

            tracing::debug!(
                "{:?} {} (attempt {}/{})",
                request.method,
                request.url,
                attempt + 1,
                policy.max_attempts
            );

            let outcome = match self.build(request, &base_headers, &identity).send().await {
                Ok(response) => {
                    let status = response.status();
                    match classify_status(status) {
                        AttemptOutcome::Success(()) => on_success(response).await?,
                        AttemptOutcome::Retryable(reason) => AttemptOutcome::Retryable(reason),
                        AttemptOutcome::Fatal(_) => {
                            return Err(FetchError::Rejected {
                                status: status.as_u16(),
                                attempts: attempt + 1,
                            });
                        }
                    }
                }
                Err(e) => classify_error(&e),
            };

            let reason = match outcome {
                AttemptOutcome::Success(value) => {
                    return Ok(Fetched {
                        value,
                        attempts: attempt + 1,
                    });
                }
                AttemptOutcome::Fatal(reason) => {
                    return Err(FetchError::Transport {
                        attempts: attempt + 1,
                        reason,
                    });
                }
                AttemptOutcome::Retryable(reason) => reason,
            };

            let jitter: f64 = rand::thread_rng().gen();
            match policy.decide(attempt, &reason, jitter) {
                RetryDecision::GiveUp => {
                    tracing::warn!(
                        "Giving up on {} after {} attempts: {}",
                        request.url,
                        attempt + 1,
                        reason
                    );
                    return Err(FetchError::Exhausted {
                        attempts: attempt + 1,
                        reason,
                    });
                }
                RetryDecision::RetryAfter {
                    delay,
                    rotate_identity,
                } => {
                    tracing::warn!(
                        "{} on {}, retrying in {:?}",
                        reason,
                        request.url,
                        delay
                    );
                    if rotate_identity {
                        identity = self.identities.rotate(attempt + 1);
                    }
                    last_reason = Some(reason);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(FetchError::Exhausted {
            attempts: policy.max_attempts,
            reason: last_reason.unwrap_or(RetryReason::Network("no attempts allowed".to_string())),
        })
    }

    /// Default headers, then request headers, then cookies
    fn base_headers(&self, request: &FetchRequest) -> Result<HeaderMap, FetchError> {
        let mut headers = HeaderMap::new();
        for (name, value) in self.default_headers.iter().chain(request.headers.iter()) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FetchError::InvalidRequest(format!("header '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FetchError::InvalidRequest(format!("header value: {}", e)))?;
            headers.insert(name, value);
        }

        if let Some(cookie) = cookie_header(&self.default_cookies, &request.cookies) {
            headers.insert(COOKIE, cookie);
        }

        Ok(headers)
    }

    fn build(
        &self,
        request: &FetchRequest,
        base_headers: &HeaderMap,
        identity: &Identity,
    ) -> reqwest::RequestBuilder {
        let mut headers = base_headers.clone();
        identity.apply(&mut headers);

        let builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url).form(&request.form),
        };

        builder.query(&request.query).headers(headers)
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::warn!("Skipping invalid header '{}'", name),
    }
}

/// Merges cookie maps into one `Cookie` header; later maps win
fn cookie_header(
    defaults: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> Option<HeaderValue> {
    let mut merged = defaults.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    if merged.is_empty() {
        return None;
    }

    let joined = merged
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("; ");
    HeaderValue::from_str(&joined).ok()
}

async fn read_text(response: Response) -> Result<AttemptOutcome<String>, FetchError> {
    Ok(match response.text().await {
        Ok(body) => AttemptOutcome::Success(body),
        Err(e) => classify_error(&e),
    })
}

async fn stream_to_blob(
    mut response: Response,
    blobs: &BlobStore,
    path: &Path,
) -> Result<AttemptOutcome<u64>, FetchError> {
    let mut writer = blobs.create(path).await?;

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if let Err(e) = writer.write_chunk(&chunk).await {
                    writer.abort().await;
                    return Err(e.into());
                }
            }
            Ok(None) => break,
            Err(e) => {
                writer.abort().await;
                return Ok(classify_error(&e));
            }
        }
    }

    let written = writer.written();
    writer.finish().await?;
    Ok(AttemptOutcome::Success(written))
}
