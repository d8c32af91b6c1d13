//! Content verification
//!
//! Decides whether a URL points at an image by asking the server for its
//! content type without downloading the body.

use crate::crawler::fetcher::Fetcher;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RANGE};
use reqwest::{Method, Response, StatusCode};
use std::sync::Arc;
use thiserror::Error;

/// Known image content types and their file extensions
const EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/jpg", "jpg"),
    ("image/pjpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
    ("image/gif", "gif"),
    ("image/bmp", "bmp"),
    ("image/tiff", "tiff"),
    ("image/svg+xml", "svg"),
    ("image/avif", "avif"),
];

/// Returns true if a content type denotes an image
pub fn is_image(content_type: &str) -> bool {
    media_type(content_type).starts_with("image/")
}

/// Maps a content type to a known file extension
pub fn infer_extension(content_type: &str) -> Option<&'static str> {
    let media = media_type(content_type);
    EXTENSIONS
        .iter()
        .find(|(known, _)| *known == media)
        .map(|(_, ext)| *ext)
}

/// The media type without parameters, lowercased
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Neither the HEAD nor the ranged GET got an answer we could use
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("server answered HTTP {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Transport(String),
}

/// Asks servers for the declared content type of candidate URLs
pub struct ContentVerifier {
    fetcher: Arc<Fetcher>,
    default_extension: String,
}

impl ContentVerifier {
    pub fn new(fetcher: Arc<Fetcher>, default_extension: impl Into<String>) -> Self {
        Self {
            fetcher,
            default_extension: default_extension.into(),
        }
    }

    /// Returns the declared content type of `url`, if the server tells us
    ///
    /// # Request Flow
    ///
    /// 1. HEAD request
    ///    - Status below 400 → use its Content-Type
    /// 2. HEAD refused (405, any 4xx/5xx) or failed → GET with `Range: bytes=0-0`
    ///    - Status below 400 → use its Content-Type
    /// 3. Otherwise → [`VerifyError`] from the ranged GET
    ///
    /// `Ok(None)` means the server answered without a Content-Type.
    pub async fn content_type_of(&self, url: &str) -> Result<Option<String>, VerifyError> {
        match self
            .fetcher
            .send_once(Method::HEAD, url, HeaderMap::new())
            .await
        {
            Ok(response) if accepted(&response) => return Ok(content_type(&response)),
            Ok(response) => {
                tracing::debug!(
                    "HEAD {} returned {}, falling back to ranged GET",
                    url,
                    response.status()
                );
            }
            Err(e) => tracing::debug!("HEAD {} failed: {}", url, e),
        }

        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_static("bytes=0-0"));

        match self.fetcher.send_once(Method::GET, url, headers).await {
            Ok(response) if accepted(&response) => Ok(content_type(&response)),
            Ok(response) => Err(VerifyError::Status(response.status().as_u16())),
            Err(e) => Err(VerifyError::Transport(e.to_string())),
        }
    }

    /// Returns the extension of `url` if it is an image
    ///
    /// `Ok(None)` is a definite "not an image"; `Err` means the server could
    /// not be asked. Unknown image types get the default extension.
    pub async fn verify(&self, url: &str) -> Result<Option<String>, VerifyError> {
        let Some(content_type) = self.content_type_of(url).await? else {
            tracing::debug!("No content type for {}", url);
            return Ok(None);
        };
        if !is_image(&content_type) {
            tracing::debug!("Not an image: {} ({})", url, content_type);
            return Ok(None);
        }
        Ok(Some(self.extension_or_default(&content_type)))
    }

    /// Extension for an image content type, falling back to the default
    pub fn extension_or_default(&self, content_type: &str) -> String {
        infer_extension(content_type)
            .map(str::to_string)
            .unwrap_or_else(|| self.default_extension.clone())
    }
}

fn accepted(response: &Response) -> bool {
    response.status() != StatusCode::METHOD_NOT_ALLOWED && response.status().as_u16() < 400
}

fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
