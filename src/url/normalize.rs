use crate::url::extract::unescape_url;
use crate::UrlError;
use std::collections::HashSet;
use url::Url;

/// Upper bound on nested redirector hops followed for one URL; deeper
/// chains are dropped rather than left half-resolved
const MAX_WRAPPER_DEPTH: usize = 8;

/// A URL discovered during a crawl, before verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    /// URL as it appeared in the fetched content
    pub raw_url: String,
    /// Wrapper-resolved, canonical form used as the uniqueness key
    pub canonical_url: String,
    /// Search query that produced the candidate
    pub query: String,
    /// Source that produced the candidate
    pub source: String,
}

/// Canonicalizes a URL
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Only http and https are accepted
/// 3. A host is required
/// 4. Remove fragment (everything after #)
///
/// Host case and default ports are folded by the parser itself. Paths and
/// query strings are left alone: image CDNs treat both as significant.
///
/// # Examples
///
/// ```
/// use image_trawler::url::canonicalize_url;
///
/// let url = canonicalize_url("HTTPS://X.TEST:443/a.jpg#top").unwrap();
/// assert_eq!(url.as_str(), "https://x.test/a.jpg");
/// ```
pub fn canonicalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingHost);
    }

    url.set_fragment(None);

    Ok(url)
}

/// Resolves redirector URLs, filters noise and deduplicates
#[derive(Debug, Clone)]
pub struct Normalizer {
    wrapper_params: Vec<String>,
    noise: Vec<String>,
}

impl Normalizer {
    pub fn new(wrapper_params: &[String], noise: &[String]) -> Self {
        Self {
            wrapper_params: wrapper_params.iter().map(|p| p.to_lowercase()).collect(),
            noise: noise.to_vec(),
        }
    }

    /// Normalizes a batch of raw URLs
    ///
    /// The output keeps the first occurrence of each canonical URL, in input
    /// order. Running it again on its own output returns the same sequence.
    pub fn normalize(&self, raw_urls: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        raw_urls
            .iter()
            .filter_map(|raw| self.normalize_one(raw))
            .filter(|url| seen.insert(url.clone()))
            .collect()
    }

    /// Normalizes raw URLs into candidates tagged with their query and source
    pub fn candidates(&self, raw_urls: &[String], query: &str, source: &str) -> Vec<ImageCandidate> {
        let mut seen = HashSet::new();
        raw_urls
            .iter()
            .filter_map(|raw| {
                let canonical = self.normalize_one(raw)?;
                seen.insert(canonical.clone()).then(|| ImageCandidate {
                    raw_url: raw.clone(),
                    canonical_url: canonical,
                    query: query.to_string(),
                    source: source.to_string(),
                })
            })
            .collect()
    }

    /// Normalizes one URL, returning `None` for noise or unparseable input
    pub fn normalize_one(&self, raw: &str) -> Option<String> {
        let mut url = match canonicalize_url(raw) {
            Ok(url) => url,
            Err(e) => {
                tracing::trace!("Dropping candidate {}: {}", raw, e);
                return None;
            }
        };

        let mut resolved = false;
        for _ in 0..=MAX_WRAPPER_DEPTH {
            let Some(target) = self.wrapped_target(&url) else {
                resolved = true;
                break;
            };
            match canonicalize_url(&target) {
                Ok(inner) => url = inner,
                Err(e) => {
                    tracing::trace!("Ignoring wrapped target {}: {}", target, e);
                    resolved = true;
                    break;
                }
            }
        }

        if !resolved {
            tracing::trace!("Dropping {}: wrapped more than {} deep", raw, MAX_WRAPPER_DEPTH);
            return None;
        }

        let url = url.to_string();
        if self.is_noise(&url) {
            tracing::trace!("Filtered noise URL {}", url);
            return None;
        }

        Some(url)
    }

    /// Returns true when the URL matches a noise substring
    pub fn is_noise(&self, url: &str) -> bool {
        self.noise.iter().any(|n| url.contains(n.as_str()))
    }

    /// Returns the decoded value of the first wrapper parameter carrying a URL
    fn wrapped_target(&self, url: &Url) -> Option<String> {
        url.query_pairs()
            .find(|(key, value)| {
                self.wrapper_params.contains(&key.to_lowercase()) && value.starts_with("http")
            })
            .map(|(_, value)| unescape_url(&value))
    }
}
