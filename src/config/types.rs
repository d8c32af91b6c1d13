use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for Image Trawler
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Cookies sent with every request
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    pub storage: StorageConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Looks up a source by name
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Minimum time between two page requests to the same source (milliseconds)
    #[serde(default = "default_rate_limit_interval")]
    pub rate_limit_interval_ms: u64,

    /// Total attempts per request, first try included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base of the exponential backoff (milliseconds)
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound of the random jitter added to each backoff (milliseconds)
    #[serde(default = "default_max_jitter")]
    pub max_jitter_ms: u64,

    /// Polite delay between candidates, lower bound (milliseconds)
    #[serde(default = "default_candidate_delay")]
    pub candidate_delay_min_ms: u64,

    /// Polite delay between candidates, upper bound (milliseconds)
    #[serde(default = "default_candidate_delay")]
    pub candidate_delay_max_ms: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Candidate cap used when a crawl request does not name one
    #[serde(default = "default_max_links")]
    pub default_max_links: usize,

    /// Total attempts per image download; falls back to `max_attempts`
    #[serde(default)]
    pub download_max_attempts: Option<u32>,

    /// Re-download records left pending by an interrupted run
    #[serde(default = "default_true")]
    pub resume_pending: bool,

    /// Age after which a `downloading` record counts as abandoned (seconds)
    #[serde(default = "default_stale_download")]
    pub stale_download_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            rate_limit_interval_ms: default_rate_limit_interval(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            max_jitter_ms: default_max_jitter(),
            candidate_delay_min_ms: default_candidate_delay(),
            candidate_delay_max_ms: default_candidate_delay(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            default_max_links: default_max_links(),
            download_max_attempts: None,
            resume_pending: true,
            stale_download_secs: default_stale_download(),
        }
    }
}

/// Identity pool used to rotate request fingerprints
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IdentityConfig {
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,

    /// Attach random X-Forwarded-For / X-Real-IP headers when rotating
    #[serde(default)]
    pub spoof_forwarded_for: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_agents: default_user_agents(),
            spoof_forwarded_for: false,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Path to the SQLite catalog
    pub database_path: String,

    /// Root directory for downloaded images
    pub blob_root: String,

    /// Extension used when an image type has no known mapping
    #[serde(default = "default_extension")]
    pub default_extension: String,
}

/// URL extraction and normalization settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExtractionConfig {
    #[serde(default = "default_patterns")]
    pub patterns: Vec<PatternConfig>,

    /// Query parameters that carry the real target inside a redirector URL
    #[serde(default = "default_wrapper_params")]
    pub wrapper_params: Vec<String>,

    /// Substrings that mark a URL as noise
    #[serde(default = "default_noise")]
    pub noise: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            patterns: default_patterns(),
            wrapper_params: default_wrapper_params(),
            noise: default_noise(),
        }
    }
}

/// One extraction pattern
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PatternConfig {
    /// Scan for a literal prefix and take everything up to a delimiter
    Prefix { prefix: String },
    /// Regular expression; every capture group starting with `http` is kept
    Capture { regex: String },
    /// CSS selector plus the attribute holding the URL
    Selector { selector: String, attribute: String },
}

/// HTTP method for source requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// A page or API endpoint that produces image candidates
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    /// Source identifier stored on every record
    pub name: String,

    /// Base URL of the search page or API
    pub url: String,

    #[serde(default)]
    pub method: HttpMethod,

    /// Query parameter receiving the search query
    pub query_param: Option<String>,

    /// Query parameter receiving the page/offset cursor
    pub cursor_param: Option<String>,

    /// Cursor increment between units; defaults to the candidate cap
    pub cursor_step: Option<u64>,

    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Form body for POST sources
    #[serde(default)]
    pub form: BTreeMap<String, String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    /// Header that carries a credential read from `credential_env`
    pub credential_header: Option<String>,

    /// Environment variable holding the credential
    pub credential_env: Option<String>,
}

fn default_rate_limit_interval() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_max_jitter() -> u64 {
    1000
}

fn default_candidate_delay() -> u64 {
    250
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_links() -> usize {
    50
}

fn default_stale_download() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_extension() -> String {
    "jpg".to_string()
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/120.0.0.0",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub(crate) fn default_patterns() -> Vec<PatternConfig> {
    vec![
        PatternConfig::Capture {
            regex: r#""murl":"(http[^"]+)""#.to_string(),
        },
        PatternConfig::Capture {
            regex: r#""imageUrl":"(http[^"]+)""#.to_string(),
        },
        PatternConfig::Prefix {
            prefix: "https://".to_string(),
        },
    ]
}

pub(crate) fn default_wrapper_params() -> Vec<String> {
    ["mediaurl", "imgurl", "murl", "imageurl"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn default_noise() -> Vec<String> {
    [
        "/images/search",
        "/search?",
        "/th?id=",
        "/rp/",
        "/fd/ls/",
        "/hp/",
        "/ck/a",
        "/aclick",
        "/favicon",
        "/policies/",
        "/logo",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
