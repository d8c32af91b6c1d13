//! Crawler module for image discovery and download
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with rate limiting, retries and identity rotation
//! - Content-type probing of candidate URLs
//! - Per-unit orchestration and run counters
//! - Job control for concurrent runs

mod coordinator;
mod fetcher;
mod identity;
mod rate_limit;
mod registry;
mod retry;
mod stats;
mod verifier;

pub use coordinator::{Coordinator, CrawlUnit, UnitOutcome};
pub use fetcher::{build_http_client, FetchError, FetchRequest, Fetched, Fetcher};
pub use identity::{Identity, IdentityPool, RotatingIdentityPool};
pub use rate_limit::RateLimiter;
pub use registry::{CrawlRequest, RunRegistry, RunState, RunStatusReport};
pub use retry::{
    classify_status, AttemptOutcome, RetryDecision, RetryPolicy, RetryReason,
};
pub use stats::{CrawlStats, StatsSnapshot};
pub use verifier::{infer_extension, is_image, ContentVerifier, VerifyError};
