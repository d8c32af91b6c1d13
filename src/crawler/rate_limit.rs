//! Per-source rate limiting
//!
//! Requests to the same logical source are spaced at least one interval
//! apart. Each source has its own [`SourceState`]; unrelated sources never
//! wait on each other.

use crate::state::SourceState;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Minimum-interval limiter keyed by source name
#[derive(Debug, Default)]
pub struct RateLimiter {
    sources: Mutex<HashMap<String, SourceState>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until a request to `source` may be sent, then claims the slot
    ///
    /// The slot is reserved before sleeping, so concurrent callers for the
    /// same source queue up one interval apart instead of firing together.
    pub async fn acquire(&self, source: &str, interval: Duration) {
        let wait = {
            let mut sources = self.sources.lock().await;
            let state = sources.entry(source.to_string()).or_default();
            let now = Instant::now();
            let wait = state
                .time_until_next_request(interval, now)
                .unwrap_or(Duration::ZERO);
            state.record_request(now + wait);
            wait
        };

        if !wait.is_zero() {
            tracing::debug!("Rate limiting {}: waiting {:?}", source, wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of requests issued to `source` so far
    pub async fn request_count(&self, source: &str) -> u64 {
        self.sources
            .lock()
            .await
            .get(source)
            .map_or(0, |s| s.request_count)
    }
}
