use std::time::{Duration, Instant};

/// Tracks request timing for one logical source
///
/// A source is a search page or API, identified by its configured name.
/// Unrelated sources never share a `SourceState`.
#[derive(Debug, Clone, Default)]
pub struct SourceState {
    /// Number of requests made to this source
    pub request_count: u64,

    /// When the most recent request was (or will be) sent
    pub last_request_time: Option<Instant>,
}

impl SourceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a request was made at `at`
    pub fn record_request(&mut self, at: Instant) {
        self.request_count += 1;
        self.last_request_time = Some(at);
    }

    /// Calculates the time until the next request may be sent
    ///
    /// Returns None if a request can be made now, or the remaining wait otherwise.
    pub fn time_until_next_request(&self, interval: Duration, now: Instant) -> Option<Duration> {
        let last = self.last_request_time?;
        let ready_at = last + interval;
        if ready_at > now {
            Some(ready_at - now)
        } else {
            None
        }
    }
}
