//! Per-run crawl counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters for one run
///
/// Shared between the running task and status readers; every counter only
/// ever increases.
#[derive(Debug, Default)]
pub struct CrawlStats {
    found: AtomicU64,
    unique: AtomicU64,
    verified: AtomicU64,
    saved: AtomicU64,
    downloaded: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time copy of [`CrawlStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Raw URLs extracted from fetched content
    pub found: u64,
    /// Candidates left after normalization and deduplication
    pub unique: u64,
    /// Candidates confirmed to be images
    pub verified: u64,
    /// Records created in the catalog
    pub saved: u64,
    /// Images written to blob storage
    pub downloaded: u64,
    pub errors: u64,
    pub retries: u64,
}

impl CrawlStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_found(&self, n: u64) {
        self.found.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_unique(&self, n: u64) {
        self.unique.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_verified(&self) {
        self.verified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_saved(&self) {
        self.saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_downloaded(&self) {
        self.downloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_retries(&self, n: u64) {
        self.retries.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            found: self.found.load(Ordering::Relaxed),
            unique: self.unique.load(Ordering::Relaxed),
            verified: self.verified.load(Ordering::Relaxed),
            saved: self.saved.load(Ordering::Relaxed),
            downloaded: self.downloaded.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}
