//! Storage traits and error types
//!
//! This module defines the trait interface for catalog backends and
//! associated error types.

use crate::state::DownloadStatus;
use crate::storage::{ImageRecord, NewImage, UpsertOutcome};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid status transition for {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: String,
        from: DownloadStatus,
        to: DownloadStatus,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for image catalog implementations
///
/// The catalog is the only authority on whether a URL has been seen. Every
/// implementation must enforce uniqueness of the canonical URL itself, not
/// rely on callers checking `exists` first.
pub trait ImageStore {
    // ===== Deduplication =====

    /// Returns true if a record with this canonical URL exists
    fn exists(&self, url: &str) -> StorageResult<bool>;

    /// Gets a record by canonical URL
    fn find_by_url(&self, url: &str) -> StorageResult<Option<ImageRecord>>;

    /// Gets a record by identifier
    fn get(&self, id: &str) -> StorageResult<ImageRecord>;

    /// Creates a `pending` record for the URL, or returns the existing one
    ///
    /// Concurrent calls for the same URL yield exactly one record; the losers
    /// receive the winner's identifier with `created == false`.
    fn upsert_pending(&mut self, image: &NewImage) -> StorageResult<UpsertOutcome>;

    // ===== Status =====

    /// Moves a record to a new download status
    ///
    /// Rejects any transition not allowed by
    /// [`DownloadStatus::can_transition_to`]. `Completed` sets the downloaded
    /// flag; `Failed` stores `error`.
    fn mark_status(
        &mut self,
        id: &str,
        status: DownloadStatus,
        error: Option<&str>,
    ) -> StorageResult<()>;

    /// Takes over a `downloading` record untouched since `stale_before`
    ///
    /// Compare-and-set on the record's `updated_at`: among callers racing
    /// for the same abandoned record exactly one gets `true`, and a record a
    /// live run touched recently is never taken.
    fn reclaim_stale(&mut self, id: &str, stale_before: DateTime<Utc>) -> StorageResult<bool>;

    /// Gets records a previous run left unfinished
    fn get_resumable(&self, source: &str) -> StorageResult<Vec<ImageRecord>>;

    // ===== Statistics =====

    /// Gets total record count
    fn count_total(&self) -> StorageResult<u64>;

    /// Counts records in a status
    fn count_by_status(&self, status: DownloadStatus) -> StorageResult<u64>;

    /// Counts records per source
    fn count_by_source(&self) -> StorageResult<HashMap<String, u64>>;

    /// Counts records with bytes on disk
    fn count_downloaded(&self) -> StorageResult<u64>;

    /// Gets the most recent failures as (url, error) pairs
    fn recent_failures(&self, limit: usize) -> StorageResult<Vec<(String, String)>>;
}
