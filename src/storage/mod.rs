//! Storage module for the image catalog
//!
//! This module handles all persistence for the trawler, including:
//! - SQLite database initialization and schema management
//! - At-most-one record per canonical URL
//! - Download status transitions
//! - Writing image bytes under the blob root

mod blob;
mod schema;
mod sqlite;
mod traits;

pub use blob::{generate_filename, BlobStore, BlobWriter};
pub use sqlite::SqliteStorage;
pub use traits::{ImageStore, StorageError, StorageResult};

use crate::state::DownloadStatus;
use crate::TrawlError;
use chrono::{DateTime, Utc};

use std::path::Path;

/// Initializes or opens the image catalog
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(TrawlError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, TrawlError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    SqliteStorage::new(path)
}

/// A catalogued image resource
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub id: String,
    /// Canonical URL, unique across the catalog
    pub url: String,
    pub filename: String,
    pub file_path: String,
    pub format: String,
    pub source: String,
    pub search_query: String,
    pub tags: Vec<String>,
    pub is_downloaded: bool,
    pub status: DownloadStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data for a record about to be created in `pending` state
#[derive(Debug, Clone)]
pub struct NewImage {
    pub url: String,
    pub filename: String,
    pub file_path: String,
    pub format: String,
    pub source: String,
    pub search_query: String,
    pub tags: Vec<String>,
}

/// Result of an upsert-by-URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Identifier of the record owning the URL
    pub id: String,
    /// False when another writer got there first
    pub created: bool,
}
