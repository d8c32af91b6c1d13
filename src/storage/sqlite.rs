//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the ImageStore trait.

use crate::state::DownloadStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ImageStore, StorageError, StorageResult};
use crate::storage::{ImageRecord, NewImage, UpsertOutcome};
use crate::TrawlError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// How long a writer waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const RECORD_COLUMNS: &str = "id, url, filename, file_path, format, source, search_query, tags,
     is_downloaded, download_status, error_message, created_at, updated_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// Several instances may point at the same file; uniqueness is enforced
    /// by the database, not by the process.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(TrawlError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, TrawlError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, TrawlError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn query_one(&self, column: &str, value: &str) -> StorageResult<Option<ImageRecord>> {
        let sql = format!(
            "SELECT {} FROM image_resources WHERE {} = ?1",
            RECORD_COLUMNS, column
        );
        let raw = self
            .conn
            .query_row(&sql, params![value], RawRecord::from_row)
            .optional()?;

        raw.map(RawRecord::into_record).transpose()
    }
}

/// Column values as stored, before decoding
struct RawRecord {
    id: String,
    url: String,
    filename: String,
    file_path: String,
    format: String,
    source: String,
    search_query: String,
    tags: String,
    is_downloaded: bool,
    status: String,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            filename: row.get(2)?,
            file_path: row.get(3)?,
            format: row.get(4)?,
            source: row.get(5)?,
            search_query: row.get(6)?,
            tags: row.get(7)?,
            is_downloaded: row.get(8)?,
            status: row.get(9)?,
            error_message: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_record(self) -> StorageResult<ImageRecord> {
        let status = DownloadStatus::from_db_string(&self.status).ok_or_else(|| {
            StorageError::Database(format!(
                "Unknown download status '{}' on record {}",
                self.status, self.id
            ))
        })?;

        Ok(ImageRecord {
            tags: serde_json::from_str(&self.tags)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
            url: self.url,
            filename: self.filename,
            file_path: self.file_path,
            format: self.format,
            source: self.source,
            search_query: self.search_query,
            is_downloaded: self.is_downloaded,
            status,
            error_message: self.error_message,
        })
    }
}

fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Database(format!("Bad timestamp '{}': {}", value, e)))
}

impl ImageStore for SqliteStorage {
    // ===== Deduplication =====

    fn exists(&self, url: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM image_resources WHERE url = ?1",
                params![url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn find_by_url(&self, url: &str) -> StorageResult<Option<ImageRecord>> {
        self.query_one("url", url)
    }

    fn get(&self, id: &str) -> StorageResult<ImageRecord> {
        self.query_one("id", id)?
            .ok_or_else(|| StorageError::RecordNotFound(id.to_string()))
    }

    fn upsert_pending(&mut self, image: &NewImage) -> StorageResult<UpsertOutcome> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let tags = serde_json::to_string(&image.tags)?;

        // The UNIQUE(url) constraint decides the winner; losers insert nothing
        let inserted = self.conn.execute(
            "INSERT INTO image_resources
                (id, url, filename, file_path, format, source, search_query, tags,
                 is_downloaded, download_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?10)
             ON CONFLICT(url) DO NOTHING",
            params![
                id,
                image.url,
                image.filename,
                image.file_path,
                image.format,
                image.source,
                image.search_query,
                tags,
                DownloadStatus::Pending.to_db_string(),
                now,
            ],
        )?;

        let owner: String = self.conn.query_row(
            "SELECT id FROM image_resources WHERE url = ?1",
            params![image.url],
            |row| row.get(0),
        )?;

        Ok(UpsertOutcome {
            created: inserted == 1,
            id: owner,
        })
    }

    // ===== Status =====

    fn mark_status(
        &mut self,
        id: &str,
        status: DownloadStatus,
        error: Option<&str>,
    ) -> StorageResult<()> {
        let allowed_from: Vec<&str> = DownloadStatus::all_states()
            .into_iter()
            .filter(|from| from.can_transition_to(status))
            .map(|from| from.to_db_string())
            .collect();

        let now = Utc::now().to_rfc3339();
        let is_downloaded = status == DownloadStatus::Completed;
        let error_message = if status == DownloadStatus::Failed {
            error
        } else {
            None
        };

        // Check-and-set in one statement so racing writers cannot both win
        let updated = self.conn.execute(
            "UPDATE image_resources
             SET download_status = ?1,
                 is_downloaded = MAX(is_downloaded, ?2),
                 error_message = ?3,
                 updated_at = ?4
             WHERE id = ?5
               AND download_status IN (SELECT value FROM json_each(?6))",
            params![
                status.to_db_string(),
                is_downloaded,
                error_message,
                now,
                id,
                serde_json::to_string(&allowed_from)?,
            ],
        )?;

        if updated == 1 {
            return Ok(());
        }

        let current = self.get(id)?;
        Err(StorageError::InvalidTransition {
            id: id.to_string(),
            from: current.status,
            to: status,
        })
    }

    fn reclaim_stale(&mut self, id: &str, stale_before: DateTime<Utc>) -> StorageResult<bool> {
        let observed: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT download_status, updated_at FROM image_resources WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((status, updated_at)) = observed else {
            return Err(StorageError::RecordNotFound(id.to_string()));
        };
        if status != DownloadStatus::Downloading.to_db_string()
            || parse_timestamp(&updated_at)? >= stale_before
        {
            return Ok(false);
        }

        // Only the writer that still sees the observed timestamp wins
        let updated = self.conn.execute(
            "UPDATE image_resources
             SET updated_at = ?1
             WHERE id = ?2 AND download_status = ?3 AND updated_at = ?4",
            params![
                Utc::now().to_rfc3339(),
                id,
                DownloadStatus::Downloading.to_db_string(),
                updated_at,
            ],
        )?;

        Ok(updated == 1)
    }

    fn get_resumable(&self, source: &str) -> StorageResult<Vec<ImageRecord>> {
        let sql = format!(
            "SELECT {} FROM image_resources
             WHERE source = ?1 AND download_status IN (?2, ?3)
             ORDER BY created_at",
            RECORD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let raws = stmt
            .query_map(
                params![
                    source,
                    DownloadStatus::Pending.to_db_string(),
                    DownloadStatus::Downloading.to_db_string()
                ],
                RawRecord::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        raws.into_iter().map(RawRecord::into_record).collect()
    }

    // ===== Statistics =====

    fn count_total(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM image_resources", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_by_status(&self, status: DownloadStatus) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM image_resources WHERE download_status = ?1",
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_by_source(&self) -> StorageResult<HashMap<String, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT source, COUNT(*) FROM image_resources GROUP BY source")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (source, count) = row?;
            counts.insert(source, count as u64);
        }

        Ok(counts)
    }

    fn count_downloaded(&self) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM image_resources WHERE is_downloaded = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn recent_failures(&self, limit: usize) -> StorageResult<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, COALESCE(error_message, '') FROM image_resources
             WHERE download_status = ?1
             ORDER BY updated_at DESC
             LIMIT ?2",
        )?;

        let failures = stmt
            .query_map(
                params![DownloadStatus::Failed.to_db_string(), limit as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(failures)
    }
}
