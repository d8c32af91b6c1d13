//! Crawler coordinator - per-unit crawl orchestration
//!
//! One unit is one page of one source at one cursor:
//! - Fetch the page through the rate-limited fetcher
//! - Extract and normalize candidate URLs, capped at the unit's limit
//! - For each candidate: dedup check, content check, record, download,
//!   status update
//! - Polite delay between candidates, cut short by cancellation

use crate::config::{resolve_credential, validate_source, Config, HttpMethod, SourceConfig};
use crate::crawler::fetcher::{FetchRequest, Fetcher};
use crate::crawler::retry::RetryPolicy;
use crate::crawler::stats::CrawlStats;
use crate::crawler::verifier::ContentVerifier;
use crate::state::DownloadStatus;
use crate::storage::{
    generate_filename, BlobStore, ImageRecord, ImageStore, NewImage, StorageError, StorageResult,
};
use crate::url::{pipeline, Extractor, ImageCandidate, Normalizer};
use crate::TrawlError;
use chrono::Utc;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One page/offset of one query against one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlUnit {
    pub query: String,
    pub cursor: u64,
    /// Candidates processed at most
    pub max_links: usize,
}

/// How a unit ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Completed {
        candidates: usize,
        saved: usize,
        downloaded: usize,
    },
    /// The source page itself could not be fetched
    FailedToFetch { reason: String },
    Cancelled,
}

/// What happened to a single candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateOutcome {
    Skipped,
    Saved { downloaded: bool },
    Resumed { downloaded: bool },
}

/// Main crawler coordinator structure
///
/// Stateless across units; counters live in the [`CrawlStats`] the caller
/// passes in.
pub struct Coordinator<S: ImageStore> {
    config: Arc<Config>,
    source: SourceConfig,
    credential: Option<(String, String)>,
    storage: Arc<Mutex<S>>,
    fetcher: Arc<Fetcher>,
    /// Image downloads use their own attempt budget when configured
    download_policy: Option<RetryPolicy>,
    verifier: ContentVerifier,
    extractor: Extractor,
    normalizer: Normalizer,
    blobs: BlobStore,
}

impl<S: ImageStore> Coordinator<S> {
    /// Creates a new coordinator for one source
    ///
    /// Fails before any network activity if the source is invalid or its
    /// credential is missing from the environment.
    ///
    /// # Arguments
    ///
    /// * `config` - The trawler configuration
    /// * `source` - The source to crawl
    /// * `storage` - Shared catalog
    /// * `fetcher` - Shared fetcher
    pub fn new(
        config: Arc<Config>,
        source: SourceConfig,
        storage: Arc<Mutex<S>>,
        fetcher: Arc<Fetcher>,
    ) -> Result<Self, TrawlError> {
        validate_source(&source)?;
        let credential = resolve_credential(&source)?;

        let (extractor, normalizer) = pipeline(&config.extraction);
        let verifier = ContentVerifier::new(
            Arc::clone(&fetcher),
            config.storage.default_extension.clone(),
        );
        let blobs = BlobStore::new(&config.storage.blob_root);
        let download_policy = config.crawler.download_max_attempts.map(|attempts| {
            RetryPolicy::new(
                attempts,
                Duration::from_millis(config.crawler.backoff_base_ms),
                Duration::from_millis(config.crawler.max_jitter_ms),
            )
        });

        Ok(Self {
            config,
            source,
            credential,
            storage,
            fetcher,
            download_policy,
            verifier,
            extractor,
            normalizer,
            blobs,
        })
    }

    pub fn source(&self) -> &SourceConfig {
        &self.source
    }

    /// Runs one unit end to end
    ///
    /// A page that cannot be fetched ends the unit with
    /// [`UnitOutcome::FailedToFetch`]. Candidate failures are counted and
    /// skipped. Storage failures are returned as errors.
    pub async fn run_unit(
        &self,
        unit: &CrawlUnit,
        stats: &CrawlStats,
        cancel: &CancellationToken,
    ) -> Result<UnitOutcome, TrawlError> {
        tracing::info!(
            "Crawling {} for '{}' at cursor {}",
            self.source.name,
            unit.query,
            unit.cursor
        );

        let request = self.page_request(unit);
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return Ok(UnitOutcome::Cancelled),
            result = self.fetcher.fetch_text(&request) => result,
        };

        let body = match fetched {
            Ok(fetched) => {
                stats.add_retries(u64::from(fetched.retries()));
                fetched.value
            }
            Err(e) => {
                stats.add_retries(u64::from(e.attempts().saturating_sub(1)));
                stats.inc_errors();
                tracing::error!("Failed to fetch {} page: {}", self.source.name, e);
                return Ok(UnitOutcome::FailedToFetch {
                    reason: e.to_string(),
                });
            }
        };

        let mut candidates = self.discover(&body, &unit.query, stats);
        candidates.truncate(unit.max_links);
        tracing::debug!(
            "{} candidates to process (cap {})",
            candidates.len(),
            unit.max_links
        );

        let mut saved = 0;
        let mut downloaded = 0;

        for (index, candidate) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!("Unit cancelled after {} candidates", index);
                return Ok(UnitOutcome::Cancelled);
            }

            match self.process_candidate(candidate, stats).await? {
                CandidateOutcome::Skipped => {}
                CandidateOutcome::Saved { downloaded: ok } => {
                    saved += 1;
                    downloaded += usize::from(ok);
                }
                CandidateOutcome::Resumed { downloaded: ok } => {
                    downloaded += usize::from(ok);
                }
            }

            if index + 1 < candidates.len() && !self.polite_delay(cancel).await {
                return Ok(UnitOutcome::Cancelled);
            }
        }

        tracing::info!(
            "Unit done for {} '{}': {} candidates, {} saved, {} downloaded",
            self.source.name,
            unit.query,
            candidates.len(),
            saved,
            downloaded
        );

        Ok(UnitOutcome::Completed {
            candidates: candidates.len(),
            saved,
            downloaded,
        })
    }

    /// Re-downloads records an interrupted run left unfinished
    ///
    /// Returns the number of records that reached `completed`.
    pub async fn resume_abandoned(
        &self,
        stats: &CrawlStats,
        cancel: &CancellationToken,
    ) -> Result<usize, TrawlError> {
        let records = self.with_storage(|s| s.get_resumable(&self.source.name))?;
        if records.is_empty() {
            return Ok(0);
        }

        tracing::info!(
            "Resuming {} unfinished downloads for {}",
            records.len(),
            self.source.name
        );

        let mut completed = 0;
        for record in records {
            if cancel.is_cancelled() {
                break;
            }
            if matches!(
                self.resume(&record, stats).await?,
                CandidateOutcome::Resumed { downloaded: true }
            ) {
                completed += 1;
            }
        }

        Ok(completed)
    }

    /// Builds the page request for a unit
    ///
    /// The query and cursor go into the query string for GET sources and into
    /// the form body for POST sources.
    pub fn page_request(&self, unit: &CrawlUnit) -> FetchRequest {
        let mut query: Vec<(String, String)> = self
            .source
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut form: Vec<(String, String)> = self
            .source
            .form
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let target = match self.source.method {
            HttpMethod::Get => &mut query,
            HttpMethod::Post => &mut form,
        };
        if let Some(param) = &self.source.query_param {
            target.push((param.clone(), unit.query.clone()));
        }
        if let Some(param) = &self.source.cursor_param {
            target.push((param.clone(), unit.cursor.to_string()));
        }

        let mut headers = self.source.headers.clone();
        if let Some((name, value)) = &self.credential {
            headers.insert(name.clone(), value.clone());
        }

        FetchRequest {
            url: self.source.url.clone(),
            method: self.source.method,
            query,
            form,
            headers,
            cookies: self.source.cookies.clone(),
            rate_key: Some(self.source.name.clone()),
            policy: None,
        }
    }

    /// Extracts and normalizes candidates from a page body
    fn discover(&self, body: &str, query: &str, stats: &CrawlStats) -> Vec<ImageCandidate> {
        let raw = self.extractor.extract(body);
        stats.add_found(raw.len() as u64);

        let candidates = self.normalizer.candidates(&raw, query, &self.source.name);
        stats.add_unique(candidates.len() as u64);

        tracing::debug!(
            "Extracted {} raw URLs, {} unique candidates",
            raw.len(),
            candidates.len()
        );
        candidates
    }

    /// Runs the per-candidate pipeline
    async fn process_candidate(
        &self,
        candidate: &ImageCandidate,
        stats: &CrawlStats,
    ) -> Result<CandidateOutcome, TrawlError> {
        let url = candidate.canonical_url.as_str();

        if let Some(record) = self.with_storage(|s| s.find_by_url(url))? {
            if self.config.crawler.resume_pending && record.status.is_resumable() {
                return self.resume(&record, stats).await;
            }
            tracing::debug!("Already catalogued: {}", url);
            return Ok(CandidateOutcome::Skipped);
        }

        let extension = match self.verifier.verify(url).await {
            Ok(Some(extension)) => extension,
            Ok(None) => return Ok(CandidateOutcome::Skipped),
            Err(e) => {
                stats.inc_errors();
                tracing::warn!("Could not verify {}: {}", url, e);
                return Ok(CandidateOutcome::Skipped);
            }
        };
        stats.inc_verified();

        let filename = generate_filename(&candidate.query, url, &extension);
        let path = self.blobs.path_in(&self.source.name, &filename);
        let tags = if candidate.query.trim().is_empty() {
            Vec::new()
        } else {
            vec![candidate.query.clone()]
        };

        let image = NewImage {
            url: url.to_string(),
            filename,
            file_path: path.to_string_lossy().into_owned(),
            format: extension,
            source: candidate.source.clone(),
            search_query: candidate.query.clone(),
            tags,
        };

        let outcome = self.with_storage(|s| s.upsert_pending(&image))?;
        if !outcome.created {
            // Another run recorded it between our check and insert
            tracing::debug!("Lost insert race for {}", url);
            return Ok(CandidateOutcome::Skipped);
        }
        stats.inc_saved();

        if !self.claim(&outcome.id)? {
            return Ok(CandidateOutcome::Saved { downloaded: false });
        }
        let downloaded = self.download(&outcome.id, url, &path, stats).await?;
        Ok(CandidateOutcome::Saved { downloaded })
    }

    /// Picks up a `pending` or `downloading` record left by an earlier run
    ///
    /// A `downloading` record is only taken over once its lease has gone
    /// stale; until then another run may still be fetching it.
    async fn resume(
        &self,
        record: &ImageRecord,
        stats: &CrawlStats,
    ) -> Result<CandidateOutcome, TrawlError> {
        let claimed = match record.status {
            DownloadStatus::Pending => self.claim(&record.id)?,
            DownloadStatus::Downloading => self.reclaim(&record.id)?,
            _ => false,
        };
        if !claimed {
            return Ok(CandidateOutcome::Skipped);
        }

        tracing::info!("Resuming download of {}", record.url);
        let path = PathBuf::from(&record.file_path);
        let downloaded = self.download(&record.id, &record.url, &path, stats).await?;
        Ok(CandidateOutcome::Resumed { downloaded })
    }

    /// Moves a record to `downloading`
    ///
    /// Returns false if another writer already moved it.
    fn claim(&self, id: &str) -> Result<bool, TrawlError> {
        self.transition(id, DownloadStatus::Downloading, None)
    }

    /// Takes over a `downloading` record whose lease has expired
    fn reclaim(&self, id: &str) -> Result<bool, TrawlError> {
        let window = chrono::Duration::seconds(self.config.crawler.stale_download_secs as i64);
        let stale_before = Utc::now() - window;

        let reclaimed = self.with_storage(|s| s.reclaim_stale(id, stale_before))?;
        if !reclaimed {
            tracing::debug!("Record {} is being downloaded by another run", id);
        }
        Ok(reclaimed)
    }

    /// Applies a status change; false if another writer got there first
    fn transition(
        &self,
        id: &str,
        status: DownloadStatus,
        error: Option<&str>,
    ) -> Result<bool, TrawlError> {
        match self.with_storage(|s| s.mark_status(id, status, error)) {
            Ok(()) => Ok(true),
            Err(TrawlError::Storage(StorageError::InvalidTransition { from, .. })) => {
                tracing::debug!("Record {} already {:?}, leaving it alone", id, from);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Downloads the image and records the final status
    ///
    /// Returns true when the bytes are on disk and the record is ours to
    /// complete. A record another writer already finished is left as it is.
    async fn download(
        &self,
        id: &str,
        url: &str,
        path: &Path,
        stats: &CrawlStats,
    ) -> Result<bool, TrawlError> {
        let mut request = FetchRequest::get(url);
        if let Some(policy) = &self.download_policy {
            request = request.with_policy(policy.clone());
        }

        match self.fetcher.download_to(&request, &self.blobs, path).await {
            Ok(fetched) => {
                stats.add_retries(u64::from(fetched.retries()));
                if !self.transition(id, DownloadStatus::Completed, None)? {
                    return Ok(false);
                }
                stats.inc_downloaded();
                tracing::debug!("Saved {} ({} bytes)", path.display(), fetched.value);
                Ok(true)
            }
            Err(e) => {
                stats.add_retries(u64::from(e.attempts().saturating_sub(1)));
                stats.inc_errors();
                tracing::warn!("Download failed for {}: {}", url, e);
                let message = e.to_string();
                self.transition(id, DownloadStatus::Failed, Some(&message))?;
                Ok(false)
            }
        }
    }

    /// Sleeps a random polite delay; returns false if cancelled meanwhile
    async fn polite_delay(&self, cancel: &CancellationToken) -> bool {
        let min = self.config.crawler.candidate_delay_min_ms;
        let max = self.config.crawler.candidate_delay_max_ms.max(min);
        if max == 0 {
            return !cancel.is_cancelled();
        }

        let delay = Duration::from_millis(rand::thread_rng().gen_range(min..=max));
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn with_storage<T>(
        &self,
        f: impl FnOnce(&mut S) -> StorageResult<T>,
    ) -> Result<T, TrawlError> {
        let mut storage = self
            .storage
            .lock()
            .map_err(|_| StorageError::Database("storage lock poisoned".to_string()))?;
        Ok(f(&mut *storage)?)
    }
}
