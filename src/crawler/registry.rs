//! Run registry - job control for concurrent crawl runs
//!
//! Each run is a spawned task with its own counters, cursor and cancellation
//! token, addressed by a run id. Failures end up in the run's status, never
//! in a panic of the host process.

use crate::config::Config;
use crate::crawler::coordinator::{Coordinator, CrawlUnit, UnitOutcome};
use crate::crawler::fetcher::Fetcher;
use crate::crawler::rate_limit::RateLimiter;
use crate::crawler::stats::{CrawlStats, StatsSnapshot};
use crate::storage::ImageStore;
use crate::{ConfigError, TrawlError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Parameters of a crawl run
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    /// Configured source name
    pub source: String,
    pub query: String,
    /// Candidates per unit; the configured default when `None`
    pub max_links: Option<usize>,
    pub cursor_start: u64,
    /// Number of units; the cursor advances by the source's step each time
    pub loop_count: u32,
}

impl CrawlRequest {
    pub fn new(source: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            query: query.into(),
            max_links: None,
            cursor_start: 0,
            loop_count: 1,
        }
    }
}

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    /// A source page could not be fetched
    FailedToFetch,
    /// Stopped on request
    Stopped,
    /// Aborted by a storage or internal error
    Failed,
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Status of a run as seen by the job-control layer
#[derive(Debug, Clone, Serialize)]
pub struct RunStatusReport {
    pub run_id: String,
    pub source: String,
    pub query: String,
    pub is_running: bool,
    pub state: RunState,
    pub counters: StatsSnapshot,
    pub last_error: Option<String>,
    pub cursor: u64,
    pub units_completed: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct RunProgress {
    state: RunState,
    last_error: Option<String>,
    cursor: u64,
    units_completed: u32,
    finished_at: Option<DateTime<Utc>>,
}

impl RunProgress {
    fn finish(&mut self, state: RunState, error: Option<String>) {
        self.state = state;
        if error.is_some() {
            self.last_error = error;
        }
        self.finished_at = Some(Utc::now());
    }
}

struct RunEntry {
    source: String,
    query: String,
    started_at: DateTime<Utc>,
    stats: Arc<CrawlStats>,
    progress: Arc<Mutex<RunProgress>>,
    cancel: CancellationToken,
    /// Flips to true once the run's task has finished
    finished: watch::Receiver<bool>,
}

impl RunEntry {
    fn report(&self, run_id: &str) -> RunStatusReport {
        let progress = lock(&self.progress);
        RunStatusReport {
            run_id: run_id.to_string(),
            source: self.source.clone(),
            query: self.query.clone(),
            is_running: progress.state.is_running(),
            state: progress.state,
            counters: self.stats.snapshot(),
            last_error: progress.last_error.clone(),
            cursor: progress.cursor,
            units_completed: progress.units_completed,
            started_at: self.started_at,
            finished_at: progress.finished_at,
        }
    }
}

/// Registry of crawl runs keyed by run id
pub struct RunRegistry<S: ImageStore> {
    config: Arc<Config>,
    storage: Arc<Mutex<S>>,
    fetcher: Arc<Fetcher>,
    runs: Mutex<HashMap<String, Arc<RunEntry>>>,
}

impl<S: ImageStore + Send + 'static> RunRegistry<S> {
    /// Creates a registry with its own fetcher and rate limiter
    pub fn new(config: Config, storage: S) -> Result<Self, TrawlError> {
        let limiter = Arc::new(RateLimiter::new());
        let fetcher = Fetcher::new(&config, limiter)?;
        Ok(Self::from_parts(
            Arc::new(config),
            Arc::new(Mutex::new(storage)),
            Arc::new(fetcher),
        ))
    }

    pub fn from_parts(config: Arc<Config>, storage: Arc<Mutex<S>>, fetcher: Arc<Fetcher>) -> Self {
        Self {
            config,
            storage,
            fetcher,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a run in the background and returns its id
    ///
    /// Unknown sources, zero limits and missing credentials are rejected here,
    /// before any request is sent.
    pub fn start_crawl(&self, request: CrawlRequest) -> Result<String, TrawlError> {
        let source = self
            .config
            .source(&request.source)
            .cloned()
            .ok_or_else(|| TrawlError::UnknownSource(request.source.clone()))?;

        let max_links = request
            .max_links
            .unwrap_or(self.config.crawler.default_max_links);
        if max_links == 0 {
            return Err(ConfigError::Validation("max_links must be >= 1".to_string()).into());
        }
        if request.loop_count == 0 {
            return Err(ConfigError::Validation("loop_count must be >= 1".to_string()).into());
        }

        let step = source.cursor_step.unwrap_or(max_links as u64);
        let coordinator = Coordinator::new(
            Arc::clone(&self.config),
            source,
            Arc::clone(&self.storage),
            Arc::clone(&self.fetcher),
        )?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let stats = Arc::new(CrawlStats::new());
        let progress = Arc::new(Mutex::new(RunProgress {
            state: RunState::Running,
            last_error: None,
            cursor: request.cursor_start,
            units_completed: 0,
            finished_at: None,
        }));
        let cancel = CancellationToken::new();

        let plan = RunPlan {
            query: request.query.clone(),
            max_links,
            cursor_start: request.cursor_start,
            step,
            loop_count: request.loop_count,
            resume_pending: self.config.crawler.resume_pending,
        };

        tracing::info!(
            "Starting run {} for {} '{}' ({} units of {} links)",
            run_id,
            request.source,
            request.query,
            request.loop_count,
            max_links
        );

        let (done, finished) = watch::channel(false);
        tokio::spawn({
            let run_id = run_id.clone();
            let stats = Arc::clone(&stats);
            let progress = Arc::clone(&progress);
            let cancel = cancel.clone();
            async move {
                drive(run_id, coordinator, plan, stats, progress, cancel).await;
                // Nobody listening is fine
                let _ = done.send(true);
            }
        });

        let entry = Arc::new(RunEntry {
            source: request.source,
            query: request.query,
            started_at: Utc::now(),
            stats,
            progress,
            cancel,
            finished,
        });
        lock(&self.runs).insert(run_id.clone(), entry);

        Ok(run_id)
    }

    /// Gets the status of a run
    pub fn status(&self, run_id: &str) -> Option<RunStatusReport> {
        self.entry(run_id).map(|entry| entry.report(run_id))
    }

    /// Gets the status of every known run
    pub fn list(&self) -> Vec<RunStatusReport> {
        lock(&self.runs)
            .iter()
            .map(|(id, entry)| entry.report(id))
            .collect()
    }

    /// Requests a run to stop
    ///
    /// The run finishes its current candidate, then stops. Stopping a finished
    /// run is a no-op.
    pub fn stop(&self, run_id: &str) -> Result<(), TrawlError> {
        let entry = self
            .entry(run_id)
            .ok_or_else(|| TrawlError::RunNotFound(run_id.to_string()))?;
        tracing::info!("Stop requested for run {}", run_id);
        entry.cancel.cancel();
        Ok(())
    }

    /// Requests every running run to stop
    pub fn stop_all(&self) {
        for entry in lock(&self.runs).values() {
            entry.cancel.cancel();
        }
    }

    /// Waits for a run to finish and returns its final status
    ///
    /// Safe to cancel and call again.
    pub async fn wait(&self, run_id: &str) -> Result<RunStatusReport, TrawlError> {
        let entry = self
            .entry(run_id)
            .ok_or_else(|| TrawlError::RunNotFound(run_id.to_string()))?;

        let mut finished = entry.finished.clone();
        loop {
            if *finished.borrow_and_update() {
                break;
            }
            if finished.changed().await.is_err() {
                // The task went away without reporting: it panicked
                let mut progress = lock(&entry.progress);
                if progress.state.is_running() {
                    tracing::error!("Run {} task aborted", run_id);
                    progress.finish(RunState::Failed, Some("run task aborted".to_string()));
                }
                break;
            }
        }

        Ok(entry.report(run_id))
    }

    fn entry(&self, run_id: &str) -> Option<Arc<RunEntry>> {
        lock(&self.runs).get(run_id).cloned()
    }
}

/// Units a run will execute
struct RunPlan {
    query: String,
    max_links: usize,
    cursor_start: u64,
    step: u64,
    loop_count: u32,
    resume_pending: bool,
}

/// Body of a spawned run
async fn drive<S: ImageStore>(
    run_id: String,
    coordinator: Coordinator<S>,
    plan: RunPlan,
    stats: Arc<CrawlStats>,
    progress: Arc<Mutex<RunProgress>>,
    cancel: CancellationToken,
) {
    if plan.resume_pending {
        if let Err(e) = coordinator.resume_abandoned(&stats, &cancel).await {
            tracing::error!("Run {} failed while resuming: {}", run_id, e);
            lock(&progress).finish(RunState::Failed, Some(e.to_string()));
            return;
        }
    }

    for i in 0..u64::from(plan.loop_count) {
        let cursor = plan.cursor_start.saturating_add(i.saturating_mul(plan.step));
        lock(&progress).cursor = cursor;

        let unit = CrawlUnit {
            query: plan.query.clone(),
            cursor,
            max_links: plan.max_links,
        };

        match coordinator.run_unit(&unit, &stats, &cancel).await {
            Ok(UnitOutcome::Completed { .. }) => {
                lock(&progress).units_completed += 1;
            }
            Ok(UnitOutcome::FailedToFetch { reason }) => {
                lock(&progress).finish(RunState::FailedToFetch, Some(reason));
                return;
            }
            Ok(UnitOutcome::Cancelled) => {
                tracing::info!("Run {} stopped at cursor {}", run_id, cursor);
                lock(&progress).finish(RunState::Stopped, None);
                return;
            }
            Err(e) => {
                tracing::error!("Run {} failed: {}", run_id, e);
                lock(&progress).finish(RunState::Failed, Some(e.to_string()));
                return;
            }
        }
    }

    let state = if cancel.is_cancelled() {
        RunState::Stopped
    } else {
        RunState::Completed
    };
    tracing::info!("Run {} finished: {:?} {:?}", run_id, state, stats.snapshot());
    lock(&progress).finish(state, None);
}

/// Locks a mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
