//! Job ledger. Tracks dispatched units of work with future-based waiting.
//!
//! Jobs are created `running` and transition exactly once to a terminal
//! status. Waiters subscribe to a per-job watch channel and are woken on that
//! transition.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, watch};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::error::LedgerError;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// The worker call exceeded its deadline. Distinct from `Failed` so
    /// callers can apply a different retry policy.
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// One dispatched unit of work.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    /// Unique job ID.
    pub id: Uuid,
    /// Worker the job was dispatched to.
    pub worker_id: String,
    /// Input message sent to the worker.
    pub message: String,
    /// Session that started the job.
    pub owner: Option<String>,
    /// Current status. Changes at most once after creation.
    pub status: JobStatus,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Time from creation to the terminal status.
    pub duration_ms: Option<u64>,
    /// Worker response, set on success.
    pub result: Option<String>,
    /// Failure, cancellation or timeout message.
    pub error: Option<String>,
    /// Free-form metadata, mergeable after completion.
    pub report: serde_json::Value,
}

impl Job {
    fn new(worker_id: String, message: String, owner: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            worker_id,
            message,
            owner,
            status: JobStatus::Running,
            created_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            result: None,
            error: None,
            report: serde_json::Value::Null,
        }
    }
}

/// Filter for `JobLedger::list`.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub owner: Option<String>,
    pub worker_id: Option<String>,
    pub status: Option<JobStatus>,
}

impl JobFilter {
    fn matches(&self, job: &Job) -> bool {
        self.owner
            .as_ref()
            .is_none_or(|owner| job.owner.as_ref() == Some(owner))
            && self.worker_id.as_ref().is_none_or(|w| &job.worker_id == w)
            && self.status.is_none_or(|s| job.status == s)
    }
}

/// Job counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timeout: usize,
}

struct LedgerEntry {
    job: Job,
    notify: watch::Sender<JobStatus>,
}

impl LedgerEntry {
    fn has_waiters(&self) -> bool {
        self.notify.receiver_count() > 0
    }
}

/// In-memory job ledger.
pub struct JobLedger {
    config: LedgerConfig,
    jobs: RwLock<HashMap<Uuid, LedgerEntry>>,
}

impl JobLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Create a `running` job and return it immediately.
    pub async fn create(
        &self,
        worker_id: impl Into<String>,
        message: impl Into<String>,
        owner: Option<String>,
    ) -> Job {
        self.prune().await;

        let job = Job::new(worker_id.into(), message.into(), owner);
        let (notify, _rx) = watch::channel(JobStatus::Running);
        self.jobs.write().await.insert(
            job.id,
            LedgerEntry {
                job: job.clone(),
                notify,
            },
        );
        debug!(job_id = %job.id, worker_id = %job.worker_id, "Job created");
        job
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).map(|e| e.job.clone())
    }

    /// Jobs matching a filter, oldest first.
    pub async fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|e| filter.matches(&e.job))
            .map(|e| e.job.clone())
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub async fn stats(&self) -> LedgerStats {
        let mut stats = LedgerStats::default();
        for entry in self.jobs.read().await.values() {
            match entry.job.status {
                JobStatus::Running => stats.running += 1,
                JobStatus::Succeeded => stats.succeeded += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
                JobStatus::Timeout => stats.timeout += 1,
            }
        }
        stats
    }

    /// Record a successful result. No-op unless the job is running.
    pub async fn set_result(&self, id: Uuid, result: impl Into<String>) -> bool {
        self.finish(id, JobStatus::Succeeded, Some(result.into()), None)
            .await
    }

    /// Record a failure. No-op unless the job is running.
    pub async fn set_error(&self, id: Uuid, error: impl Into<String>) -> bool {
        self.finish(id, JobStatus::Failed, None, Some(error.into()))
            .await
    }

    /// Record a deadline overrun. No-op unless the job is running.
    pub async fn mark_timeout(&self, id: Uuid, message: impl Into<String>) -> bool {
        self.finish(id, JobStatus::Timeout, None, Some(message.into()))
            .await
    }

    /// Mark cancelled. No-op unless the job is running. Does not stop the
    /// underlying work.
    pub async fn cancel(&self, id: Uuid, reason: Option<String>) -> bool {
        let reason = reason.unwrap_or_else(|| "cancelled".to_string());
        self.finish(id, JobStatus::Cancelled, None, Some(reason))
            .await
    }

    async fn finish(
        &self,
        id: Uuid,
        status: JobStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(&id) else {
            return false;
        };
        if entry.job.status != JobStatus::Running {
            debug!(job_id = %id, status = %entry.job.status, "Ignoring update to finished job");
            return false;
        }

        let now = Utc::now();
        let job = &mut entry.job;
        job.status = status;
        job.result = result;
        job.error = error;
        job.finished_at = Some(now);
        job.duration_ms = Some(
            now.signed_duration_since(job.created_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        entry.notify.send_replace(status);

        info!(job_id = %id, %status, "Job finished");
        true
    }

    /// Merge metadata into a job's report. Allowed after completion.
    pub async fn attach_report(&self, id: Uuid, report: serde_json::Value) -> Result<(), LedgerError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(LedgerError::NotFound { id })?;
        merge_report(&mut entry.job.report, report);
        Ok(())
    }

    /// Wait for a job to reach a terminal status.
    ///
    /// Returns immediately if it already has. On timeout only this waiter
    /// fails; the job keeps running.
    pub async fn wait(&self, id: Uuid, timeout: Duration) -> Result<Job, LedgerError> {
        let mut rx = {
            let jobs = self.jobs.read().await;
            let entry = jobs.get(&id).ok_or(LedgerError::NotFound { id })?;
            if entry.job.status.is_terminal() {
                return Ok(entry.job.clone());
            }
            entry.notify.subscribe()
        };

        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(JobStatus::is_terminal).await.map(|_| ())
        })
        .await;

        // `rx` stays alive until the job is read so retention cannot evict it.
        let outcome = match waited {
            Ok(Ok(())) => self.get(id).await.ok_or(LedgerError::NotFound { id }),
            Ok(Err(_)) => Err(LedgerError::NotFound { id }),
            Err(_) => Err(LedgerError::WaitTimeout { id, timeout }),
        };
        drop(rx);
        outcome
    }

    /// Evict terminal jobs past the age limit, then the oldest terminal jobs
    /// beyond the count limit. Jobs with active waiters are never evicted.
    pub async fn prune(&self) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(self.config.max_age)
            .unwrap_or(chrono::Duration::hours(1));

        jobs.retain(|_, entry| {
            let expired = entry
                .job
                .finished_at
                .is_some_and(|finished| now.signed_duration_since(finished) > max_age);
            !expired || entry.has_waiters()
        });

        let mut terminal: Vec<(DateTime<Utc>, Uuid)> = jobs
            .values()
            .filter(|e| e.job.status.is_terminal() && !e.has_waiters())
            .filter_map(|e| e.job.finished_at.map(|f| (f, e.job.id)))
            .collect();
        if terminal.len() > self.config.max_jobs {
            terminal.sort();
            let excess = terminal.len() - self.config.max_jobs;
            for (_, id) in terminal.into_iter().take(excess) {
                jobs.remove(&id);
            }
        }

        let evicted = before - jobs.len();
        if evicted > 0 {
            debug!(count = evicted, "Evicted finished jobs");
        }
        evicted
    }
}

fn merge_report(target: &mut serde_json::Value, report: serde_json::Value) {
    match (target, report) {
        (serde_json::Value::Object(existing), serde_json::Value::Object(incoming)) => {
            existing.extend(incoming);
        }
        (target, report) => *target = report,
    }
}
