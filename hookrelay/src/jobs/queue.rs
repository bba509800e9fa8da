//! Job queue: durable storage of retryable work items.
//!
//! The trait is the behavioral contract a durable backend (Redis, SQL with
//! `SKIP LOCKED`) must honor; [`InMemoryJobQueue`] is the reference
//! implementation used by a single worker process, where a mutex is enough
//! to make `reserve_next` an atomic claim.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use super::{Job, JobId, JobPayload};

/// Store of retryable work items with single-claim reservation semantics.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Create a job eligible after `delay_seconds`. Always succeeds.
    async fn enqueue(&self, name: &str, payload: JobPayload, delay_seconds: u64) -> Job;

    /// Claim the earliest-available job whose `available_at <= now`.
    ///
    /// Returns `None` when the queue is empty or nothing is due. At most one
    /// caller can hold a reservation for a given job at a time.
    async fn reserve_next(&self) -> Option<Job>;

    /// Remove a job. Idempotent: a no-op if the job is absent.
    async fn ack(&self, id: JobId);

    /// Record a failed attempt: increments `attempts`, stores the error,
    /// reschedules `available_at = now + backoff`, and releases the
    /// reservation. `backoff_seconds` overrides the job's own backoff when
    /// given; retry-limit policy belongs to the caller, not the queue.
    async fn fail(&self, id: JobId, error: &str, backoff_seconds: Option<u64>);

    /// Number of jobs currently stored (reserved ones included).
    async fn len(&self) -> usize;

    /// Whether the queue holds no jobs at all.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    jobs: HashMap<JobId, Job>,
    reserved: HashSet<JobId>,
}

/// Mutex-guarded in-memory queue for a single worker process.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    inner: Mutex<QueueInner>,
    default_backoff_seconds: u64,
}

impl InMemoryJobQueue {
    /// Create an empty queue; jobs default to `default_backoff_seconds`
    /// between failed attempts.
    #[must_use]
    pub fn new(default_backoff_seconds: u64) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            default_backoff_seconds,
        }
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(30)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, name: &str, payload: JobPayload, delay_seconds: u64) -> Job {
        let job = Job::new(name, payload, delay_seconds, self.default_backoff_seconds);
        tracing::debug!(
            target: "hookrelay_jobs",
            job_id = %job.id,
            job_name = name,
            delay_seconds,
            "Job enqueued"
        );
        self.inner.lock().jobs.insert(job.id, job.clone());
        job
    }

    async fn reserve_next(&self) -> Option<Job> {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let due = inner
            .jobs
            .values()
            .filter(|job| job.available_at <= now && !inner.reserved.contains(&job.id))
            .min_by_key(|job| job.available_at)
            .cloned()?;

        inner.reserved.insert(due.id);
        tracing::debug!(
            target: "hookrelay_jobs",
            job_id = %due.id,
            job_name = %due.name,
            attempt = due.attempts,
            "Job reserved"
        );
        Some(due)
    }

    async fn ack(&self, id: JobId) {
        let mut inner = self.inner.lock();
        inner.reserved.remove(&id);
        if inner.jobs.remove(&id).is_some() {
            tracing::debug!(target: "hookrelay_jobs", job_id = %id, "Job acked");
        }
    }

    async fn fail(&self, id: JobId, error: &str, backoff_seconds: Option<u64>) {
        let mut inner = self.inner.lock();
        inner.reserved.remove(&id);

        let Some(job) = inner.jobs.get_mut(&id) else {
            return;
        };

        if let Some(backoff) = backoff_seconds {
            job.backoff_seconds = backoff;
        }
        job.attempts += 1;
        job.last_error = Some(error.to_string());
        job.available_at =
            Utc::now() + Duration::seconds(job.backoff_seconds.try_into().unwrap_or(i64::MAX));

        tracing::warn!(
            target: "hookrelay_jobs",
            job_id = %id,
            job_name = %job.name,
            attempt = job.attempts,
            backoff_seconds = job.backoff_seconds,
            error,
            "Job failed, rescheduled with backoff"
        );
    }

    async fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }
}
