//! Process-one retry driver for the job queue.
//!
//! The worker owns the retry policy the queue and dispatcher deliberately do
//! not have: it reserves one job, dispatches it, and routes the result —
//! ack on success, ack-and-dead-letter on fatal errors or exhausted
//! attempts, re-queue with backoff on retryable failures.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::observability::DispatchObserver;

use super::{DispatchError, JobId, JobQueue, JobRegistry};

/// Retry policy applied by the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts after which a job is dead-lettered (dispatch included).
    pub max_attempts: u32,
    /// Base delay for the first retry, in seconds.
    pub base_delay_seconds: u64,
    /// Upper bound on any single backoff delay, in seconds.
    pub max_delay_seconds: u64,
    /// Add up to 50% random jitter to each delay.
    pub jitter: bool,
    /// Timeout applied to each dispatch, in seconds (`None` = unbounded).
    pub dispatch_timeout_secs: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay_seconds: 30,
            max_delay_seconds: 86_400,
            jitter: true,
            dispatch_timeout_secs: Some(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given attempt (1-based): exponential doubling
    /// from the base delay, capped, with optional jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_delay_seconds
            .saturating_mul(1_u64 << exponent)
            .min(self.max_delay_seconds);

        if self.jitter && delay > 0 {
            let spread = delay / 2;
            delay + rand::thread_rng().gen_range(0..=spread)
        } else {
            delay
        }
    }

    fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout_secs.map(Duration::from_secs)
    }
}

/// How a processed job left the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Handler succeeded; job acked.
    Completed,
    /// Retryable failure; job re-queued with backoff.
    Retried,
    /// Fatal failure or exhausted attempts; job acked and logged as
    /// dead-lettered.
    DeadLettered,
}

/// Outcome of one `process_one` pass.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    /// The processed job's id.
    pub job_id: JobId,
    /// The processed job's dispatch key.
    pub job_name: String,
    /// How the job left the worker.
    pub status: ProcessStatus,
}

/// Drives the queue: reserve, dispatch, route the result.
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    registry: Arc<JobRegistry>,
    policy: RetryPolicy,
}

impl Worker {
    /// Create a worker over a queue and registry.
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, registry: Arc<JobRegistry>, policy: RetryPolicy) -> Self {
        Self {
            queue,
            registry,
            policy,
        }
    }

    /// Reserve and process the next due job, if any.
    ///
    /// Returns `None` when nothing is due. Dispatch never retries
    /// internally; every retry decision happens here.
    pub async fn process_one(&self) -> Option<ProcessReport> {
        let job = self.queue.reserve_next().await?;
        let job_id = job.id;
        let job_name = job.name.clone();
        let attempt = job.attempts + 1;

        let result = self
            .registry
            .dispatch(job, self.policy.dispatch_timeout())
            .await;

        let status = match result {
            Ok(_) => {
                self.queue.ack(job_id).await;
                ProcessStatus::Completed
            }
            Err(err) => self.route_failure(job_id, &job_name, attempt, &err).await,
        };

        Some(ProcessReport {
            job_id,
            job_name,
            status,
        })
    }

    /// Process every due job until the queue reports nothing due.
    ///
    /// Returns the number of jobs processed. Registered on the scheduler at
    /// interval 0 so each tick drains the backlog.
    pub async fn run_pending(&self) -> usize {
        let mut processed = 0;
        while self.process_one().await.is_some() {
            processed += 1;
        }
        processed
    }

    async fn route_failure(
        &self,
        job_id: JobId,
        job_name: &str,
        attempt: u32,
        err: &DispatchError,
    ) -> ProcessStatus {
        if !err.is_retryable() {
            self.queue.ack(job_id).await;
            DispatchObserver::log_dead_letter(job_id, job_name, attempt, &err.to_string());
            return ProcessStatus::DeadLettered;
        }

        if attempt >= self.policy.max_attempts {
            self.queue.ack(job_id).await;
            DispatchObserver::log_dead_letter(
                job_id,
                job_name,
                attempt,
                &format!("retry budget exhausted: {err}"),
            );
            return ProcessStatus::DeadLettered;
        }

        let backoff = self.policy.delay_for(attempt);
        self.queue
            .fail(job_id, &err.to_string(), Some(backoff))
            .await;
        ProcessStatus::Retried
    }
}
