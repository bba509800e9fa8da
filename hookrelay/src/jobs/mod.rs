//! Retryable background jobs: queue, dispatch registry, and retry driver.
//!
//! The job system deliberately splits responsibilities three ways:
//!
//! - [`JobQueue`] stores retryable work items and hands out atomic
//!   single-claim reservations. It applies whatever backoff a job carries
//!   but holds no retry-limit policy of its own.
//! - [`JobRegistry`] maps job names to async handlers and executes one
//!   dispatch with an optional timeout. It never retries internally.
//! - [`Worker`] is the process-one loop that owns retry policy: it reserves,
//!   dispatches, re-queues retryable failures with backoff, and dead-letters
//!   jobs that exhaust their attempts or fail fatally.
//!
//! Handlers return `Result<JobOutcome, JobError>` where [`JobError`]
//! distinguishes retryable from fatal failures, so the retry driver decides
//! by matching a type rather than inspecting error class hierarchies.

mod job;
mod queue;
mod registry;
mod worker;

pub use job::{Job, JobId, JobPayload};
pub use queue::{InMemoryJobQueue, JobQueue};
pub use registry::{DispatchError, JobError, JobOutcome, JobRegistry, ThrottleHook};
pub use worker::{ProcessReport, ProcessStatus, RetryPolicy, Worker};
