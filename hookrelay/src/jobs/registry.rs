//! Dispatch registry: maps job names to async handlers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::time::timeout;

use crate::observability::DispatchObserver;

use super::Job;

/// Successful handler result.
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    /// Optional human-readable summary.
    pub message: Option<String>,
    /// Structured details for logs and inspection surfaces.
    pub details: serde_json::Value,
}

impl JobOutcome {
    /// A bare success with no message.
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// A success with a summary message.
    #[must_use]
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            details: serde_json::Value::Null,
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Failure returned by a job handler.
///
/// The variant carries the retry decision, so the retry driver matches a
/// type instead of inspecting error classes.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// Transient failure: the job should be re-queued with backoff.
    #[error("{0}")]
    Retryable(String),
    /// Permanent failure: retrying cannot succeed, dead-letter the job.
    #[error("{0}")]
    Fatal(String),
}

impl JobError {
    /// Whether the retry driver should re-queue the job.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Errors surfaced by [`JobRegistry::dispatch`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler registered for the job's name. A configuration error:
    /// fatal, surfaced immediately, never retried by the dispatcher.
    #[error("no handler registered for job '{name}'")]
    UnknownJob {
        /// The unresolvable dispatch key.
        name: String,
    },

    /// The handler exceeded the dispatch timeout; its in-flight future was
    /// cancelled. Treated as a failed attempt by the retry driver.
    #[error("job '{name}' timed out after {timeout:?}")]
    Timeout {
        /// The job's dispatch key.
        name: String,
        /// The exceeded timeout.
        timeout: Duration,
    },

    /// The handler ran and returned a failure.
    #[error(transparent)]
    Handler(#[from] JobError),
}

impl DispatchError {
    /// Whether the retry driver should re-queue the job.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::UnknownJob { .. } => false,
            Self::Timeout { .. } => true,
            Self::Handler(err) => err.is_retryable(),
        }
    }
}

/// Callback invoked when the dispatch path throttles a key:
/// `(key, limit, retry_after)`.
pub type ThrottleHook = Arc<dyn Fn(&str, u32, Duration) + Send + Sync>;

type HandlerFuture = Pin<Box<dyn Future<Output = Result<JobOutcome, JobError>> + Send>>;
type Handler = Arc<dyn Fn(Job) -> HandlerFuture + Send + Sync>;

/// Maps job names to handlers and executes dispatches with timeout and
/// metrics. Never retries internally: retry belongs to whoever drives the
/// queue.
#[derive(Default)]
pub struct JobRegistry {
    handlers: RwLock<HashMap<String, Handler>>,
    throttle_hook: RwLock<Option<ThrottleHook>>,
    #[cfg(feature = "otel-metrics")]
    metrics: RwLock<Option<Arc<crate::observability::DispatchMetrics>>>,
}

impl JobRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a name to an async handler.
    ///
    /// Re-registering a name overwrites the previous handler; this is
    /// logged, not fatal.
    pub fn register<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JobOutcome, JobError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |job| Box::pin(handler(job)));
        let previous = self.handlers.write().insert(name.to_string(), handler);
        if previous.is_some() {
            tracing::warn!(
                target: "hookrelay_jobs",
                job_name = name,
                "Handler re-registered, previous handler replaced"
            );
        }
    }

    /// Names with a registered handler.
    #[must_use]
    pub fn registered_names(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    /// Install the throttle hook invoked by [`Self::notify_throttled`].
    pub fn set_throttle_hook(&self, hook: ThrottleHook) {
        *self.throttle_hook.write() = Some(hook);
    }

    /// Report a throttling event on the dispatch path to the installed hook.
    pub fn notify_throttled(&self, key: &str, limit: u32, retry_after: Duration) {
        DispatchObserver::log_throttled(key, limit, retry_after);
        if let Some(hook) = self.throttle_hook.read().clone() {
            hook(key, limit, retry_after);
        }
    }

    /// Install the optional metrics collector. Absence of a backend is
    /// never fatal: dispatch falls back to log-only observation.
    #[cfg(feature = "otel-metrics")]
    pub fn set_metrics(&self, metrics: Arc<crate::observability::DispatchMetrics>) {
        *self.metrics.write() = Some(metrics);
    }

    /// Execute the handler registered for `job.name`.
    ///
    /// With a timeout set, an overrunning handler future is cancelled and
    /// the dispatch returns [`DispatchError::Timeout`]. Handler failures
    /// propagate unchanged as [`DispatchError::Handler`]; routing them to
    /// `JobQueue::fail` is the caller's job.
    pub async fn dispatch(
        &self,
        job: Job,
        dispatch_timeout: Option<Duration>,
    ) -> Result<JobOutcome, DispatchError> {
        let handler = self.handlers.read().get(&job.name).cloned();
        let Some(handler) = handler else {
            DispatchObserver::log_unknown_job(job.id, &job.name);
            return Err(DispatchError::UnknownJob { name: job.name });
        };

        let name = job.name.clone();
        let job_id = job.id;
        let attempt = job.attempts + 1;
        DispatchObserver::log_dispatch_start(job_id, &name, attempt);

        let started = std::time::Instant::now();
        let result = match dispatch_timeout {
            Some(limit) => match timeout(limit, handler(job)).await {
                Ok(result) => result,
                Err(_) => {
                    self.record(&name, "timeout", started.elapsed());
                    DispatchObserver::log_timeout(job_id, &name, limit);
                    return Err(DispatchError::Timeout {
                        name,
                        timeout: limit,
                    });
                }
            },
            None => handler(job).await,
        };

        let elapsed = started.elapsed();
        match result {
            Ok(outcome) => {
                self.record(&name, "success", elapsed);
                DispatchObserver::log_dispatch_success(job_id, &name, attempt, elapsed);
                Ok(outcome)
            }
            Err(err) => {
                self.record(&name, "failure", elapsed);
                DispatchObserver::log_dispatch_failure(job_id, &name, attempt, &err);
                Err(DispatchError::Handler(err))
            }
        }
    }

    #[cfg(feature = "otel-metrics")]
    fn record(&self, job_name: &str, status: &str, elapsed: Duration) {
        if let Some(metrics) = self.metrics.read().clone() {
            metrics.record(job_name, status, elapsed);
        }
    }

    #[cfg(not(feature = "otel-metrics"))]
    #[allow(clippy::unused_self)]
    fn record(&self, _job_name: &str, _status: &str, _elapsed: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobPayload;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn job(name: &str) -> Job {
        Job::new(name, JobPayload::new(), 0, 30)
    }

    #[tokio::test]
    async fn test_dispatch_runs_registered_handler() {
        let registry = JobRegistry::new();
        registry.register("demo", |_job| async {
            Ok(JobOutcome::with_message("done"))
        });

        let outcome = registry.dispatch(job("demo"), None).await.expect("success");
        assert_eq!(outcome.message.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_name_fails_before_any_handler_runs() {
        let registry = JobRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        let spy = Arc::clone(&calls);
        registry.register("other", move |_job| {
            spy.fetch_add(1, Ordering::SeqCst);
            async { Ok(JobOutcome::ok()) }
        });

        let err = registry
            .dispatch(job("missing"), None)
            .await
            .expect_err("unknown job");
        assert!(matches!(err, DispatchError::UnknownJob { ref name } if name == "missing"));
        assert!(!err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispatch_timeout_cancels_handler() {
        let registry = JobRegistry::new();
        registry.register("slow", |_job| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(JobOutcome::ok())
        });

        let err = registry
            .dispatch(job("slow"), Some(Duration::from_millis(20)))
            .await
            .expect_err("times out");
        assert!(matches!(err, DispatchError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_handler_errors_propagate_unchanged() {
        let registry = JobRegistry::new();
        registry.register("flaky", |_job| async {
            Err(JobError::Retryable("503 from receiver".into()))
        });
        registry.register("broken", |_job| async {
            Err(JobError::Fatal("malformed payload".into()))
        });

        let retryable = registry.dispatch(job("flaky"), None).await.expect_err("fails");
        assert!(retryable.is_retryable());

        let fatal = registry.dispatch(job("broken"), None).await.expect_err("fails");
        assert!(!fatal.is_retryable());
    }

    #[tokio::test]
    async fn test_re_registering_overwrites_handler() {
        let registry = JobRegistry::new();
        registry.register("demo", |_job| async { Ok(JobOutcome::with_message("v1")) });
        registry.register("demo", |_job| async { Ok(JobOutcome::with_message("v2")) });

        let outcome = registry.dispatch(job("demo"), None).await.expect("success");
        assert_eq!(outcome.message.as_deref(), Some("v2"));
        assert_eq!(registry.registered_names().len(), 1);
    }

    #[tokio::test]
    async fn test_throttle_hook_receives_events() {
        let registry = JobRegistry::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.set_throttle_hook(Arc::new(move |key, limit, retry_after| {
            sink.lock().push((key.to_string(), limit, retry_after));
        }));

        registry.notify_throttled("receiver.example", 100, Duration::from_secs(30));
        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "receiver.example");
        assert_eq!(events[0].1, 100);
    }
}
