//! Structured logging for the dispatch path, with optional OpenTelemetry
//! metrics behind the `otel-metrics` feature.
//!
//! All dispatch-path events funnel through [`DispatchObserver`] so log
//! fields stay consistent (`job_id`, `job_name`, `attempt`) and a metrics
//! backend can be attached without touching call sites. Metrics are
//! strictly optional: absence of a backend degrades to log-only
//! observation, never to an error.

use std::time::Duration;

use crate::jobs::{JobError, JobId};

/// Install the process-wide tracing subscriber.
///
/// Filter via `RUST_LOG` (default `info`). Safe to call once at startup;
/// library code never calls this.
pub fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Log-side observer for dispatch lifecycle events.
///
/// Stateless by design: every fn is an associated fn so the registry and
/// retry driver can emit events without threading an observer handle.
#[derive(Debug, Clone, Copy)]
pub struct DispatchObserver;

impl DispatchObserver {
    /// A job named something no handler is registered for.
    pub fn log_unknown_job(job_id: JobId, job_name: &str) {
        tracing::error!(
            target: "hookrelay_jobs",
            %job_id,
            job_name,
            "No handler registered for job"
        );
    }

    /// A dispatch attempt is starting.
    pub fn log_dispatch_start(job_id: JobId, job_name: &str, attempt: u32) {
        tracing::debug!(
            target: "hookrelay_jobs",
            %job_id,
            job_name,
            attempt,
            "Dispatching job"
        );
    }

    /// The handler returned success.
    pub fn log_dispatch_success(job_id: JobId, job_name: &str, attempt: u32, elapsed: Duration) {
        tracing::info!(
            target: "hookrelay_jobs",
            %job_id,
            job_name,
            attempt,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Job completed"
        );
    }

    /// The handler returned a failure.
    pub fn log_dispatch_failure(job_id: JobId, job_name: &str, attempt: u32, err: &JobError) {
        tracing::warn!(
            target: "hookrelay_jobs",
            %job_id,
            job_name,
            attempt,
            retryable = err.is_retryable(),
            error = %err,
            "Job failed"
        );
    }

    /// The handler overran the dispatch timeout and was cancelled.
    pub fn log_timeout(job_id: JobId, job_name: &str, timeout: Duration) {
        tracing::warn!(
            target: "hookrelay_jobs",
            %job_id,
            job_name,
            timeout_secs = timeout.as_secs(),
            "Job cancelled after dispatch timeout"
        );
    }

    /// The retry driver removed the job from circulation permanently.
    pub fn log_dead_letter(job_id: JobId, job_name: &str, attempt: u32, reason: &str) {
        tracing::error!(
            target: "hookrelay_jobs",
            %job_id,
            job_name,
            attempt,
            reason,
            "Job dead-lettered"
        );
    }

    /// The dispatch path throttled a key.
    pub fn log_throttled(key: &str, limit: u32, retry_after: Duration) {
        tracing::warn!(
            target: "hookrelay_jobs",
            key,
            limit,
            retry_after_secs = retry_after.as_secs(),
            "Dispatch throttled"
        );
    }
}

/// OpenTelemetry counters and histograms for the dispatch path.
#[cfg(feature = "otel-metrics")]
#[derive(Debug)]
pub struct DispatchMetrics {
    processed: opentelemetry::metrics::Counter<u64>,
    duration: opentelemetry::metrics::Histogram<f64>,
}

#[cfg(feature = "otel-metrics")]
impl DispatchMetrics {
    /// Build the instruments on the given meter.
    #[must_use]
    pub fn new(meter: &opentelemetry::metrics::Meter) -> Self {
        Self {
            processed: meter
                .u64_counter("hookrelay_processed_total")
                .with_description("Jobs processed, by job name and terminal status")
                .build(),
            duration: meter
                .f64_histogram("hookrelay_duration_seconds")
                .with_description("Handler execution time in seconds, by job name")
                .with_unit("s")
                .build(),
        }
    }

    /// Record one finished dispatch.
    pub fn record(&self, job_name: &str, status: &str, elapsed: Duration) {
        use opentelemetry::KeyValue;

        let labels = [
            KeyValue::new("job_name", job_name.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.processed.add(1, &labels);
        self.duration.record(
            elapsed.as_secs_f64(),
            &[KeyValue::new("job_name", job_name.to_string())],
        );
    }
}
