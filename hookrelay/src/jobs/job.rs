//! The job record: a unit of retryable work.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new random job ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<JobId> for Uuid {
    fn from(id: JobId) -> Self {
        id.0
    }
}

/// Job payload: an ordered key-value mapping.
///
/// `serde_json` is built with `preserve_order`, so the map keeps insertion
/// order through serialization round trips.
pub type JobPayload = serde_json::Map<String, serde_json::Value>;

/// A unit of retryable work.
///
/// Jobs are plain data: the behavior lives in the handler registered for
/// `name` on the [`JobRegistry`](crate::jobs::JobRegistry). A job is created
/// by `enqueue`, claimed by `reserve_next`, rescheduled by `fail`, and
/// destroyed by `ack`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier.
    pub id: JobId,
    /// Dispatch key resolved against the registry.
    pub name: String,
    /// Ordered key-value payload.
    pub payload: JobPayload,
    /// Completed attempts so far (0 before the first dispatch).
    pub attempts: u32,
    /// The job is eligible for reservation only once `now >= available_at`.
    pub available_at: DateTime<Utc>,
    /// Per-job backoff applied by `fail` when no override is given.
    pub backoff_seconds: u64,
    /// Message from the most recent failure, if any.
    pub last_error: Option<String>,
}

impl Job {
    /// Create a job eligible after `delay_seconds`.
    #[must_use]
    pub fn new(name: &str, payload: JobPayload, delay_seconds: u64, backoff_seconds: u64) -> Self {
        Self {
            id: JobId::new(),
            name: name.to_string(),
            payload,
            attempts: 0,
            available_at: Utc::now() + chrono::Duration::seconds(delay_seconds.try_into().unwrap_or(i64::MAX)),
            backoff_seconds,
            last_error: None,
        }
    }
}
