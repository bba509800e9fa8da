//! Outbox store: the durable, ordered event log behind at-least-once
//! delivery.
//!
//! Publishing appends one message per subscriber; the drain selects due
//! messages for delivery; a message is marked processed only after a `2xx`
//! response and is never physically deleted, so the log doubles as an audit
//! and replay surface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A durable record of one event bound for one subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Monotonically increasing id assigned at enqueue.
    pub id: u64,
    /// Event topic.
    pub topic: String,
    /// Event envelope plus the subscription snapshot captured at publish
    /// time (url, topic, encrypted secret, subscription id), so later
    /// secret rotation cannot break in-flight deliveries.
    pub payload: serde_json::Value,
    /// When the message was appended.
    pub created_at: DateTime<Utc>,
    /// Failed delivery attempts recorded against this message. Drain
    /// selection does not count here; see [`OutboxStore::mark_drained`].
    pub attempts: u32,
    /// When the drain last selected this message, so the default policy
    /// does not hand out a second job while the first is still in flight.
    #[serde(default)]
    pub drained_at: Option<DateTime<Utc>>,
    /// Set at most once, only after a `2xx` delivery response.
    pub processed_at: Option<DateTime<Utc>>,
}

/// How the drain treats messages that have already been selected or have
/// failed a delivery.
///
/// `SkipAttempted` reproduces the source semantics exactly: a message is
/// drained once, and retries for its delivery happen only through the job
/// queue's backoff. `RedrainFailed` re-selects unprocessed messages on every
/// drain pass regardless of attempts. Both are deliberate; neither is a
/// silent fix of the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    /// Only never-drained messages with `attempts == 0` are selectable
    /// (default).
    #[default]
    SkipAttempted,
    /// Any unprocessed message is selectable.
    RedrainFailed,
}

/// Durable event log with FIFO drain semantics.
///
/// Backends must assign monotonic ids, keep FIFO order by id, and never
/// physically delete messages.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Durable append; assigns the next monotonic id.
    async fn enqueue(&self, topic: &str, payload: serde_json::Value) -> OutboxMessage;

    /// Next drainable message in FIFO order by id: unprocessed, permitted
    /// by the drain policy, and matching the topic allow-list when one is
    /// given.
    async fn fetch_next(&self, topics: Option<&[String]>) -> Option<OutboxMessage>;

    /// Up to `limit` drainable messages in FIFO order by id, under the same
    /// selection rules as [`Self::fetch_next`]. One drain pass works off a
    /// single batch, so a still-drainable head cannot shadow the messages
    /// behind it.
    async fn fetch_drainable(&self, topics: Option<&[String]>, limit: usize) -> Vec<OutboxMessage>;

    /// Look up a message by id.
    async fn get(&self, id: u64) -> Option<OutboxMessage>;

    /// Record a drain selection: sets `drained_at` so the default policy
    /// does not re-select the message on the next pass. Leaves `attempts`
    /// alone; only [`Self::mark_failed`] counts attempts.
    async fn mark_drained(&self, id: u64);

    /// Set `processed_at`. Idempotent: the first timestamp wins.
    async fn mark_processed(&self, id: u64);

    /// Record a failed delivery: increments `attempts`.
    async fn mark_failed(&self, id: u64);

    /// Inspection surface: unprocessed messages in FIFO order.
    async fn list_unprocessed(&self, limit: usize) -> Vec<OutboxMessage>;

    /// Inspection surface: unprocessed messages with at least one recorded
    /// attempt, in FIFO order.
    async fn list_failed(&self, limit: usize) -> Vec<OutboxMessage>;
}

#[derive(Debug, Default)]
struct OutboxInner {
    messages: Vec<OutboxMessage>,
    next_id: u64,
}

/// Mutex-guarded in-memory outbox. Messages live in append order, which is
/// id order.
#[derive(Debug)]
pub struct InMemoryOutboxStore {
    inner: Mutex<OutboxInner>,
    policy: DrainPolicy,
}

impl InMemoryOutboxStore {
    /// Create an empty store with the given drain policy.
    #[must_use]
    pub fn new(policy: DrainPolicy) -> Self {
        Self {
            inner: Mutex::new(OutboxInner::default()),
            policy,
        }
    }

    /// The configured drain policy.
    #[must_use]
    pub const fn policy(&self) -> DrainPolicy {
        self.policy
    }

    fn matches(topics: Option<&[String]>, topic: &str) -> bool {
        topics.map_or(true, |allow| allow.iter().any(|t| t == topic))
    }

    fn drainable(&self, message: &OutboxMessage) -> bool {
        message.processed_at.is_none()
            && match self.policy {
                DrainPolicy::SkipAttempted => {
                    message.attempts == 0 && message.drained_at.is_none()
                }
                DrainPolicy::RedrainFailed => true,
            }
    }
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new(DrainPolicy::default())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(&self, topic: &str, payload: serde_json::Value) -> OutboxMessage {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let message = OutboxMessage {
            id: inner.next_id,
            topic: topic.to_string(),
            payload,
            created_at: Utc::now(),
            attempts: 0,
            drained_at: None,
            processed_at: None,
        };
        tracing::debug!(
            target: "hookrelay_outbox",
            outbox_id = message.id,
            topic,
            "Outbox message appended"
        );
        inner.messages.push(message.clone());
        message
    }

    async fn fetch_next(&self, topics: Option<&[String]>) -> Option<OutboxMessage> {
        let inner = self.inner.lock();
        inner
            .messages
            .iter()
            .find(|m| self.drainable(m) && Self::matches(topics, &m.topic))
            .cloned()
    }

    async fn fetch_drainable(&self, topics: Option<&[String]>, limit: usize) -> Vec<OutboxMessage> {
        let inner = self.inner.lock();
        inner
            .messages
            .iter()
            .filter(|m| self.drainable(m) && Self::matches(topics, &m.topic))
            .take(limit)
            .cloned()
            .collect()
    }

    async fn get(&self, id: u64) -> Option<OutboxMessage> {
        self.inner.lock().messages.iter().find(|m| m.id == id).cloned()
    }

    async fn mark_drained(&self, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(message) = inner.messages.iter_mut().find(|m| m.id == id) {
            message.drained_at = Some(Utc::now());
        }
    }

    async fn mark_processed(&self, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(message) = inner.messages.iter_mut().find(|m| m.id == id) {
            if message.processed_at.is_none() {
                message.processed_at = Some(Utc::now());
                tracing::info!(
                    target: "hookrelay_outbox",
                    outbox_id = id,
                    topic = %message.topic,
                    attempts = message.attempts,
                    "Outbox message processed"
                );
            }
        }
    }

    async fn mark_failed(&self, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(message) = inner.messages.iter_mut().find(|m| m.id == id) {
            message.attempts += 1;
            tracing::warn!(
                target: "hookrelay_outbox",
                outbox_id = id,
                topic = %message.topic,
                attempts = message.attempts,
                "Outbox delivery failure recorded"
            );
        }
    }

    async fn list_unprocessed(&self, limit: usize) -> Vec<OutboxMessage> {
        self.inner
            .lock()
            .messages
            .iter()
            .filter(|m| m.processed_at.is_none())
            .take(limit)
            .cloned()
            .collect()
    }

    async fn list_failed(&self, limit: usize) -> Vec<OutboxMessage> {
        self.inner
            .lock()
            .messages
            .iter()
            .filter(|m| m.processed_at.is_none() && m.attempts > 0)
            .take(limit)
            .cloned()
            .collect()
    }
}
