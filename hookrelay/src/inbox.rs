//! Inbox store: the deduplication ledger that makes delivery idempotent.
//!
//! Keys are logical delivery identifiers (`webhook:<outbox_id>`). The first
//! `mark_if_new` within a TTL window wins; every replay inside the window
//! returns `false` with no further side effects, so a message dispatched
//! twice concurrently is still delivered with one visible effect.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// TTL'd dedup ledger with atomic check-and-set.
#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Atomic check-and-set: `true` exactly once per key within its TTL
    /// window; `false` on every replay inside the window.
    async fn mark_if_new(&self, key: &str, ttl_seconds: u64) -> bool;

    /// Read-only existence check, no side effects.
    async fn is_marked(&self, key: &str) -> bool;

    /// Sweep expired entries; returns how many were removed. Backends with
    /// native key expiry may implement this as a no-op.
    async fn purge_expired(&self) -> usize;
}

/// In-memory ledger mapping keys to their expiry instant.
#[derive(Debug, Default)]
pub struct InMemoryInboxStore {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryInboxStore {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InboxStore for InMemoryInboxStore {
    async fn mark_if_new(&self, key: &str, ttl_seconds: u64) -> bool {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl_seconds.try_into().unwrap_or(i64::MAX));
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(expiry) if *expiry > now => false,
            _ => {
                // Absent or expired: this caller wins the window.
                entries.insert(key.to_string(), expires_at);
                tracing::debug!(
                    target: "hookrelay_inbox",
                    key,
                    ttl_seconds,
                    "Delivery key marked"
                );
                true
            }
        }
    }

    async fn is_marked(&self, key: &str) -> bool {
        let now = Utc::now();
        self.entries
            .lock()
            .get(key)
            .is_some_and(|expiry| *expiry > now)
    }

    async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, expiry| *expiry > now);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(
                target: "hookrelay_inbox",
                removed,
                "Expired delivery keys purged"
            );
        }
        removed
    }
}
