//! Subscription records and the directory seam used by the publish path.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A registered webhook endpoint for one topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Stable identifier, echoed in delivery headers.
    pub id: Uuid,
    /// Topic this endpoint receives.
    pub topic: String,
    /// Destination URL.
    pub url: String,
    /// Plaintext signing secret. Encrypted before it touches the outbox.
    pub secret: String,
}

impl Subscription {
    /// Create a subscription with a fresh id.
    #[must_use]
    pub fn new(topic: &str, url: &str, secret: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            url: url.to_string(),
            secret: secret.to_string(),
        }
    }
}

/// Errors raised by subscription lookups.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// No subscription exists for the topic.
    #[error("no subscription registered for topic '{0}'")]
    UnknownTopic(String),
}

/// Read side of the subscription registry.
///
/// Only `subscriptions_for` is required; the single-value lookups default
/// to the first match and exist for callers that assume one endpoint per
/// topic.
#[async_trait]
pub trait SubscriptionDirectory: Send + Sync {
    /// All subscriptions for a topic, in registration order. Empty when
    /// nothing is subscribed; publishing to such a topic is a no-op, not
    /// an error.
    async fn subscriptions_for(&self, topic: &str) -> Vec<Subscription>;

    /// URL of the first subscription for `topic`.
    async fn get_url(&self, topic: &str) -> Result<String, SubscriptionError> {
        self.subscriptions_for(topic)
            .await
            .into_iter()
            .next()
            .map(|sub| sub.url)
            .ok_or_else(|| SubscriptionError::UnknownTopic(topic.to_string()))
    }

    /// Signing secret of the first subscription for `topic`.
    async fn get_secret(&self, topic: &str) -> Result<String, SubscriptionError> {
        self.subscriptions_for(topic)
            .await
            .into_iter()
            .next()
            .map(|sub| sub.secret)
            .ok_or_else(|| SubscriptionError::UnknownTopic(topic.to_string()))
    }
}

/// In-memory directory backed by a `RwLock`'d list.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription.
    pub fn add(&self, subscription: Subscription) {
        tracing::info!(
            target: "hookrelay_webhooks",
            subscription_id = %subscription.id,
            topic = %subscription.topic,
            url = %subscription.url,
            "Subscription registered"
        );
        self.subscriptions.write().push(subscription);
    }

    /// Replace the secret on every subscription for `topic`.
    ///
    /// In-flight outbox messages keep the secret snapshot captured at
    /// publish time, so rotation never breaks pending deliveries.
    pub fn rotate_secret(&self, topic: &str, new_secret: &str) -> usize {
        let mut subscriptions = self.subscriptions.write();
        let mut rotated = 0;
        for sub in subscriptions.iter_mut().filter(|s| s.topic == topic) {
            sub.secret = new_secret.to_string();
            rotated += 1;
        }
        rotated
    }
}

#[async_trait]
impl SubscriptionDirectory for InMemoryDirectory {
    async fn subscriptions_for(&self, topic: &str) -> Vec<Subscription> {
        self.subscriptions
            .read()
            .iter()
            .filter(|sub| sub.topic == topic)
            .cloned()
            .collect()
    }
}
