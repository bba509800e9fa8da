//! Publish side of the webhook pipeline.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::jobs::{JobPayload, JobQueue};
use crate::outbox::OutboxStore;

use super::crypto;
use super::delivery::DELIVERY_JOB_NAME;
use super::error::WebhookError;
use super::subscription::SubscriptionDirectory;

/// Upper bound on jobs enqueued per drain pass; anything beyond it waits
/// for the next tick.
const DRAIN_BATCH_SIZE: usize = 128;

/// Fans events out to subscribers through the outbox.
///
/// `publish` is the producer-facing entry point: it resolves subscribers,
/// snapshots each one into an outbox message, and returns. Delivery happens
/// later, when `drain_once` converts due messages into jobs.
pub struct WebhookService {
    outbox: Arc<dyn OutboxStore>,
    directory: Arc<dyn SubscriptionDirectory>,
    encryption_key: Vec<u8>,
    drain_topics: Vec<String>,
}

impl WebhookService {
    /// Create a service over the given stores.
    ///
    /// `drain_topics` is the drain allow-list; empty means every topic.
    #[must_use]
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        directory: Arc<dyn SubscriptionDirectory>,
        encryption_key: Vec<u8>,
        drain_topics: Vec<String>,
    ) -> Self {
        Self {
            outbox,
            directory,
            encryption_key,
            drain_topics,
        }
    }

    /// Record an event for every subscriber of `topic`.
    ///
    /// Appends one outbox message per subscription, each carrying the event
    /// envelope plus a snapshot of the subscription (url, topic, encrypted
    /// secret, id) so later directory changes cannot affect this delivery.
    /// Returns the id of the last message appended, or `None` when the
    /// topic has no subscribers (a no-op, not an error).
    pub async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        version: u32,
    ) -> Result<Option<u64>, WebhookError> {
        let subscriptions = self.directory.subscriptions_for(topic).await;
        if subscriptions.is_empty() {
            tracing::debug!(
                target: "hookrelay_webhooks",
                topic,
                "No subscribers, event dropped"
            );
            return Ok(None);
        }

        let created_at = Utc::now();
        let mut last_id = None;
        for subscription in &subscriptions {
            let sealed_secret = crypto::encrypt_secret(&subscription.secret, &self.encryption_key)?;
            let envelope = json!({
                "event": {
                    "topic": topic,
                    "version": version,
                    "created_at": created_at.to_rfc3339(),
                    "payload": payload,
                },
                "subscription": {
                    "id": subscription.id,
                    "topic": subscription.topic,
                    "url": subscription.url,
                    "secret": sealed_secret,
                },
            });
            let message = self.outbox.enqueue(topic, envelope).await;
            tracing::info!(
                target: "hookrelay_webhooks",
                topic,
                outbox_id = message.id,
                subscription_id = %subscription.id,
                url = %subscription.url,
                "Event recorded for delivery"
            );
            last_id = Some(message.id);
        }
        Ok(last_id)
    }

    /// Convert currently-due outbox messages into delivery jobs.
    ///
    /// One pass works off a single snapshot of drainable messages, so under
    /// `RedrainFailed` a still-drainable message cannot shadow the ones
    /// behind it. Each selection is marked on the store before its job is
    /// enqueued; under the default drain policy that makes selection
    /// one-shot, and redelivery happens through the job queue's retries.
    /// Returns the number of jobs enqueued.
    pub async fn drain_once(&self, queue: &dyn JobQueue) -> usize {
        let topics = (!self.drain_topics.is_empty()).then_some(self.drain_topics.as_slice());
        let batch = self.outbox.fetch_drainable(topics, DRAIN_BATCH_SIZE).await;

        let mut drained = 0;
        for message in batch {
            self.outbox.mark_drained(message.id).await;

            let mut payload = JobPayload::new();
            payload.insert("outbox_id".to_string(), message.id.into());
            let job = queue.enqueue(DELIVERY_JOB_NAME, payload, 0).await;
            tracing::debug!(
                target: "hookrelay_webhooks",
                outbox_id = message.id,
                topic = %message.topic,
                job_id = %job.id,
                "Delivery job enqueued"
            );
            drained += 1;
        }
        drained
    }
}
