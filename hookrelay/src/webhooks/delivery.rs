//! The delivery job handler: signs and POSTs one outbox message to one
//! subscriber, through that destination's circuit breaker.
//!
//! Retry decisions are carried in the return type. `JobError::Retryable`
//! re-queues the job with backoff; `JobError::Fatal` dead-letters it. The
//! outbox message itself is marked processed only on a `2xx` response, and
//! the inbox dedup mark makes redundant re-dispatches of an already
//! delivered message invisible to the receiver.

use std::sync::Arc;

use serde_json::Value;

use crate::breaker::CircuitBreakerRegistry;
use crate::inbox::InboxStore;
use crate::jobs::{Job, JobError, JobOutcome, JobRegistry};
use crate::outbox::{OutboxMessage, OutboxStore};
use crate::signer;

use super::crypto;
use super::transport::WebhookTransport;

/// Dispatch key for webhook delivery jobs.
pub const DELIVERY_JOB_NAME: &str = "webhook.deliver";

/// HMAC signature of the event object (`v1=<hex>`).
pub const HEADER_SIGNATURE: &str = "X-Signature";
/// Signature algorithm identifier.
pub const HEADER_SIGNATURE_ALG: &str = "X-Signature-Alg";
/// Signature scheme version.
pub const HEADER_SIGNATURE_VERSION: &str = "X-Signature-Version";
/// Outbox message id; stable across retries, usable for receiver-side dedup.
pub const HEADER_EVENT_ID: &str = "X-Event-Id";
/// Event topic.
pub const HEADER_TOPIC: &str = "X-Topic";
/// 1-based delivery attempt number.
pub const HEADER_ATTEMPT: &str = "X-Attempt";
/// Subscription id the delivery is addressed to.
pub const HEADER_SUBSCRIPTION: &str = "X-Webhook-Subscription";
/// Producer-declared payload schema version.
pub const HEADER_PAYLOAD_VERSION: &str = "X-Payload-Version";

/// Receiver statuses worth retrying: timeouts, throttling, server errors.
/// Every other non-`2xx` is a contract-level rejection and retrying it
/// cannot help.
const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429) || status >= 500
}

/// Executes `webhook.deliver` jobs.
pub struct DeliveryHandler {
    outbox: Arc<dyn OutboxStore>,
    inbox: Arc<dyn InboxStore>,
    transport: Arc<dyn WebhookTransport>,
    breakers: Arc<CircuitBreakerRegistry>,
    encryption_key: Vec<u8>,
    dedup_ttl_seconds: u64,
}

impl DeliveryHandler {
    /// Create a handler over the given stores and transport.
    #[must_use]
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        inbox: Arc<dyn InboxStore>,
        transport: Arc<dyn WebhookTransport>,
        breakers: Arc<CircuitBreakerRegistry>,
        encryption_key: Vec<u8>,
        dedup_ttl_seconds: u64,
    ) -> Self {
        Self {
            outbox,
            inbox,
            transport,
            breakers,
            encryption_key,
            dedup_ttl_seconds,
        }
    }

    /// Bind this handler to [`DELIVERY_JOB_NAME`] on a registry.
    pub fn register_on(self: &Arc<Self>, registry: &JobRegistry) {
        let handler = Arc::clone(self);
        registry.register(DELIVERY_JOB_NAME, move |job| {
            let handler = Arc::clone(&handler);
            async move { handler.handle(job).await }
        });
    }

    /// Deliver the outbox message referenced by `job.payload.outbox_id`.
    pub async fn handle(&self, job: Job) -> Result<JobOutcome, JobError> {
        let outbox_id = job
            .payload
            .get("outbox_id")
            .and_then(Value::as_u64)
            .ok_or_else(|| JobError::Fatal("delivery job payload missing outbox_id".to_string()))?;

        let message = self
            .outbox
            .get(outbox_id)
            .await
            .ok_or_else(|| JobError::Fatal(format!("outbox message {outbox_id} not found")))?;

        if message.processed_at.is_some() {
            return Ok(JobOutcome::with_message("already delivered"));
        }

        let dedup_key = format!("webhook:{outbox_id}");
        if self.inbox.is_marked(&dedup_key).await {
            // A concurrent dispatch already delivered this message but its
            // mark_processed may not have landed yet.
            self.outbox.mark_processed(outbox_id).await;
            return Ok(JobOutcome::with_message("duplicate dispatch suppressed"));
        }

        let target = DeliveryTarget::from_message(&message)?;
        let secret = crypto::decrypt_secret(&target.sealed_secret, &self.encryption_key)
            .map_err(|err| JobError::Fatal(format!("cannot open subscription secret: {err}")))?;

        // The body on the wire is byte-identical to what the signature
        // covers, so receivers verify against the raw request body.
        let signature = signer::sign(&secret, target.event);
        let body = signer::canonical_json(target.event);
        let attempt = job.attempts + 1;

        let headers = vec![
            (HEADER_SIGNATURE, signature),
            (HEADER_SIGNATURE_ALG, signer::SIGNATURE_ALGORITHM.to_string()),
            (HEADER_SIGNATURE_VERSION, "v1".to_string()),
            (HEADER_EVENT_ID, outbox_id.to_string()),
            (HEADER_TOPIC, message.topic.clone()),
            (HEADER_ATTEMPT, attempt.to_string()),
            (HEADER_SUBSCRIPTION, target.subscription_id.to_string()),
            (HEADER_PAYLOAD_VERSION, target.version.to_string()),
        ];

        let breaker = self.breakers.get_or_create(target.url);
        // A rejected call never reached the receiver: no outbox attempt is
        // recorded and the breaker's failure count is untouched.
        let permit = breaker
            .try_acquire()
            .map_err(|err| JobError::Retryable(err.to_string()))?;

        let response = match self.transport.post(target.url, &headers, body).await {
            Ok(response) => response,
            Err(err) => {
                permit.failure();
                self.outbox.mark_failed(outbox_id).await;
                return Err(JobError::Retryable(format!("transport failure: {err}")));
            }
        };

        if response.is_success() {
            permit.success();
            if !self.inbox.mark_if_new(&dedup_key, self.dedup_ttl_seconds).await {
                tracing::warn!(
                    target: "hookrelay_webhooks",
                    outbox_id,
                    "Delivery raced a duplicate; receiver saw it at least twice"
                );
            }
            self.outbox.mark_processed(outbox_id).await;
            return Ok(JobOutcome::with_message(format!(
                "delivered to {} with status {}",
                target.url, response.status
            )));
        }

        if is_retryable_status(response.status) {
            permit.failure();
            self.outbox.mark_failed(outbox_id).await;
            return Err(JobError::Retryable(format!(
                "receiver responded {}",
                response.status
            )));
        }

        // Contract-level rejection. The receiver answered, so the breaker
        // permit is released without counting either way.
        drop(permit);
        self.outbox.mark_failed(outbox_id).await;
        Err(JobError::Fatal(format!(
            "receiver rejected delivery with {}",
            response.status
        )))
    }
}

/// Borrowed view of the envelope fields a delivery needs.
struct DeliveryTarget<'a> {
    event: &'a Value,
    url: &'a str,
    sealed_secret: &'a str,
    subscription_id: &'a str,
    version: u64,
}

impl<'a> DeliveryTarget<'a> {
    /// A malformed envelope is fatal: it will not deserialize better on
    /// retry.
    fn from_message(message: &'a OutboxMessage) -> Result<Self, JobError> {
        let event = message
            .payload
            .get("event")
            .ok_or_else(|| JobError::Fatal("envelope missing event object".to_string()))?;
        let subscription = message
            .payload
            .get("subscription")
            .ok_or_else(|| JobError::Fatal("envelope missing subscription snapshot".to_string()))?;

        let url = subscription
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| JobError::Fatal("subscription snapshot missing url".to_string()))?;
        let sealed_secret = subscription
            .get("secret")
            .and_then(Value::as_str)
            .ok_or_else(|| JobError::Fatal("subscription snapshot missing secret".to_string()))?;
        let subscription_id = subscription
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let version = event.get("version").and_then(Value::as_u64).unwrap_or(1);

        Ok(Self {
            event,
            url,
            sealed_secret,
            subscription_id,
            version,
        })
    }
}
