//! Webhook publish path and delivery handler.
//!
//! [`WebhookService::publish`] fans an event out to every matching
//! subscriber by appending one outbox message per subscription, with the
//! subscription snapshot (url, topic, encrypted secret, id) embedded in the
//! payload. The drain task turns due messages into delivery jobs, and
//! [`DeliveryHandler`] executes them: sign, POST through the destination's
//! circuit breaker, record the idempotency mark, confirm the outbox message.
//!
//! Publish-side callers never see delivery failures; those surface through
//! logs, metrics, and the outbox inspection queries.

mod crypto;
mod delivery;
mod error;
mod service;
mod subscription;
mod transport;

pub use crypto::{decrypt_secret, encrypt_secret};
pub use delivery::{
    DeliveryHandler, DELIVERY_JOB_NAME, HEADER_ATTEMPT, HEADER_EVENT_ID, HEADER_PAYLOAD_VERSION,
    HEADER_SIGNATURE, HEADER_SIGNATURE_ALG, HEADER_SIGNATURE_VERSION, HEADER_SUBSCRIPTION,
    HEADER_TOPIC,
};
pub use error::WebhookError;
pub use service::WebhookService;
pub use subscription::{InMemoryDirectory, Subscription, SubscriptionDirectory, SubscriptionError};
pub use transport::{ReqwestTransport, TransportError, TransportResponse, WebhookTransport};
