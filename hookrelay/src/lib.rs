//! hookrelay: reliable event delivery for webhook producers
//!
//! This crate implements the durable half of a webhook system: the part that
//! guarantees an event, once published, is delivered to every subscriber at
//! least once, survives receiver outages, and never silently disappears.
//!
//! # Design Principles
//!
//! 1. **At-Least-Once, Idempotent Receipt**: the outbox keeps every event
//!    until a `2xx` confirms it; the inbox ledger makes duplicate dispatch
//!    harmless
//! 2. **Failure Isolation**: every destination sits behind its own circuit
//!    breaker so one dead receiver cannot starve the rest
//! 3. **Authenticated Deliveries**: every request carries a versioned
//!    HMAC-SHA256 signature verified with constant-time comparison
//! 4. **Explicit Retry Policy**: handlers return typed retryable/fatal
//!    results; the dispatcher never retries on its own
//!
//! # Pipeline
//!
//! ```text
//! publish(topic, payload)
//!     └─> OutboxStore (one durable message per subscriber)
//!           └─> Scheduler tick: drain task enqueues delivery jobs
//!                 └─> Worker: JobQueue::reserve_next + JobRegistry::dispatch
//!                       └─> delivery handler: sign, POST through the
//!                           CircuitBreaker, InboxStore::mark_if_new,
//!                           OutboxStore::mark_processed
//! ```
//!
//! Failed deliveries re-enter the queue with backoff; the outbox message is
//! only marked processed after a successful response.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hookrelay::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let directory = Arc::new(InMemoryDirectory::default());
//! directory.add(Subscription::new(
//!     "order.created",
//!     "https://receiver.example/hooks",
//!     "whsec_abc123",
//! ));
//!
//! let relay = RelayBuilder::new(RelayConfig::default())
//!     .with_directory(directory)
//!     .with_encryption_key(vec![0x42; 32])
//!     .build()
//!     .await?;
//!
//! relay.publish("order.created", json!({"id": "o1"}), 1).await?;
//! relay.tick().await; // drain + deliver
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `otel-metrics` - OpenTelemetry counters and histograms for the dispatch
//!   path (a tracing-based observer is always active)

// Lint configuration is handled at the workspace level in Cargo.toml
// Additional crate-specific allows:
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod breaker;
pub mod config;
pub mod inbox;
pub mod jobs;
pub mod observability;
pub mod outbox;
pub mod relay;
pub mod scheduler;
pub mod signer;
pub mod webhooks;

pub mod prelude {
    //! Convenience re-exports for common types and traits
    //!
    //! # Examples
    //!
    //! ```rust
    //! use hookrelay::prelude::*;
    //! ```

    pub use crate::breaker::{
        CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
        CircuitBreakerStats, CircuitState,
    };
    pub use crate::config::{ConfigError, RelayConfig, StoreBackend};
    pub use crate::inbox::{InMemoryInboxStore, InboxStore};
    pub use crate::jobs::{
        DispatchError, InMemoryJobQueue, Job, JobError, JobId, JobOutcome, JobPayload, JobQueue,
        JobRegistry, RetryPolicy, Worker,
    };
    pub use crate::outbox::{DrainPolicy, InMemoryOutboxStore, OutboxMessage, OutboxStore};
    pub use crate::relay::{Relay, RelayBuilder, StoreProvider};
    pub use crate::scheduler::Scheduler;
    pub use crate::webhooks::{
        DeliveryHandler, InMemoryDirectory, ReqwestTransport, Subscription, SubscriptionDirectory,
        SubscriptionError, TransportError, TransportResponse, WebhookError, WebhookService,
        WebhookTransport, DELIVERY_JOB_NAME,
    };
}
