//! Composition root: wires stores, dispatcher, worker, and scheduler into
//! one running relay.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::breaker::CircuitBreakerRegistry;
use crate::config::{ConfigError, RelayConfig, StoreBackend};
use crate::inbox::{InMemoryInboxStore, InboxStore};
use crate::jobs::{InMemoryJobQueue, JobQueue, JobRegistry, Worker};
use crate::outbox::{InMemoryOutboxStore, OutboxStore};
use crate::scheduler::Scheduler;
use crate::webhooks::{
    DeliveryHandler, ReqwestTransport, SubscriptionDirectory, WebhookError, WebhookService,
    WebhookTransport,
};

const INBOX_PURGE_INTERVAL_SECS: u64 = 300;

/// How a store reaches the builder: an existing instance, or a factory
/// invoked once during wiring.
///
/// The factory form exists for backends whose construction needs to happen
/// at build time (connection pools, handles tied to the runtime); memory
/// stores are usually passed as literals.
pub enum StoreProvider<S: ?Sized> {
    /// Use this instance as-is.
    Literal(Arc<S>),
    /// Call once at build time to produce the instance.
    Factory(Box<dyn FnOnce() -> Arc<S> + Send>),
}

impl<S: ?Sized> StoreProvider<S> {
    fn resolve(self) -> Arc<S> {
        match self {
            Self::Literal(store) => store,
            Self::Factory(make) => make(),
        }
    }
}

impl<S: ?Sized> std::fmt::Debug for StoreProvider<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal(_) => f.write_str("StoreProvider::Literal"),
            Self::Factory(_) => f.write_str("StoreProvider::Factory"),
        }
    }
}

/// Builder for [`Relay`].
///
/// Everything except the encryption key has a default: memory stores, an
/// empty in-memory directory, and a pooled HTTP transport.
pub struct RelayBuilder {
    config: RelayConfig,
    encryption_key: Option<Vec<u8>>,
    directory: Option<Arc<dyn SubscriptionDirectory>>,
    transport: Option<Arc<dyn WebhookTransport>>,
    outbox: Option<StoreProvider<dyn OutboxStore>>,
    inbox: Option<StoreProvider<dyn InboxStore>>,
    queue: Option<StoreProvider<dyn JobQueue>>,
}

impl RelayBuilder {
    /// Start a builder from a loaded configuration.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            encryption_key: None,
            directory: None,
            transport: None,
            outbox: None,
            inbox: None,
            queue: None,
        }
    }

    /// Set the 32-byte key used to seal subscription secrets in the
    /// outbox. Length is validated at build time.
    #[must_use]
    pub fn with_encryption_key(mut self, key: Vec<u8>) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// Use this subscription directory.
    #[must_use]
    pub fn with_directory(mut self, directory: Arc<dyn SubscriptionDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Use this transport instead of the default `reqwest` client.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn WebhookTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Supply the outbox store.
    #[must_use]
    pub fn with_outbox(mut self, provider: StoreProvider<dyn OutboxStore>) -> Self {
        self.outbox = Some(provider);
        self
    }

    /// Supply the inbox store.
    #[must_use]
    pub fn with_inbox(mut self, provider: StoreProvider<dyn InboxStore>) -> Self {
        self.inbox = Some(provider);
        self
    }

    /// Supply the job queue.
    #[must_use]
    pub fn with_queue(mut self, provider: StoreProvider<dyn JobQueue>) -> Self {
        self.queue = Some(provider);
        self
    }

    /// Wire everything together.
    ///
    /// With the memory backend, missing stores fall back to in-process
    /// implementations. Non-memory backends have no compiled-in default,
    /// so every store must arrive through the builder or this fails with
    /// [`ConfigError::MissingStoreFactory`].
    pub async fn build(self) -> Result<Relay, ConfigError> {
        let config = self.config;

        let key = self.encryption_key.unwrap_or_default();
        if key.len() != 32 {
            return Err(ConfigError::InvalidEncryptionKey(key.len()));
        }

        let backend = config.outbox.backend;
        let outbox = Self::resolve_store(self.outbox, backend, "outbox", || {
            Arc::new(InMemoryOutboxStore::new(config.outbox.drain_policy)) as Arc<dyn OutboxStore>
        })?;
        let inbox = Self::resolve_store(self.inbox, backend, "inbox", || {
            Arc::new(InMemoryInboxStore::new()) as Arc<dyn InboxStore>
        })?;
        let queue = Self::resolve_store(self.queue, backend, "queue", || {
            Arc::new(InMemoryJobQueue::new(config.queue.default_backoff_seconds))
                as Arc<dyn JobQueue>
        })?;

        let directory = self
            .directory
            .unwrap_or_else(|| Arc::new(crate::webhooks::InMemoryDirectory::new()));
        let transport: Arc<dyn WebhookTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::new().map_err(|err| ConfigError::Transport(err.to_string()))?,
            ),
        };

        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker.breaker_config()));
        let registry = Arc::new(JobRegistry::new());

        let handler = Arc::new(DeliveryHandler::new(
            Arc::clone(&outbox),
            Arc::clone(&inbox),
            transport,
            Arc::clone(&breakers),
            key.clone(),
            config.outbox.dedup_ttl_seconds,
        ));
        handler.register_on(&registry);

        let service = Arc::new(WebhookService::new(
            Arc::clone(&outbox),
            directory,
            key,
            config.outbox.drain_topics.clone(),
        ));

        let worker = Arc::new(Worker::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            config.queue.retry_policy(),
        ));

        let scheduler = Arc::new(Scheduler::new());
        {
            let service = Arc::clone(&service);
            let queue = Arc::clone(&queue);
            scheduler
                .add_task("outbox-drain", 0, move || {
                    let service = Arc::clone(&service);
                    let queue = Arc::clone(&queue);
                    async move {
                        service.drain_once(queue.as_ref()).await;
                    }
                })
                .await;
        }
        {
            let worker = Arc::clone(&worker);
            scheduler
                .add_task("worker-pump", 0, move || {
                    let worker = Arc::clone(&worker);
                    async move {
                        worker.run_pending().await;
                    }
                })
                .await;
        }
        {
            let inbox = Arc::clone(&inbox);
            scheduler
                .add_task("inbox-purge", INBOX_PURGE_INTERVAL_SECS, move || {
                    let inbox = Arc::clone(&inbox);
                    async move {
                        inbox.purge_expired().await;
                    }
                })
                .await;
        }

        tracing::info!(
            target: "hookrelay",
            backend = backend.as_str(),
            max_attempts = config.queue.max_attempts,
            tick_seconds = config.scheduler.tick_seconds,
            "Relay wired"
        );

        Ok(Relay {
            config,
            outbox,
            inbox,
            queue,
            registry,
            breakers,
            scheduler,
            service,
        })
    }

    fn resolve_store<S: ?Sized>(
        provider: Option<StoreProvider<S>>,
        backend: StoreBackend,
        store: &'static str,
        default: impl FnOnce() -> Arc<S>,
    ) -> Result<Arc<S>, ConfigError> {
        match provider {
            Some(provider) => Ok(provider.resolve()),
            None if backend == StoreBackend::Memory => Ok(default()),
            None => Err(ConfigError::MissingStoreFactory {
                backend: backend.as_str(),
                store,
            }),
        }
    }
}

/// A fully wired relay: publish in, signed deliveries out.
pub struct Relay {
    config: RelayConfig,
    outbox: Arc<dyn OutboxStore>,
    inbox: Arc<dyn InboxStore>,
    queue: Arc<dyn JobQueue>,
    registry: Arc<JobRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    scheduler: Arc<Scheduler>,
    service: Arc<WebhookService>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("backend", &self.config.outbox.backend.as_str())
            .field("drain_topics", &self.config.outbox.drain_topics)
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Record an event for delivery to every subscriber of `topic`.
    ///
    /// Returns once the event is durably in the outbox; delivery happens
    /// in the background.
    pub async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        version: u32,
    ) -> Result<Option<u64>, WebhookError> {
        self.service.publish(topic, payload, version).await
    }

    /// Make one cooperative pass: drain the outbox, pump the worker, run
    /// any due maintenance. Useful in tests and manual drivers.
    pub async fn tick(&self) -> usize {
        self.scheduler.tick().await
    }

    /// Drive the pipeline on the configured cadence until `shutdown` flips
    /// to `true` or its sender drops.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let tick_every = Duration::from_secs(self.config.scheduler.tick_seconds.max(1));
        self.scheduler.run(tick_every, shutdown).await;
    }

    /// The loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// The outbox store, for inspection queries.
    #[must_use]
    pub fn outbox(&self) -> Arc<dyn OutboxStore> {
        Arc::clone(&self.outbox)
    }

    /// The inbox store.
    #[must_use]
    pub fn inbox(&self) -> Arc<dyn InboxStore> {
        Arc::clone(&self.inbox)
    }

    /// The job queue.
    #[must_use]
    pub fn queue(&self) -> Arc<dyn JobQueue> {
        Arc::clone(&self.queue)
    }

    /// The dispatch registry, for registering additional job handlers.
    #[must_use]
    pub fn registry(&self) -> Arc<JobRegistry> {
        Arc::clone(&self.registry)
    }

    /// Per-destination circuit breakers, for status surfaces.
    #[must_use]
    pub fn breakers(&self) -> Arc<CircuitBreakerRegistry> {
        Arc::clone(&self.breakers)
    }
}
