//! Layered configuration: compiled defaults, then `hookrelay.toml`, then
//! `HOOKRELAY_*` environment variables.
//!
//! Every section is optional at every layer; unset fields fall back to the
//! compiled defaults, so an empty file and no environment is a valid,
//! fully-specified configuration.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::breaker::CircuitBreakerConfig;
use crate::jobs::RetryPolicy;
use crate::outbox::DrainPolicy;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A layer failed to parse or a field failed to deserialize.
    #[error(transparent)]
    Load(#[from] Box<figment::Error>),

    /// The secret-encryption key is not exactly 32 bytes.
    #[error("encryption key must be exactly 32 bytes, got {0}")]
    InvalidEncryptionKey(usize),

    /// The default HTTP transport could not be constructed.
    #[error("failed to initialize HTTP transport: {0}")]
    Transport(String),

    /// A non-memory backend was configured without a matching store
    /// factory being supplied to the builder.
    #[error("store backend '{backend}' requires a {store} store factory")]
    MissingStoreFactory {
        /// The configured backend.
        backend: &'static str,
        /// Which store the factory was missing for.
        store: &'static str,
    },
}

/// Which backend the stores use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-process stores; state is lost on restart.
    #[default]
    Memory,
    /// External Redis-backed stores, supplied via builder factories.
    Redis,
}

impl StoreBackend {
    /// Stable name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

/// `[queue]` section: retry budget and backoff shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Attempts before a job is dead-lettered.
    pub max_attempts: u32,
    /// First retry delay in seconds.
    pub base_delay_seconds: u64,
    /// Ceiling on any computed delay.
    pub max_delay_seconds: u64,
    /// Add random jitter to each delay.
    pub jitter: bool,
    /// Per-dispatch handler timeout; `None` disables cancellation.
    pub dispatch_timeout_secs: Option<u64>,
    /// Backoff used when `fail` is called without an override.
    pub default_backoff_seconds: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_seconds: policy.base_delay_seconds,
            max_delay_seconds: policy.max_delay_seconds,
            jitter: policy.jitter,
            dispatch_timeout_secs: policy.dispatch_timeout_secs,
            default_backoff_seconds: 30,
        }
    }
}

impl QueueSettings {
    /// The retry policy this section describes.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay_seconds: self.base_delay_seconds,
            max_delay_seconds: self.max_delay_seconds,
            jitter: self.jitter,
            dispatch_timeout_secs: self.dispatch_timeout_secs,
        }
    }
}

/// `[breaker]` section: thresholds shared by every per-destination breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Seconds an open breaker rejects before probing.
    pub recovery_timeout_secs: u64,
    /// Concurrent probes allowed while half-open.
    pub half_open_max_calls: u32,
    /// Probe successes required to close again.
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let config = CircuitBreakerConfig::default();
        Self {
            failure_threshold: config.failure_threshold,
            recovery_timeout_secs: config.recovery_timeout_secs,
            half_open_max_calls: config.half_open_max_calls,
            success_threshold: config.success_threshold,
        }
    }
}

impl BreakerSettings {
    /// The breaker configuration this section describes.
    #[must_use]
    pub const fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout_secs: self.recovery_timeout_secs,
            half_open_max_calls: self.half_open_max_calls,
            success_threshold: self.success_threshold,
        }
    }
}

/// `[signer]` section: signature verification window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerSettings {
    /// Maximum accepted age, in seconds, of a signed timestamp.
    pub tolerance_seconds: i64,
}

impl Default for SignerSettings {
    fn default() -> Self {
        Self {
            tolerance_seconds: 300,
        }
    }
}

/// `[outbox]` section: backend selection and drain behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxSettings {
    /// Store backend for the outbox, inbox, and job queue.
    pub backend: StoreBackend,
    /// Connection URL for non-memory backends.
    pub connection_url: Option<String>,
    /// Topic allow-list for the drain; empty means all topics.
    pub drain_topics: Vec<String>,
    /// How the drain treats already-attempted messages.
    pub drain_policy: DrainPolicy,
    /// TTL for delivery dedup keys, in seconds.
    pub dedup_ttl_seconds: u64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            connection_url: None,
            drain_topics: Vec::new(),
            drain_policy: DrainPolicy::default(),
            dedup_ttl_seconds: 86_400,
        }
    }
}

/// `[scheduler]` section: tick cadence for the background loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Seconds between cooperative ticks.
    pub tick_seconds: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { tick_seconds: 1 }
    }
}

/// Root configuration for the relay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Retry budget and backoff shape.
    pub queue: QueueSettings,
    /// Circuit breaker thresholds.
    pub breaker: BreakerSettings,
    /// Signature verification window.
    pub signer: SignerSettings,
    /// Backend selection and drain behavior.
    pub outbox: OutboxSettings,
    /// Tick cadence.
    pub scheduler: SchedulerSettings,
}

impl RelayConfig {
    /// Load from `hookrelay.toml` and `HOOKRELAY_*` environment variables,
    /// layered over compiled defaults.
    ///
    /// Nested keys in the environment use `__` as the separator, e.g.
    /// `HOOKRELAY_QUEUE__MAX_ATTEMPTS=10`.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("hookrelay.toml")
    }

    /// Like [`Self::load`] with an explicit file path.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("HOOKRELAY_").split("__"))
            .extract()
            .map_err(Box::new)?;
        tracing::debug!(
            target: "hookrelay_config",
            backend = config.outbox.backend.as_str(),
            max_attempts = config.queue.max_attempts,
            "Configuration loaded"
        );
        Ok(config)
    }
}
