//! Webhook-specific error types.

use thiserror::Error;

use super::subscription::SubscriptionError;

/// Errors raised on the webhook publish path.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Secret encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Subscription lookup failed.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}
