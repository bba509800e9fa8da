//! HTTP transport seam for webhook deliveries.
//!
//! The delivery handler only ever needs the response status code, so the
//! trait surface is a single `post` returning [`TransportResponse`]. Tests
//! substitute a scripted transport; production uses [`ReqwestTransport`].

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// What the delivery handler needs to know about a receiver response.
#[derive(Debug, Clone, Copy)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
}

impl TransportResponse {
    /// Whether the status is in the `2xx` range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Errors raised below the HTTP layer: DNS, connect, TLS, timeouts.
///
/// A response with a non-success status is NOT a transport error; status
/// interpretation belongs to the delivery handler.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Build(String),

    /// The request never produced a response.
    #[error("request to {url} failed: {message}")]
    Request {
        /// Destination URL.
        url: String,
        /// Underlying failure.
        message: String,
    },
}

/// Outbound POST seam.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST `body` to `url` with the given headers. `Content-Type` is
    /// always `application/json`; `headers` carries the signature and
    /// delivery metadata.
    async fn post(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        body: String,
    ) -> Result<TransportResponse, TransportError>;
}

/// Production transport backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client with delivery-appropriate defaults: 10s total
    /// timeout, no redirect following (a redirected delivery would re-send
    /// the signed body to an unverified location).
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("hookrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| TransportError::Build(err.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn post(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        body: String,
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|err| TransportError::Request {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        Ok(TransportResponse {
            status: response.status().as_u16(),
        })
    }
}
