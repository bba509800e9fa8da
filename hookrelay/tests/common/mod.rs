//! Shared fixtures for integration tests.

// Each test binary compiles this module separately and none uses all of it.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use hookrelay::prelude::*;

/// 32-byte key used across the integration suite.
pub const ENCRYPTION_KEY: [u8; 32] = [0x42; 32];

/// One request captured by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Scripted transport: per-URL response scripts plus full request capture.
///
/// Each URL has a queue of scripted results; when the queue empties the
/// transport answers `200`. URLs with no script answer `200` from the start.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<Result<u16, String>>>>,
    requests: Mutex<Vec<CapturedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next responses for `url`, in order.
    pub fn script(&self, url: &str, statuses: &[u16]) {
        self.scripts
            .lock()
            .entry(url.to_string())
            .or_default()
            .extend(statuses.iter().map(|s| Ok(*s)));
    }

    /// Script a connection-level failure for `url`.
    pub fn script_failure(&self, url: &str, message: &str) {
        self.scripts
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(Err(message.to_string()));
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<CapturedRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl WebhookTransport for MockTransport {
    async fn post(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        body: String,
    ) -> Result<TransportResponse, TransportError> {
        self.requests.lock().push(CapturedRequest {
            url: url.to_string(),
            headers: headers.to_vec(),
            body,
        });
        let scripted = self.scripts.lock().get_mut(url).and_then(VecDeque::pop_front);
        match scripted {
            Some(Ok(status)) => Ok(TransportResponse { status }),
            Some(Err(message)) => Err(TransportError::Request {
                url: url.to_string(),
                message,
            }),
            None => Ok(TransportResponse { status: 200 }),
        }
    }
}

/// A directory pre-loaded with the given `(topic, url, secret)` rows.
pub fn directory_with(rows: &[(&str, &str, &str)]) -> Arc<InMemoryDirectory> {
    let directory = Arc::new(InMemoryDirectory::new());
    for (topic, url, secret) in rows {
        directory.add(Subscription::new(topic, url, secret));
    }
    directory
}

/// A relay over memory stores, the given directory, and the given mock
/// transport, with retry delays zeroed so retried jobs are due on the next
/// tick.
pub async fn relay_with(
    directory: Arc<InMemoryDirectory>,
    transport: Arc<MockTransport>,
) -> Relay {
    let mut config = RelayConfig::default();
    config.queue.base_delay_seconds = 0;
    config.queue.max_delay_seconds = 0;
    config.queue.jitter = false;

    RelayBuilder::new(config)
        .with_encryption_key(ENCRYPTION_KEY.to_vec())
        .with_directory(directory)
        .with_transport(transport)
        .build()
        .await
        .expect("relay builds over memory stores")
}
