//! Retry semantics through the whole pipeline: transient failures re-enter
//! the queue with backoff, fatal ones dead-letter, and the receiver's
//! single success is recorded exactly once.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{directory_with, relay_with, MockTransport, ENCRYPTION_KEY};
use hookrelay::prelude::*;
use hookrelay::webhooks::HEADER_ATTEMPT;

#[tokio::test]
async fn transient_failure_is_retried_until_the_receiver_recovers() {
    let directory = directory_with(&[("order.created", "https://flaky.example/hooks", "whsec_a")]);
    let transport = Arc::new(MockTransport::new());
    transport.script("https://flaky.example/hooks", &[500, 503]);
    let relay = relay_with(directory, Arc::clone(&transport)).await;

    let outbox_id = relay
        .publish("order.created", json!({"order_id": 42}), 1)
        .await
        .expect("publishes")
        .expect("one subscriber");

    // The fixture zeroes retry backoff, so a single pass pumps the job
    // through 500, 503, and the recovering 200.
    relay.tick().await;

    let message = relay.outbox().get(outbox_id).await.expect("kept");
    assert!(message.processed_at.is_some());
    // Two failed deliveries counted before the success.
    assert_eq!(message.attempts, 2);

    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    let attempts: Vec<_> = requests.iter().filter_map(|r| r.header(HEADER_ATTEMPT)).collect();
    assert_eq!(attempts, ["1", "2", "3"]);
    assert!(relay.queue().is_empty().await);
}

#[tokio::test]
async fn connection_failures_are_transient() {
    let directory = directory_with(&[("order.created", "https://down.example/hooks", "whsec_a")]);
    let transport = Arc::new(MockTransport::new());
    transport.script_failure("https://down.example/hooks", "connection refused");
    let relay = relay_with(directory, Arc::clone(&transport)).await;

    let outbox_id = relay
        .publish("order.created", json!({}), 1)
        .await
        .expect("publishes")
        .expect("one subscriber");

    relay.tick().await;

    let message = relay.outbox().get(outbox_id).await.expect("kept");
    assert!(message.processed_at.is_some());
    assert_eq!(message.attempts, 1);
    assert_eq!(transport.request_count(), 2);
}

#[tokio::test]
async fn contract_rejection_dead_letters_after_one_attempt() {
    let directory = directory_with(&[("order.created", "https://gone.example/hooks", "whsec_a")]);
    let transport = Arc::new(MockTransport::new());
    transport.script("https://gone.example/hooks", &[404, 404, 404]);
    let relay = relay_with(directory, Arc::clone(&transport)).await;

    let outbox_id = relay
        .publish("order.created", json!({}), 1)
        .await
        .expect("publishes")
        .expect("one subscriber");

    relay.tick().await;
    relay.tick().await;
    relay.tick().await;

    // One request, then the job left circulation for good.
    assert_eq!(transport.request_count(), 1);
    assert!(relay.queue().is_empty().await);

    let failed = relay.outbox().list_failed(10).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, outbox_id);
}

#[tokio::test]
async fn retry_budget_exhaustion_dead_letters_the_job() {
    let directory = directory_with(&[("order.created", "https://dead.example/hooks", "whsec_a")]);
    let transport = Arc::new(MockTransport::new());
    transport.script("https://dead.example/hooks", &[500; 10]);

    let mut config = RelayConfig::default();
    config.queue.max_attempts = 2;
    config.queue.base_delay_seconds = 0;
    config.queue.max_delay_seconds = 0;
    config.queue.jitter = false;
    let relay = RelayBuilder::new(config)
        .with_encryption_key(ENCRYPTION_KEY.to_vec())
        .with_directory(directory)
        .with_transport(Arc::clone(&transport) as Arc<dyn WebhookTransport>)
        .build()
        .await
        .expect("builds");

    relay.publish("order.created", json!({}), 1).await.expect("publishes");

    for _ in 0..5 {
        relay.tick().await;
    }

    // Exactly max_attempts requests; the job is gone, the message remains
    // unprocessed and queryable.
    assert_eq!(transport.request_count(), 2);
    assert!(relay.queue().is_empty().await);
    assert_eq!(relay.outbox().list_failed(10).await.len(), 1);
}

#[tokio::test]
async fn two_subscribers_each_recover_after_one_failed_attempt() {
    let directory = directory_with(&[
        ("order.created", "https://a.example/hooks", "whsec_a"),
        ("order.created", "https://b.example/hooks", "whsec_b"),
    ]);
    let transport = Arc::new(MockTransport::new());
    transport.script("https://a.example/hooks", &[500]);
    transport.script("https://b.example/hooks", &[500]);
    let relay = relay_with(directory, Arc::clone(&transport)).await;

    relay
        .publish("order.created", json!({"id": "o1"}), 1)
        .await
        .expect("publishes");

    // Exactly two outbox messages, one per subscriber.
    assert_eq!(relay.outbox().list_unprocessed(10).await.len(), 2);

    // Under the fixture's zero backoff one pass is enough: each delivery
    // fails with 500 and its retry succeeds within the same pass.
    relay.tick().await;

    assert!(relay.outbox().list_unprocessed(10).await.is_empty());
    assert_eq!(transport.requests_to("https://a.example/hooks").len(), 2);
    assert_eq!(transport.requests_to("https://b.example/hooks").len(), 2);
    assert!(relay.queue().is_empty().await);
}

#[tokio::test]
async fn success_is_recorded_exactly_once_per_message() {
    let directory = directory_with(&[("order.created", "https://a.example/hooks", "whsec_a")]);
    let transport = Arc::new(MockTransport::new());
    let relay = relay_with(directory, Arc::clone(&transport)).await;

    let outbox_id = relay
        .publish("order.created", json!({}), 1)
        .await
        .expect("publishes")
        .expect("one subscriber");
    relay.tick().await;

    let first = relay
        .outbox()
        .get(outbox_id)
        .await
        .expect("kept")
        .processed_at
        .expect("processed");

    // Further ticks and even a manually re-enqueued delivery job change
    // nothing: the processed check and the inbox mark short-circuit.
    let mut payload = JobPayload::new();
    payload.insert("outbox_id".to_string(), outbox_id.into());
    relay.queue().enqueue(DELIVERY_JOB_NAME, payload, 0).await;
    relay.tick().await;
    relay.tick().await;

    let message = relay.outbox().get(outbox_id).await.expect("kept");
    assert_eq!(message.processed_at, Some(first));
    assert_eq!(transport.request_count(), 1);
}
