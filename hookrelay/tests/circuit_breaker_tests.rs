//! Breaker behavior under a dead receiver: the circuit opens after the
//! failure threshold, rejections stop traffic to that destination, and
//! other destinations stay unaffected.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{directory_with, relay_with, MockTransport};
use hookrelay::prelude::*;

#[tokio::test]
async fn repeated_failures_open_the_destination_breaker() {
    let directory = directory_with(&[("order.created", "https://dead.example/hooks", "whsec_a")]);
    let transport = Arc::new(MockTransport::new());
    transport.script("https://dead.example/hooks", &[500; 20]);
    let relay = relay_with(directory, Arc::clone(&transport)).await;

    relay.publish("order.created", json!({}), 1).await.expect("publishes");

    // Default threshold is five consecutive failures; once open, further
    // dispatches are rejected before any request is made.
    for _ in 0..5 {
        relay.tick().await;
    }
    assert_eq!(transport.request_count(), 5);

    let breaker = relay.breakers().get_or_create("https://dead.example/hooks");
    assert_eq!(breaker.state(), CircuitState::Open);

    // No further traffic reaches the destination.
    relay.tick().await;
    assert_eq!(transport.request_count(), 5);
}

#[tokio::test]
async fn rejections_do_not_count_as_delivery_attempts() {
    let directory = directory_with(&[("order.created", "https://dead.example/hooks", "whsec_a")]);
    let transport = Arc::new(MockTransport::new());
    transport.script("https://dead.example/hooks", &[500; 20]);
    let relay = relay_with(directory, Arc::clone(&transport)).await;

    let outbox_id = relay
        .publish("order.created", json!({}), 1)
        .await
        .expect("publishes")
        .expect("one subscriber");

    for _ in 0..5 {
        relay.tick().await;
    }
    let attempts_at_open = relay.outbox().get(outbox_id).await.expect("kept").attempts;

    relay.tick().await;
    // The rejected dispatch recorded no new attempt against the message.
    assert_eq!(
        relay.outbox().get(outbox_id).await.expect("kept").attempts,
        attempts_at_open
    );

    let breaker = relay.breakers().get_or_create("https://dead.example/hooks");
    let stats = breaker.stats();
    assert_eq!(stats.failed_calls, 5);
    assert!(stats.rejected_calls >= 1);
}

#[tokio::test]
async fn an_open_breaker_does_not_affect_other_destinations() {
    let directory = directory_with(&[
        ("order.created", "https://dead.example/hooks", "whsec_a"),
        ("order.created", "https://fine.example/hooks", "whsec_b"),
    ]);
    let transport = Arc::new(MockTransport::new());
    transport.script("https://dead.example/hooks", &[500; 20]);
    let relay = relay_with(directory, Arc::clone(&transport)).await;

    relay.publish("order.created", json!({}), 1).await.expect("publishes");
    relay.tick().await;

    // The healthy destination's message was confirmed on the first pass.
    assert_eq!(transport.requests_to("https://fine.example/hooks").len(), 1);
    assert_eq!(relay.outbox().list_unprocessed(10).await.len(), 1);

    // The dead destination's breaker opens; the healthy one is untouched
    // because breakers are keyed per destination.
    for _ in 0..6 {
        relay.tick().await;
    }
    let dead = relay.breakers().get_or_create("https://dead.example/hooks");
    let fine = relay.breakers().get_or_create("https://fine.example/hooks");
    assert_eq!(dead.state(), CircuitState::Open);
    assert_eq!(fine.state(), CircuitState::Closed);
    assert_eq!(transport.requests_to("https://fine.example/hooks").len(), 1);
}

#[tokio::test]
async fn recovered_receiver_closes_the_breaker_through_half_open_probes() {
    let directory = directory_with(&[("order.created", "https://flaky.example/hooks", "whsec_a")]);
    let transport = Arc::new(MockTransport::new());
    transport.script("https://flaky.example/hooks", &[500, 500, 500, 500, 500]);

    let mut config = RelayConfig::default();
    config.queue.base_delay_seconds = 0;
    config.queue.max_delay_seconds = 0;
    config.queue.jitter = false;
    config.queue.max_attempts = 20;
    // Zero recovery timeout: the breaker is probe-eligible immediately
    // after opening, so the test needs no sleeps.
    config.breaker.recovery_timeout_secs = 0;
    config.breaker.success_threshold = 2;

    let relay = RelayBuilder::new(config)
        .with_encryption_key(common::ENCRYPTION_KEY.to_vec())
        .with_directory(directory)
        .with_transport(Arc::clone(&transport) as Arc<dyn WebhookTransport>)
        .build()
        .await
        .expect("builds");

    relay.publish("order.created", json!({}), 1).await.expect("publishes");
    relay.publish("order.created", json!({}), 1).await.expect("publishes");

    // Enough ticks to burn through the failures, probe, and close.
    for _ in 0..12 {
        relay.tick().await;
    }

    let breaker = relay.breakers().get_or_create("https://flaky.example/hooks");
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(relay.outbox().list_unprocessed(10).await.is_empty());
}
