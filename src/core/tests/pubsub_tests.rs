//! Publish/subscribe tests across agents.
//!
//! Tests cover:
//! - Delivery between neighbors
//! - Relay through nodes without subscribers
//! - Per-sender ordering
//! - Deduplication on cyclic topologies
//! - Close semantics
//! - Trust filtering
//! - Payload limits

mod common;

use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;

use swarmlink_core::contacts::TrustLevel;
use swarmlink_core::error::ErrorCode;
use swarmlink_core::gossip::MemoryNetwork;

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Delivery Tests
// ============================================================================

#[tokio::test]
async fn test_neighbor_receives_publish() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let b = common::joined(&network, &[&a]).await;

    let mut sub = b.subscribe("chat");
    assert!(common::wait_for_interest(&a, "chat").await);

    let id = a.publish("chat", &b"hello"[..]).await.unwrap();
    let message = tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap();

    assert_eq!(message.id, id);
    assert_eq!(message.payload, Bytes::from_static(b"hello"));
    assert_eq!(message.sender, a.agent_id());
    assert_eq!(message.origin, a.peer_id());
    assert_eq!(message.hops, 1);
}

#[tokio::test]
async fn test_independent_copies_per_subscription() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let b = common::joined(&network, &[&a]).await;

    let mut first = b.subscribe("chat");
    let mut second = b.subscribe("chat");
    assert!(common::wait_for_interest(&a, "chat").await);

    a.publish("chat", &b"x"[..]).await.unwrap();
    let m1 = tokio::time::timeout(WAIT, first.recv()).await.unwrap().unwrap();
    let m2 = tokio::time::timeout(WAIT, second.recv()).await.unwrap().unwrap();
    assert_eq!(m1.id, m2.id);
}

#[tokio::test]
async fn test_relay_through_uninterested_node() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let b = common::joined(&network, &[&a]).await;
    let c = common::joined(&network, &[&b]).await;

    let mut sub = c.subscribe("relay");
    assert!(common::wait_for_interest(&a, "relay").await);
    assert_eq!(b.pubsub().subscriber_count("relay"), 0);

    a.publish("relay", &b"far"[..]).await.unwrap();
    let message = tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(message.payload, Bytes::from_static(b"far"));
    assert_eq!(message.hops, 2);
    assert!(b.gossip_stats().relayed >= 1);
}

#[tokio::test]
async fn test_per_sender_order_is_preserved() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let b = common::joined(&network, &[&a]).await;

    let mut sub = b.subscribe("seq");
    assert!(common::wait_for_interest(&a, "seq").await);

    for i in 0..50u8 {
        a.publish("seq", vec![i]).await.unwrap();
    }
    for i in 0..50u8 {
        let message = tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(message.payload[0], i);
    }
}

#[tokio::test]
async fn test_triangle_delivers_once() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let b = common::joined(&network, &[&a]).await;
    let c = common::joined(&network, &[&a, &b]).await;

    let mut sub_b = b.subscribe("mesh");
    let mut sub_c = c.subscribe("mesh");
    assert!(common::wait_for_interest(&a, "mesh").await);
    let a_ref = &a;
    assert!(
        common::eventually(|| async move {
            a_ref
                .neighbors()
                .iter()
                .filter(|n| n.topics.contains("mesh"))
                .count()
                == 2
        })
        .await
    );

    a.publish("mesh", &b"once"[..]).await.unwrap();
    tokio::time::timeout(WAIT, sub_b.recv()).await.unwrap().unwrap();
    tokio::time::timeout(WAIT, sub_c.recv()).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sub_b.try_recv().unwrap().is_none());
    assert!(sub_c.try_recv().unwrap().is_none());
}

#[tokio::test]
async fn test_publish_without_subscribers_is_fine() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let _b = common::joined(&network, &[&a]).await;
    a.publish("nobody", Bytes::new()).await.unwrap();
    assert_eq!(a.gossip_stats().published, 1);
}

// ============================================================================
// Close Tests
// ============================================================================

#[tokio::test]
async fn test_subscribe_then_close_yields_nothing() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;

    let mut sub = a.subscribe("x");
    sub.close();
    a.publish("x", &b"late"[..]).await.unwrap();

    let err = sub.recv().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::SubscriptionClosed);

    let sub = a.subscribe("y");
    sub.close();
    let collected: Vec<_> = sub.into_stream().collect().await;
    assert!(collected.is_empty());
}

#[tokio::test]
async fn test_close_cancels_pending_recv() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let mut sub = a.subscribe("idle");
    let closer = sub.closer();

    let waiter = tokio::spawn(async move { sub.recv().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    closer.close();
    closer.close();

    let result = tokio::time::timeout(WAIT, waiter).await.unwrap().unwrap();
    assert_eq!(result.unwrap_err().code(), ErrorCode::SubscriptionClosed);
}

#[tokio::test]
async fn test_unsubscribe_withdraws_interest() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let b = common::joined(&network, &[&a]).await;

    let sub = b.subscribe("temp");
    assert!(common::wait_for_interest(&a, "temp").await);

    assert_eq!(b.unsubscribe("temp").unwrap(), 1);
    assert!(sub.is_closed());
    let a_ref = &a;
    assert!(
        common::eventually(|| async move {
            a_ref.neighbors().iter().all(|n| !n.topics.contains("temp"))
        })
        .await
    );
}

// ============================================================================
// Trust Tests
// ============================================================================

#[tokio::test]
async fn test_blocked_sender_is_dropped_and_not_relayed() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let b = common::joined(&network, &[&a]).await;
    let c = common::joined(&network, &[&b]).await;

    let mut at_b = b.subscribe("feed");
    let mut at_c = c.subscribe("feed");
    assert!(common::wait_for_interest(&a, "feed").await);
    b.contacts()
        .set_trust(a.agent_id(), TrustLevel::Blocked)
        .unwrap();

    a.publish("feed", &b"spam"[..]).await.unwrap();
    let b_ref = &b;
    assert!(common::eventually(|| async move { b_ref.gossip_stats().blocked == 1 }).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(at_b.try_recv().unwrap().is_none());
    assert!(at_c.try_recv().unwrap().is_none());
    assert_eq!(b.gossip_stats().relayed, 0);

    b.contacts().set_trust(a.agent_id(), TrustLevel::Known).unwrap();
    a.publish("feed", &b"welcome"[..]).await.unwrap();
    let message = tokio::time::timeout(WAIT, at_c.recv()).await.unwrap().unwrap();
    assert_eq!(message.payload, Bytes::from_static(b"welcome"));
    assert_eq!(message.sender, a.agent_id());
}

// ============================================================================
// Limit Tests
// ============================================================================

#[tokio::test]
async fn test_payload_limit() {
    let mut config = common::test_config();
    config.gossip.max_payload_bytes = 16;
    let agent = swarmlink_core::Agent::builder()
        .with_config(config)
        .build()
        .await
        .unwrap();

    agent.publish("t", vec![0u8; 16]).await.unwrap();
    let err = agent.publish("t", vec![0u8; 17]).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PayloadTooLarge);
    agent.publish("t", Bytes::new()).await.unwrap();
}
