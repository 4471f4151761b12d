//! EventBus tests.
//!
//! Tests cover:
//! - Registration order and duplicates
//! - Removal by handle
//! - Failure and panic isolation
//! - Custom events
//! - Lifecycle events from a running agent

mod common;

use serde_json::{json, Map};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use swarmlink_core::events::{event, AgentEvent, EventBus, EventCallback};
use swarmlink_core::gossip::MemoryNetwork;
use swarmlink_core::identity::PeerId;

fn connected() -> AgentEvent {
    AgentEvent::Connected {
        peer_id: PeerId::from_bytes([1; 32]),
    }
}

fn counting(counter: &Arc<AtomicUsize>) -> EventCallback {
    let counter = counter.clone();
    Arc::new(move |_: &AgentEvent| -> anyhow::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

// ============================================================================
// Registration Tests
// ============================================================================

#[test]
fn test_callbacks_run_in_registration_order() {
    let bus = EventBus::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..3 {
        let order = order.clone();
        bus.on(event::CONNECTED, move |_| {
            order.lock().push(i);
            Ok(())
        });
    }

    assert_eq!(bus.emit(&connected()), 3);
    assert_eq!(*order.lock(), vec![0, 1, 2]);
}

#[test]
fn test_off_then_emit_never_invokes() {
    let bus = EventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let callback = counting(&calls);
    bus.on_callback(event::CONNECTED, callback.clone());

    assert!(bus.off(event::CONNECTED, &callback));
    bus.emit(&connected());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!bus.off(event::CONNECTED, &callback));
}

#[test]
fn test_register_twice_off_once_invokes_once() {
    let bus = EventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let callback = counting(&calls);
    bus.on_callback(event::CONNECTED, callback.clone());
    bus.on_callback(event::CONNECTED, callback.clone());

    bus.off(event::CONNECTED, &callback);
    bus.emit(&connected());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(bus.listener_count(event::CONNECTED), 1);
}

#[test]
fn test_off_unknown_name_is_noop() {
    let bus = EventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    assert!(!bus.off("never_registered", &counting(&calls)));
}

// ============================================================================
// Isolation Tests
// ============================================================================

#[test]
fn test_failures_and_panics_are_isolated() {
    let bus = EventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));

    bus.on(event::CONNECTED, |_| Err(anyhow::anyhow!("listener failed")));
    bus.on(event::CONNECTED, |_| panic!("listener panicked"));
    bus.on_callback(event::CONNECTED, counting(&calls));

    bus.emit(&connected());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Custom Event Tests
// ============================================================================

#[test]
fn test_custom_events_dispatch_by_name() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    bus.on("deploy_finished", move |event| {
        *sink.lock() = Some(event.data());
        Ok(())
    });

    let mut data = Map::new();
    data.insert("service".into(), json!("api"));
    bus.emit(&AgentEvent::custom("deploy_finished", data));

    let data = seen.lock().clone().unwrap();
    assert_eq!(data["service"], json!("api"));
    assert_eq!(bus.emit(&AgentEvent::custom("unheard", Map::new())), 0);
}

#[test]
fn test_typed_event_data_view() {
    let peer = PeerId::from_bytes([0xcd; 32]);
    let data = AgentEvent::PeerJoined {
        peer_id: peer,
        address: "mem://x".into(),
    }
    .data();
    assert_eq!(data["peer_id"], json!(peer.to_hex()));
    assert_eq!(data["address"], json!("mem://x"));
}

// ============================================================================
// Agent Lifecycle Events
// ============================================================================

#[tokio::test]
async fn test_agent_emits_lifecycle_events() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let a_log = common::EventLog::attach(&a, &[event::PEER_JOINED, event::PEER_LEFT]);

    let b = swarmlink_core::Agent::builder()
        .with_network(network.clone())
        .with_config(common::test_config())
        .with_bootstrap_peers([a.address()])
        .build()
        .await
        .unwrap();
    let b_log = common::EventLog::attach(&b, &[event::CONNECTED, event::DISCONNECTED]);

    b.join_network().await.unwrap();
    assert_eq!(b_log.count(event::CONNECTED), 1);
    let log = &a_log;
    assert!(common::eventually(|| async move { log.count(event::PEER_JOINED) == 1 }).await);

    b.leave_network().await.unwrap();
    assert_eq!(b_log.count(event::DISCONNECTED), 1);
    assert!(common::eventually(|| async move { log.count(event::PEER_LEFT) == 1 }).await);

    match &a_log.snapshot()[0] {
        AgentEvent::PeerJoined { peer_id, .. } => assert_eq!(*peer_id, b.peer_id()),
        other => panic!("unexpected event {:?}", other),
    }
}
