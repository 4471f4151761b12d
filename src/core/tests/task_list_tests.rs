//! Replicated task list tests.
//!
//! Tests cover:
//! - The two-agent create/claim/complete scenario
//! - Concurrent claims under partition
//! - Task events
//! - Field updates, removal and reordering across replicas
//! - Anti-entropy

mod common;

use std::time::Duration;

use swarmlink_core::crdt::{TaskItem, TaskList, TaskStatus};
use swarmlink_core::error::ErrorCode;
use swarmlink_core::events::{event, AgentEvent};
use swarmlink_core::gossip::MemoryNetwork;
use swarmlink_core::identity::{AgentId, TaskId};
use swarmlink_core::Agent;

async fn task_state(list: &TaskList, id: TaskId) -> Option<(TaskStatus, Option<AgentId>)> {
    list.get_task(id)
        .await
        .ok()
        .map(|task| (task.status, task.assignee))
}

async fn wait_for_state(
    list: &TaskList,
    id: TaskId,
    status: TaskStatus,
    assignee: Option<AgentId>,
) -> bool {
    common::eventually(|| async move { task_state(list, id).await == Some((status, assignee)) }).await
}

async fn titles(list: &TaskList) -> Vec<String> {
    list.list_tasks()
        .await
        .into_iter()
        .map(|task: TaskItem| task.title)
        .collect()
}

// ============================================================================
// Scenario Tests
// ============================================================================

#[tokio::test]
async fn test_team_tasks_scenario() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let b = common::joined(&network, &[&a]).await;

    let list_a = a.create_task_list("team-tasks").await.unwrap();
    let t = list_a.add_task("Fix bug", "timeout").await.unwrap();

    let tasks = list_a.list_tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, t);
    assert_eq!(tasks[0].title, "Fix bug");
    assert_eq!(tasks[0].description, "timeout");
    assert_eq!(tasks[0].status, TaskStatus::Empty);
    assert_eq!(tasks[0].assignee, None);

    let list_b = b.join_task_list("team-tasks").await.unwrap();
    assert!(wait_for_state(&list_b, t, TaskStatus::Empty, None).await);

    list_b.claim_task(t).await.unwrap();
    let claimed_by_b = Some(b.agent_id());
    assert!(wait_for_state(&list_a, t, TaskStatus::Claimed, claimed_by_b).await);
    assert_eq!(task_state(&list_b, t).await, Some((TaskStatus::Claimed, claimed_by_b)));

    let err = list_a.complete_task(t).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotAssignee);

    list_b.complete_task(t).await.unwrap();
    assert!(wait_for_state(&list_a, t, TaskStatus::Done, claimed_by_b).await);
    assert_eq!(task_state(&list_b, t).await.map(|s| s.0), Some(TaskStatus::Done));
}

#[tokio::test]
async fn test_late_joiner_receives_existing_tasks() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let list_a = a.create_task_list("backlog").await.unwrap();
    list_a.add_task("one", "").await.unwrap();
    list_a.add_task("two", "").await.unwrap();

    let b = common::joined(&network, &[&a]).await;
    let list_b = b.join_task_list("backlog").await.unwrap();
    let list = &list_b;
    assert!(common::eventually(|| async move { list.task_count().await == 2 }).await);
    assert_eq!(titles(&list_b).await, vec!["one", "two"]);
}

#[tokio::test]
async fn test_offline_edits_sync_on_join() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let _list_a = a.create_task_list("offline").await.unwrap();

    let b = Agent::builder()
        .with_network(network.clone())
        .with_config(common::test_config())
        .with_bootstrap_peers([a.address()])
        .build()
        .await
        .unwrap();
    let list_b = b.create_task_list("offline").await.unwrap();
    let id = list_b.add_task("written offline", "").await.unwrap();

    b.join_network().await.unwrap();
    let list = &_list_a;
    assert!(common::eventually(|| async move { list.get_task(id).await.is_ok() }).await);
}

#[tokio::test]
async fn test_large_list_reaches_late_joiner_in_batches() {
    let network = MemoryNetwork::new();
    let mut config = common::test_config();
    config.gossip.max_payload_bytes = 2048;

    let a = Agent::builder()
        .with_network(network.clone())
        .with_config(config.clone())
        .build()
        .await
        .unwrap();
    a.join_network().await.unwrap();
    let list_a = a.create_task_list("big").await.unwrap();
    for i in 0..60 {
        list_a
            .add_task(format!("task {}", i), "a fairly long description ".repeat(4))
            .await
            .unwrap();
    }

    let b = Agent::builder()
        .with_network(network)
        .with_config(config)
        .with_bootstrap_peers([a.address()])
        .build()
        .await
        .unwrap();
    b.join_network().await.unwrap();
    let list_b = b.join_task_list("big").await.unwrap();

    let list = &list_b;
    assert!(common::eventually(|| async move { list.task_count().await == 60 }).await);
    assert_eq!(list_b.list_tasks().await, list_a.list_tasks().await);
}

// ============================================================================
// Conflict Tests
// ============================================================================

#[tokio::test]
async fn test_concurrent_claims_converge() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let b = common::joined(&network, &[&a]).await;

    let list_a = a.create_task_list("contended").await.unwrap();
    let list_b = b.join_task_list("contended").await.unwrap();
    let t = list_a.add_task("hot", "").await.unwrap();
    assert!(wait_for_state(&list_b, t, TaskStatus::Empty, None).await);

    network.partition(a.peer_id(), b.peer_id());
    list_a.claim_task(t).await.unwrap();
    list_b.claim_task(t).await.unwrap();
    network.heal(a.peer_id(), b.peer_id());

    list_a.sync_now().await.unwrap();
    list_b.sync_now().await.unwrap();

    // Both claims carry the same Lamport value, so the smaller agent id wins.
    let winner = a.agent_id().min(b.agent_id());
    assert!(wait_for_state(&list_a, t, TaskStatus::Claimed, Some(winner)).await);
    assert!(wait_for_state(&list_b, t, TaskStatus::Claimed, Some(winner)).await);

    let loser = if winner == a.agent_id() { &list_b } else { &list_a };
    let err = loser.complete_task(t).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotAssignee);
}

#[tokio::test]
async fn test_loser_sees_task_updated() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let b = common::joined(&network, &[&a]).await;
    let list_a = a.create_task_list("events").await.unwrap();
    let list_b = b.join_task_list("events").await.unwrap();
    let t = list_a.add_task("t", "").await.unwrap();
    assert!(wait_for_state(&list_b, t, TaskStatus::Empty, None).await);

    let a_log = common::EventLog::attach(&a, &[event::TASK_UPDATED]);
    let b_log = common::EventLog::attach(&b, &[event::TASK_UPDATED]);

    network.partition(a.peer_id(), b.peer_id());
    list_a.claim_task(t).await.unwrap();
    list_b.claim_task(t).await.unwrap();
    network.heal(a.peer_id(), b.peer_id());
    list_a.sync_now().await.unwrap();
    list_b.sync_now().await.unwrap();

    let winner = a.agent_id().min(b.agent_id());
    let loser_log = if winner == a.agent_id() { &b_log } else { &a_log };
    assert!(
        common::eventually(|| async move {
            loser_log.snapshot().iter().any(|e| {
                matches!(e, AgentEvent::TaskUpdated { assignee, .. } if *assignee == Some(winner))
            })
        })
        .await
    );
}

// ============================================================================
// Field Update Tests
// ============================================================================

#[tokio::test]
async fn test_updates_and_removal_replicate() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let b = common::joined(&network, &[&a]).await;
    let list_a = a.create_task_list("edits").await.unwrap();
    let list_b = b.join_task_list("edits").await.unwrap();

    let first = list_a.add_task("first", "").await.unwrap();
    let second = list_a.add_task("second", "").await.unwrap();
    let third = list_a.add_task("third", "").await.unwrap();
    let list = &list_b;
    assert!(common::eventually(|| async move { list.task_count().await == 3 }).await);

    list_b.update_title(first, "first (renamed)").await.unwrap();
    list_b.update_description(first, "details").await.unwrap();
    list_b.set_priority(first, 255).await.unwrap();
    list_b.reorder(third, 0).await.unwrap();
    list_b.remove_task(second).await.unwrap();

    let list = &list_a;
    assert!(
        common::eventually(|| async move {
            titles(list).await == vec!["third".to_string(), "first (renamed)".to_string()]
        })
        .await
    );
    let task = list_a.get_task(first).await.unwrap();
    assert_eq!(task.description, "details");
    assert_eq!(task.priority, 255);
    assert_eq!(
        list_a.get_task(second).await.unwrap_err().code(),
        ErrorCode::TaskNotFound
    );
}

#[tokio::test]
async fn test_list_topic_cannot_be_unsubscribed() {
    let network = MemoryNetwork::new();
    let a = common::seed(&network).await;
    let b = common::joined(&network, &[&a]).await;
    let list_a = a.create_task_list("owned").await.unwrap();
    let list_b = b.join_task_list("owned").await.unwrap();

    let err = b.unsubscribe(list_b.topic()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigurationError);

    let id = list_a.add_task("still flowing", "").await.unwrap();
    let list = &list_b;
    assert!(common::eventually(|| async move { list.get_task(id).await.is_ok() }).await);
}

#[tokio::test]
async fn test_invalid_transitions() {
    let agent = Agent::builder().build().await.unwrap();
    let list = agent.create_task_list("solo").await.unwrap();
    let id = list.add_task("t", "").await.unwrap();

    assert_eq!(
        list.complete_task(id).await.unwrap_err().code(),
        ErrorCode::InvalidTransition
    );
    list.claim_task(id).await.unwrap();
    assert_eq!(
        list.claim_task(id).await.unwrap_err().code(),
        ErrorCode::InvalidTransition
    );
    list.complete_task(id).await.unwrap();
    assert_eq!(
        list.claim_task(id).await.unwrap_err().code(),
        ErrorCode::InvalidTransition
    );
    assert_eq!(
        list.claim_task(TaskId::random()).await.unwrap_err().code(),
        ErrorCode::TaskNotFound
    );
    assert_eq!(list.name(), "solo");
}

// ============================================================================
// Anti-Entropy Tests
// ============================================================================

#[tokio::test]
async fn test_anti_entropy_repairs_lost_deltas() {
    let network = MemoryNetwork::new();
    let mut config = common::test_config();
    config.tasks.anti_entropy_interval = Duration::from_millis(50);

    let a = Agent::builder()
        .with_network(network.clone())
        .with_config(config.clone())
        .build()
        .await
        .unwrap();
    a.join_network().await.unwrap();
    let b = Agent::builder()
        .with_network(network.clone())
        .with_config(config)
        .with_bootstrap_peers([a.address()])
        .build()
        .await
        .unwrap();
    b.join_network().await.unwrap();

    let list_a = a.create_task_list("repair").await.unwrap();
    let list_b = b.join_task_list("repair").await.unwrap();
    assert!(common::wait_for_interest(&a, &list_a.topic().to_string()).await);

    network.partition(a.peer_id(), b.peer_id());
    let id = list_a.add_task("lost in transit", "").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(list_b.get_task(id).await.is_err());
    network.heal(a.peer_id(), b.peer_id());

    let list = &list_b;
    assert!(common::eventually(|| async move { list.get_task(id).await.is_ok() }).await);
}
