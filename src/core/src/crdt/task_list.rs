//! A named, replicated task list bound to one agent.
//!
//! All local operations and merges for a list go through one async mutex.
//! Deltas are published while that mutex is held so they leave this node in
//! the order they were applied.

use metrics::counter;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{TaskChange, TaskListDelta, TaskListState};
use super::sync::{topic_for, TaskListMessage};
use super::task::{TaskItem, TaskStatus};
use crate::config::TasksConfig;
use crate::error::{Result, SwarmError};
use crate::events::{AgentEvent, EventBus};
use crate::gossip::Message;
use crate::identity::{AgentId, TaskId};
use crate::pubsub::{PubSub, Subscription};
use crate::telemetry::names;

struct Inner {
    name: String,
    topic: String,
    agent_id: AgentId,
    default_priority: u8,
    state: Mutex<TaskListState>,
    pubsub: PubSub,
    events: EventBus,
    cancel: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Handle to a replicated task list. Clones share one replica.
#[derive(Clone)]
pub struct TaskList {
    inner: Arc<Inner>,
}

impl TaskList {
    /// Subscribe to the list's topic, start background sync and ask peers
    /// for their state.
    pub(crate) fn open(
        name: &str,
        agent_id: AgentId,
        pubsub: PubSub,
        events: EventBus,
        config: &TasksConfig,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(SwarmError::configuration("task list name must not be empty"));
        }
        let topic = topic_for(name);
        let subscription = pubsub.subscribe(&topic);
        let interest = pubsub.interest_events();

        let list = Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                topic,
                agent_id,
                default_priority: config.default_priority,
                state: Mutex::new(TaskListState::new(agent_id)),
                pubsub,
                events,
                cancel: CancellationToken::new(),
            }),
        };

        tokio::spawn(receive_loop(
            Arc::downgrade(&list.inner),
            subscription,
            list.inner.cancel.clone(),
        ));
        tokio::spawn(interest_loop(
            Arc::downgrade(&list.inner),
            interest,
            list.inner.cancel.clone(),
        ));
        if !config.anti_entropy_interval.is_zero() {
            tokio::spawn(anti_entropy_loop(
                Arc::downgrade(&list.inner),
                config.anti_entropy_interval,
                list.inner.cancel.clone(),
            ));
        }

        list.request_sync()?;
        info!(task_list = %name, "Task list opened");
        Ok(list)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Gossip topic the list replicates over.
    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a task. It starts Empty, unassigned, at the default priority.
    pub async fn add_task(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<TaskId> {
        let (id, change) = {
            let mut state = self.inner.state.lock().await;
            let (id, delta) = state.add_task(title, description, self.inner.default_priority);
            self.broadcast(delta);
            let change = TaskChange {
                task_id: id,
                status: TaskStatus::Empty,
                assignee: None,
            };
            (id, change)
        };
        debug!(task_list = %self.inner.name, task_id = %id.short(), "Task added");
        self.notify(&[change]);
        Ok(id)
    }

    /// Claim an Empty task for this agent.
    ///
    /// Concurrent claims elsewhere both succeed locally; after merging, the
    /// earliest claim holds at every replica.
    pub async fn claim_task(&self, task_id: TaskId) -> Result<()> {
        let change = {
            let mut state = self.inner.state.lock().await;
            let (change, delta) = state.claim(task_id)?;
            self.broadcast(delta);
            change
        };
        debug!(task_list = %self.inner.name, task_id = %task_id.short(), "Task claimed");
        self.notify(&[change]);
        Ok(())
    }

    /// Mark a task this agent claimed as Done.
    pub async fn complete_task(&self, task_id: TaskId) -> Result<()> {
        let change = {
            let mut state = self.inner.state.lock().await;
            let (change, delta) = state.complete(task_id)?;
            self.broadcast(delta);
            change
        };
        debug!(task_list = %self.inner.name, task_id = %task_id.short(), "Task completed");
        self.notify(&[change]);
        Ok(())
    }

    pub async fn reorder(&self, task_id: TaskId, new_position: usize) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let delta = state.reorder(task_id, new_position)?;
        self.broadcast(delta);
        Ok(())
    }

    pub async fn remove_task(&self, task_id: TaskId) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let delta = state.remove(task_id)?;
        self.broadcast(delta);
        Ok(())
    }

    pub async fn update_title(&self, task_id: TaskId, title: impl Into<String>) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let delta = state.update_title(task_id, title)?;
        self.broadcast(delta);
        Ok(())
    }

    pub async fn update_description(
        &self,
        task_id: TaskId,
        description: impl Into<String>,
    ) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let delta = state.update_description(task_id, description)?;
        self.broadcast(delta);
        Ok(())
    }

    pub async fn set_priority(&self, task_id: TaskId, priority: u8) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let delta = state.set_priority(task_id, priority)?;
        self.broadcast(delta);
        Ok(())
    }

    /// Live tasks by ordering key, then task id.
    pub async fn list_tasks(&self) -> Vec<TaskItem> {
        self.inner.state.lock().await.list()
    }

    pub async fn get_task(&self, task_id: TaskId) -> Result<TaskItem> {
        self.inner.state.lock().await.get(task_id)
    }

    pub async fn task_count(&self) -> usize {
        self.inner.state.lock().await.len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Synchronization
    // ─────────────────────────────────────────────────────────────────────────

    /// Publish this replica's full state, split into as many messages as
    /// the payload limit requires.
    ///
    /// Every batch is attempted; the first failure is returned.
    pub async fn sync_now(&self) -> Result<()> {
        let state = self.inner.state.lock().await;
        let full = state.full_state();
        if full.is_empty() {
            return Ok(());
        }
        let batches = TaskListMessage::encode_batches(
            self.inner.agent_id,
            full,
            self.inner.pubsub.max_payload_bytes(),
        )?;
        let count = batches.len();

        let mut first_error = None;
        for payload in batches {
            if let Err(e) = self.inner.pubsub.publish(&self.inner.topic, payload) {
                first_error.get_or_insert(e);
            }
        }
        drop(state);

        if count > 1 {
            debug!(task_list = %self.inner.name, batches = count, "Sent full state in batches");
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Ask every other replica for its full state.
    pub fn request_sync(&self) -> Result<()> {
        self.publish(&TaskListMessage::SyncRequest {
            origin: self.inner.agent_id,
        })
    }

    fn publish(&self, message: &TaskListMessage) -> Result<()> {
        let payload = message.encode()?;
        self.inner.pubsub.publish(&self.inner.topic, payload)?;
        Ok(())
    }

    /// Publish a local delta. The local change stands even if this fails;
    /// anti-entropy or the next sync request carries it later.
    fn broadcast(&self, delta: TaskListDelta) {
        let message = TaskListMessage::Delta {
            origin: self.inner.agent_id,
            delta,
        };
        if let Err(e) = self.publish(&message) {
            e.log();
        }
    }

    fn notify(&self, changes: &[TaskChange]) {
        for change in changes {
            self.inner.events.emit(&AgentEvent::TaskUpdated {
                task_id: change.task_id,
                status: change.status,
                assignee: change.assignee,
            });
        }
    }

    async fn handle(&self, message: &Message) {
        let decoded = match TaskListMessage::decode(&message.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    task_list = %self.inner.name,
                    sender = %message.sender.short(),
                    error = %e,
                    "Dropping malformed task list message"
                );
                return;
            }
        };
        if decoded.origin() == self.inner.agent_id {
            return;
        }

        match decoded {
            TaskListMessage::Delta { origin, delta } => {
                let changes = self.inner.state.lock().await.apply(&delta);
                counter!(names::TASKLIST_MERGES_TOTAL).increment(1);
                debug!(
                    task_list = %self.inner.name,
                    origin = %origin.short(),
                    changed = changes.len(),
                    "Merged delta"
                );
                self.notify(&changes);
            }
            TaskListMessage::SyncRequest { origin } => {
                debug!(task_list = %self.inner.name, origin = %origin.short(), "Sync requested");
                if let Err(e) = self.sync_now().await {
                    e.log();
                }
            }
        }
    }
}

impl std::fmt::Debug for TaskList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskList")
            .field("name", &self.inner.name)
            .field("topic", &self.inner.topic)
            .finish()
    }
}

async fn receive_loop(inner: Weak<Inner>, mut subscription: Subscription, cancel: CancellationToken) {
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = subscription.recv() => received,
        };
        let Ok(message) = received else {
            break;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        TaskList { inner }.handle(&message).await;
    }
}

/// Push full state whenever a neighbor starts following this list, so a
/// reader that missed earlier deltas catches up without asking.
async fn interest_loop(
    inner: Weak<Inner>,
    mut interest: broadcast::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = interest.recv() => received,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match received {
            Ok(topic) if topic != inner.topic => continue,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
        if let Err(e) = (TaskList { inner }).sync_now().await {
            e.log();
        }
    }
}

async fn anti_entropy_loop(inner: Weak<Inner>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if let Err(e) = (TaskList { inner }).sync_now().await {
            e.log();
        }
    }
}
