//! The agent: composition root and network lifecycle.
//!
//! ```text
//! Disconnected ──join──▶ Connecting ──bootstrap ok──▶ Connected
//!      ▲                     │                            │
//!      │               failure / leave                  leave
//!      │                     ▼                            ▼
//!      └──────────────── Disconnecting ◀──────────────────┘
//! ```

mod builder;

pub use builder::AgentBuilder;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::contacts::ContactStore;
use crate::crdt::TaskList;
use crate::error::{ErrorCode, Result, SwarmError};
use crate::events::{AgentEvent, EventBus, EventCallback};
use crate::gossip::{GossipStats, GossipTransport, NeighborInfo, Transport};
use crate::identity::{AgentId, Identity, MachineId, MessageId, PeerId};
use crate::pubsub::{PubSub, Subscription, SubscriptionRegistry};

/// Where an agent is in its network lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

struct Lifecycle {
    state: NetworkState,
    /// Cancels an in-flight join
    join_cancel: Option<CancellationToken>,
}

/// A node in the mesh.
pub struct Agent {
    identity: Identity,
    config: Config,
    events: EventBus,
    contacts: ContactStore,
    gossip: GossipTransport,
    pubsub: PubSub,
    lifecycle: Mutex<Lifecycle>,
    state_changed: Notify,
    task_lists: Mutex<HashMap<String, TaskList>>,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub(crate) fn assemble(
        identity: Identity,
        config: Config,
        contacts: ContactStore,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let events = EventBus::new();
        let registry = Arc::new(SubscriptionRegistry::new());
        let gossip = GossipTransport::new(
            transport,
            registry.clone(),
            contacts.clone(),
            events.clone(),
            identity.agent_id(),
            config.gossip.clone(),
        );
        let pubsub = PubSub::new(gossip.clone(), registry, config.pubsub.queue_capacity);

        Self {
            identity,
            config,
            events,
            contacts,
            gossip,
            pubsub,
            lifecycle: Mutex::new(Lifecycle {
                state: NetworkState::Disconnected,
                join_cancel: None,
            }),
            state_changed: Notify::new(),
            task_lists: Mutex::new(HashMap::new()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identity
    // ─────────────────────────────────────────────────────────────────────────

    pub fn machine_id(&self) -> MachineId {
        self.identity.machine_id()
    }

    pub fn agent_id(&self) -> AgentId {
        self.identity.agent_id()
    }

    pub fn peer_id(&self) -> PeerId {
        self.identity.peer_id()
    }

    /// Address other agents can bootstrap from.
    pub fn address(&self) -> String {
        self.gossip.local_address()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Trust levels consulted for every inbound message.
    pub fn contacts(&self) -> &ContactStore {
        &self.contacts
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Shorthand for `events().on(..)`.
    pub fn on<F>(&self, event_name: impl Into<String>, callback: F) -> EventCallback
    where
        F: Fn(&AgentEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.on(event_name, callback)
    }

    /// Shorthand for `events().off(..)`.
    pub fn off(&self, event_name: &str, callback: &EventCallback) -> bool {
        self.events.off(event_name, callback)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    pub fn network_state(&self) -> NetworkState {
        self.lifecycle.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.network_state() == NetworkState::Connected
    }

    /// Join the mesh. Returns at once if already connected or connecting.
    ///
    /// With no bootstrap peers the agent becomes a seed and connects
    /// immediately. Otherwise it is connected once any bootstrap peer answers.
    ///
    /// # Errors
    ///
    /// `BootstrapFailed` when no bootstrap peer could be reached in any round,
    /// `NetworkTimeout` when `network.join_timeout` elapses first.
    pub async fn join_network(&self) -> Result<()> {
        let cancel = loop {
            let notified = self.state_changed.notified();
            {
                let mut lifecycle = self.lifecycle.lock();
                match lifecycle.state {
                    NetworkState::Connected | NetworkState::Connecting => return Ok(()),
                    NetworkState::Disconnected => {
                        let token = CancellationToken::new();
                        lifecycle.state = NetworkState::Connecting;
                        lifecycle.join_cancel = Some(token.clone());
                        break token;
                    }
                    NetworkState::Disconnecting => {}
                }
            }
            notified.await;
        };
        self.state_changed.notify_waiters();
        info!(peer_id = %self.peer_id().short(), "Joining network");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(peer_id = %self.peer_id().short(), "Join cancelled by leave");
                return Ok(());
            }
            result = self.connect() => result,
        };

        let outcome = {
            let mut lifecycle = self.lifecycle.lock();
            if cancel.is_cancelled() || lifecycle.state != NetworkState::Connecting {
                return Ok(());
            }
            lifecycle.join_cancel = None;
            lifecycle.state = match result {
                Ok(()) => NetworkState::Connected,
                Err(_) => NetworkState::Disconnecting,
            };
            result
        };

        match outcome {
            Ok(()) => {
                self.state_changed.notify_waiters();
                info!(
                    peer_id = %self.peer_id().short(),
                    neighbors = self.gossip.neighbor_count(),
                    "Connected"
                );
                self.events.emit(&AgentEvent::Connected {
                    peer_id: self.peer_id(),
                });
                self.resync_task_lists().await;
                Ok(())
            }
            Err(e) => {
                e.log();
                if let Err(stop_err) = self.gossip.stop().await {
                    stop_err.log();
                }
                self.lifecycle.lock().state = NetworkState::Disconnected;
                self.state_changed.notify_waiters();
                Err(e)
            }
        }
    }

    async fn connect(&self) -> Result<()> {
        self.gossip.start().await?;

        let own = self.address();
        let peers: Vec<&String> = self
            .config
            .network
            .bootstrap_peers
            .iter()
            .filter(|address| **address != own)
            .collect();
        if peers.is_empty() {
            debug!("No bootstrap peers, starting as seed");
            return Ok(());
        }

        tokio::time::timeout(self.config.network.join_timeout, self.bootstrap(&peers))
            .await
            .map_err(|_| {
                SwarmError::new(ErrorCode::NetworkTimeout, "Join timed out")
                    .with_context("timeout", format!("{:?}", self.config.network.join_timeout))
            })?
    }

    async fn bootstrap(&self, peers: &[&String]) -> Result<()> {
        let rounds = self.config.network.bootstrap_rounds;
        for round in 1..=rounds {
            let attempts = peers.iter().map(|address| async move {
                (address.as_str(), self.gossip.dial(address).await)
            });

            let mut reached = 0;
            for (address, result) in join_all(attempts).await {
                match result {
                    Ok(peer) => {
                        reached += 1;
                        debug!(address, peer = %peer.short(), "Bootstrap peer reached");
                    }
                    Err(e) => {
                        debug!(address, round, error = %e, "Bootstrap dial failed");
                    }
                }
            }
            if reached > 0 {
                return Ok(());
            }

            if round < rounds {
                warn!(round, rounds, "No bootstrap peer reachable, retrying");
                tokio::time::sleep(self.config.network.bootstrap_retry_delay).await;
            }
        }
        Err(SwarmError::bootstrap_failed(peers.len(), rounds))
    }

    /// Leave the mesh. No-op when already disconnected. A join still in
    /// progress is cancelled and returns `Ok` with the agent disconnected.
    pub async fn leave_network(&self) -> Result<()> {
        let was_connected = loop {
            let notified = self.state_changed.notified();
            {
                let mut lifecycle = self.lifecycle.lock();
                match lifecycle.state {
                    NetworkState::Disconnected => return Ok(()),
                    NetworkState::Connecting => {
                        if let Some(token) = lifecycle.join_cancel.take() {
                            token.cancel();
                        }
                        lifecycle.state = NetworkState::Disconnecting;
                        break false;
                    }
                    NetworkState::Connected => {
                        lifecycle.state = NetworkState::Disconnecting;
                        break true;
                    }
                    NetworkState::Disconnecting => {}
                }
            }
            notified.await;
        };
        info!(peer_id = %self.peer_id().short(), "Leaving network");

        let result = self.gossip.stop().await;
        self.lifecycle.lock().state = NetworkState::Disconnected;
        self.state_changed.notify_waiters();

        if was_connected {
            self.events.emit(&AgentEvent::Disconnected {
                peer_id: self.peer_id(),
            });
        }
        result
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pub/sub
    // ─────────────────────────────────────────────────────────────────────────

    /// Publish to `topic`. Returns once the message is queued locally.
    ///
    /// # Errors
    ///
    /// `PayloadTooLarge` when the payload exceeds `gossip.max_payload_bytes`.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> Result<MessageId> {
        self.pubsub.publish(topic, payload)
    }

    /// Receive messages published to `topic` from now on.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        self.pubsub.subscribe(topic)
    }

    /// Close every subscription on `topic`. Returns how many were open.
    ///
    /// # Errors
    ///
    /// `ConfigurationError` for task list topics, which the task lists own.
    pub fn unsubscribe(&self, topic: &str) -> Result<usize> {
        if topic.starts_with(crate::crdt::TOPIC_PREFIX) {
            return Err(SwarmError::configuration(format!(
                "Topic {} belongs to a task list",
                topic
            )));
        }
        Ok(self.pubsub.unsubscribe(topic))
    }

    pub fn pubsub(&self) -> &PubSub {
        &self.pubsub
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Task lists
    // ─────────────────────────────────────────────────────────────────────────

    /// Open the task list called `name`, creating the local replica if needed.
    ///
    /// Every agent using the same name shares one list. Calling this again
    /// returns a handle to the same replica.
    pub async fn task_list(&self, name: &str) -> Result<TaskList> {
        let mut lists = self.task_lists.lock();
        if let Some(list) = lists.get(name) {
            return Ok(list.clone());
        }
        let list = TaskList::open(
            name,
            self.agent_id(),
            self.pubsub.clone(),
            self.events.clone(),
            &self.config.tasks,
        )?;
        lists.insert(name.to_string(), list.clone());
        Ok(list)
    }

    /// Start a new task list. Same as [`task_list`](Self::task_list).
    pub async fn create_task_list(&self, name: &str) -> Result<TaskList> {
        self.task_list(name).await
    }

    /// Join a task list another agent created. Same as
    /// [`task_list`](Self::task_list).
    pub async fn join_task_list(&self, name: &str) -> Result<TaskList> {
        self.task_list(name).await
    }

    async fn resync_task_lists(&self) {
        let lists: Vec<TaskList> = self.task_lists.lock().values().cloned().collect();
        for list in lists {
            if let Err(e) = list.sync_now().await {
                e.log();
            }
            if let Err(e) = list.request_sync() {
                e.log();
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn neighbors(&self) -> Vec<NeighborInfo> {
        self.gossip.neighbors()
    }

    pub fn gossip_stats(&self) -> GossipStats {
        self.gossip.stats()
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("agent_id", &self.agent_id())
            .field("peer_id", &self.peer_id())
            .field("state", &self.network_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gossip::MemoryNetwork;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_seed_join_is_idempotent() {
        let agent = Agent::builder().build().await.unwrap();
        let connected = Arc::new(AtomicUsize::new(0));
        let counter = connected.clone();
        agent.on("connected", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        for _ in 0..3 {
            agent.join_network().await.unwrap();
        }
        assert!(agent.is_connected());
        assert_eq!(connected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let agent = Agent::builder().build().await.unwrap();
        agent.leave_network().await.unwrap();
        assert_eq!(agent.network_state(), NetworkState::Disconnected);

        agent.join_network().await.unwrap();
        agent.leave_network().await.unwrap();
        agent.leave_network().await.unwrap();
        assert_eq!(agent.network_state(), NetworkState::Disconnected);
    }

    #[tokio::test]
    async fn test_distinct_agents_get_distinct_ids() {
        let network = MemoryNetwork::new();
        let a = Agent::builder().with_network(network.clone()).build().await.unwrap();
        let b = Agent::builder().with_network(network.clone()).build().await.unwrap();
        assert_ne!(a.agent_id(), b.agent_id());
        assert_ne!(a.peer_id(), b.peer_id());
        assert_eq!(a.peer_id(), PeerId::from_machine(a.machine_id()));
        assert_eq!(network.endpoint_count(), 2);
    }

    #[tokio::test]
    async fn test_task_list_handles_are_shared() {
        let agent = Agent::builder().build().await.unwrap();
        let first = agent.create_task_list("team").await.unwrap();
        let second = agent.join_task_list("team").await.unwrap();
        let id = first.add_task("t", "").await.unwrap();
        assert_eq!(second.get_task(id).await.unwrap().title, "t");
        assert_eq!(second.topic(), "swarmlink/tasklist/team");
    }
}
