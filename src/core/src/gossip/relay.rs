//! Epidemic relay over a bounded neighbor set.
//!
//! One pump task reads transport events in order; one writer task drains the
//! outbound queue in order. Frames are queued while the state lock is held,
//! so interest announcements and publishes leave a node in the order they
//! were decided.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::message::{Frame, Message};
use super::seen::SeenCache;
use super::topics::TopicTable;
use super::transport::{Transport, TransportEvent};
use crate::config::GossipConfig;
use crate::contacts::ContactStore;
use crate::error::{ErrorCode, Result, SwarmError};
use crate::events::{AgentEvent, EventBus};
use crate::identity::{AgentId, PeerId};
use crate::telemetry::names;

/// How long a dial waits for the remote's first announcement.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

const INTEREST_CHANNEL_CAPACITY: usize = 64;

/// Receives messages for local subscribers.
pub trait MessageSink: Send + Sync {
    /// Hand a message to every local subscriber of its topic. Returns how many
    /// accepted it.
    fn deliver(&self, message: &Message) -> usize;

    /// Whether any open subscription exists for `topic`.
    fn has_subscribers(&self, topic: &str) -> bool;
}

/// A neighbor as seen from this node.
#[derive(Debug, Clone, Serialize)]
pub struct NeighborInfo {
    pub peer_id: PeerId,
    pub address: String,
    pub connected_at: DateTime<Utc>,
    /// Topics the neighbor asked us for
    pub topics: BTreeSet<String>,
}

/// Counters since construction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GossipStats {
    pub published: u64,
    pub delivered: u64,
    pub relayed: u64,
    pub duplicates: u64,
    pub send_failures: u64,
    pub hop_limited: u64,
    pub refused_neighbors: u64,
    pub malformed_frames: u64,
    /// Messages from blocked senders
    pub blocked: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    relayed: AtomicU64,
    duplicates: AtomicU64,
    send_failures: AtomicU64,
    hop_limited: AtomicU64,
    refused_neighbors: AtomicU64,
    malformed_frames: AtomicU64,
    blocked: AtomicU64,
}

struct Neighbor {
    address: String,
    connected_at: DateTime<Utc>,
    /// Set once the neighbor's first announcement arrived
    ready: bool,
}

struct State {
    neighbors: HashMap<PeerId, Neighbor>,
    topics: TopicTable,
    seen: SeenCache,
}

struct Outbound {
    peer: PeerId,
    frame: Bytes,
}

struct Running {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn MessageSink>,
    contacts: ContactStore,
    events: EventBus,
    agent_id: AgentId,
    config: GossipConfig,
    state: Mutex<State>,
    seq: AtomicU64,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Outbound>>>,
    running: Mutex<Option<Running>>,
    ready: Notify,
    /// Local topics a neighbor just started asking for
    interest_tx: broadcast::Sender<String>,
    counters: Arc<Counters>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

/// Topic-routed epidemic broadcast.
#[derive(Clone)]
pub struct GossipTransport {
    inner: Arc<Inner>,
}

impl GossipTransport {
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn MessageSink>,
        contacts: ContactStore,
        events: EventBus,
        agent_id: AgentId,
        config: GossipConfig,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (interest_tx, _) = broadcast::channel(INTEREST_CHANNEL_CAPACITY);
        // Sequence numbers start at the wall clock so a restarted node does not
        // reuse message ids its neighbors still remember.
        let seq_start = Utc::now().timestamp_micros().max(0) as u64;

        Self {
            inner: Arc::new(Inner {
                transport,
                sink,
                contacts,
                events,
                agent_id,
                state: Mutex::new(State {
                    neighbors: HashMap::new(),
                    topics: TopicTable::new(),
                    seen: SeenCache::new(config.seen_cache_capacity),
                }),
                config,
                seq: AtomicU64::new(seq_start),
                outbound_tx,
                outbound_rx: Arc::new(tokio::sync::Mutex::new(outbound_rx)),
                running: Mutex::new(None),
                ready: Notify::new(),
                interest_tx,
                counters: Arc::new(Counters::default()),
            }),
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.inner.transport.local_peer()
    }

    pub fn local_address(&self) -> String {
        self.inner.transport.local_address()
    }

    /// Largest payload [`publish`](Self::publish) accepts.
    pub fn max_payload_bytes(&self) -> usize {
        self.inner.config.max_payload_bytes
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Listen and start the pump and writer tasks. No-op if already running.
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.inner.transport.listen().await?;

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.transport),
            cancel.clone(),
        ));
        let writer = tokio::spawn(writer(
            Arc::clone(&self.inner.outbound_rx),
            Arc::clone(&self.inner.transport),
            Arc::clone(&self.inner.counters),
            cancel.clone(),
        ));

        let mut running = self.inner.running.lock();
        if running.is_some() {
            // Lost a start race; the winner's tasks stay.
            cancel.cancel();
            return Ok(());
        }
        *running = Some(Running {
            cancel,
            tasks: vec![pump, writer],
        });
        debug!(peer = %self.local_peer().short(), "Gossip started");
        Ok(())
    }

    /// Stop the tasks, drop every link, and forget neighbor state.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.inner.running.lock().take() else {
            return Ok(());
        };
        running.cancel.cancel();
        for task in running.tasks {
            let _ = task.await;
        }

        let result = self.inner.transport.shutdown().await;

        let removed: Vec<PeerId> = {
            let mut state = self.inner.state.lock();
            let removed = state.neighbors.drain().map(|(peer, _)| peer).collect();
            state.topics.clear_neighbors();
            removed
        };
        if let Ok(mut rx) = self.inner.outbound_rx.try_lock() {
            while rx.try_recv().is_ok() {}
        }
        for peer in removed {
            self.inner.events.emit(&AgentEvent::PeerLeft { peer_id: peer });
        }
        self.inner.ready.notify_waiters();

        debug!(peer = %self.local_peer().short(), "Gossip stopped");
        result
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    /// Open a link to `address` and wait briefly for its first announcement.
    pub async fn dial(&self, address: &str) -> Result<PeerId> {
        {
            let state = self.inner.state.lock();
            if state.neighbors.len() >= self.inner.config.max_neighbors {
                return Err(SwarmError::neighbor_limit(self.inner.config.max_neighbors));
            }
        }

        let peer = self.inner.transport.connect(address).await?;
        self.wait_ready(peer, HANDSHAKE_TIMEOUT).await?;
        Ok(peer)
    }

    async fn wait_ready(&self, peer: PeerId, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.neighbor_ready(peer) {
                Some(true) => return Ok(()),
                Some(false) => {}
                // Refused by the remote, or dropped before we saw it.
                None if !self.inner.transport.is_connected(peer) => {
                    return Err(SwarmError::peer_unreachable(peer));
                }
                None => {}
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        match self.neighbor_ready(peer) {
            Some(_) => {
                debug!(peer = %peer.short(), "Neighbor linked but has not announced yet");
                Ok(())
            }
            None => Err(SwarmError::peer_unreachable(peer)),
        }
    }

    fn neighbor_ready(&self, peer: PeerId) -> Option<bool> {
        self.inner.state.lock().neighbors.get(&peer).map(|n| n.ready)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Interest
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_local_topic(&self, topic: &str) {
        let mut state = self.inner.state.lock();
        if state.topics.add_local(topic) {
            trace!(topic, "Local interest added");
            self.queue_advertisements(&mut state);
        }
    }

    pub fn remove_local_topic(&self, topic: &str) {
        let mut state = self.inner.state.lock();
        if state.topics.remove_local(topic) {
            trace!(topic, "Local interest removed");
            self.queue_advertisements(&mut state);
        }
    }

    /// Whether this node currently advertises interest in `topic`.
    pub fn has_local_topic(&self, topic: &str) -> bool {
        self.inner.state.lock().topics.is_local(topic)
    }

    fn queue_advertisements(&self, state: &mut State) {
        let neighbors: Vec<PeerId> = state.neighbors.keys().copied().collect();
        for (peer, topics) in state.topics.pending_advertisements(neighbors) {
            match (Frame::Announce { topics }).encode() {
                Ok(frame) => self.enqueue(peer, frame),
                Err(e) => e.log(),
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Publish
    // ─────────────────────────────────────────────────────────────────────────

    /// Deliver locally and queue for every interested neighbor.
    pub fn publish(&self, topic: &str, payload: Bytes) -> Result<Message> {
        let limit = self.inner.config.max_payload_bytes;
        if payload.len() > limit {
            return Err(SwarmError::payload_too_large(payload.len(), limit));
        }

        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let message = Message::new(
            self.local_peer(),
            self.inner.agent_id,
            seq,
            topic.to_string(),
            payload,
        );
        let frame = Frame::Publish {
            message: message.forwarded(),
        }
        .encode()?;

        let targets = {
            let mut state = self.inner.state.lock();
            state.seen.insert(message.id);
            let targets = state.topics.interested(topic, None);
            for peer in &targets {
                self.enqueue(*peer, frame.clone());
            }
            targets
        };

        self.inner.counters.published.fetch_add(1, Ordering::Relaxed);
        counter!(names::GOSSIP_PUBLISHED_TOTAL).increment(1);
        trace!(
            topic,
            message_id = %message.id.short(),
            neighbors = targets.len(),
            "Published"
        );

        self.deliver_local(&message);
        Ok(message)
    }

    fn deliver_local(&self, message: &Message) {
        let delivered = self.inner.sink.deliver(message);
        self.inner
            .counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);

        if delivered == 0 {
            self.prune_local_topic(&message.topic);
        }
    }

    /// Withdraw interest in `topic` once its last subscription has closed.
    /// The subscriber check runs under the state lock so a concurrent
    /// subscribe either sees the topic removed or keeps it.
    fn prune_local_topic(&self, topic: &str) {
        let mut state = self.inner.state.lock();
        if !state.topics.is_local(topic) || self.inner.sink.has_subscribers(topic) {
            return;
        }
        if state.topics.remove_local(topic) {
            trace!(topic, "Local interest pruned");
            self.queue_advertisements(&mut state);
        }
    }

    fn enqueue(&self, peer: PeerId, frame: Bytes) {
        let _ = self.inner.outbound_tx.send(Outbound { peer, frame });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::PeerConnected { peer_id, address } => {
                self.on_peer_connected(peer_id, address).await
            }
            TransportEvent::PeerDisconnected { peer_id } => self.on_peer_disconnected(peer_id),
            TransportEvent::Frame { from, data } => self.on_frame(from, &data),
        }
    }

    async fn on_peer_connected(&self, peer: PeerId, address: String) {
        let accepted = {
            let mut state = self.inner.state.lock();
            if state.neighbors.contains_key(&peer) {
                return;
            }
            if state.neighbors.len() >= self.inner.config.max_neighbors {
                false
            } else {
                state.neighbors.insert(
                    peer,
                    Neighbor {
                        address: address.clone(),
                        connected_at: Utc::now(),
                        ready: false,
                    },
                );
                self.queue_advertisements(&mut state);
                true
            }
        };
        self.inner.ready.notify_waiters();

        if !accepted {
            self.inner
                .counters
                .refused_neighbors
                .fetch_add(1, Ordering::Relaxed);
            warn!(
                peer = %peer.short(),
                limit = self.inner.config.max_neighbors,
                "Neighbor limit reached, refusing peer"
            );
            if let Err(e) = self.inner.transport.disconnect(peer).await {
                debug!(peer = %peer.short(), error = %e, "Disconnect of refused peer failed");
            }
            return;
        }

        info!(peer = %peer.short(), address = %address, "Neighbor joined");
        self.inner.events.emit(&AgentEvent::PeerJoined {
            peer_id: peer,
            address,
        });
    }

    fn on_peer_disconnected(&self, peer: PeerId) {
        let removed = {
            let mut state = self.inner.state.lock();
            let removed = state.neighbors.remove(&peer).is_some();
            if removed {
                state.topics.remove_neighbor(peer);
                self.queue_advertisements(&mut state);
            }
            removed
        };
        self.inner.ready.notify_waiters();

        if removed {
            info!(peer = %peer.short(), "Neighbor left");
            self.inner.events.emit(&AgentEvent::PeerLeft { peer_id: peer });
        }
    }

    fn on_frame(&self, from: PeerId, data: &[u8]) {
        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                self.inner
                    .counters
                    .malformed_frames
                    .fetch_add(1, Ordering::Relaxed);
                warn!(peer = %from.short(), error = %e, "Dropping malformed frame");
                return;
            }
        };

        match frame {
            Frame::Announce { topics } => self.on_announce(from, topics),
            Frame::Publish { message } => self.on_publish(from, message),
        }
    }

    fn on_announce(&self, from: PeerId, topics: Vec<String>) {
        let newly_interested: Vec<String> = {
            let mut state = self.inner.state.lock();
            let Some(neighbor) = state.neighbors.get_mut(&from) else {
                trace!(peer = %from.short(), "Announce from non-neighbor ignored");
                return;
            };
            neighbor.ready = true;
            trace!(peer = %from.short(), topics = topics.len(), "Announce");

            let before = state.topics.topics_of(from);
            let newly_interested = topics
                .iter()
                .filter(|t| !before.contains(*t) && state.topics.is_local(t))
                .cloned()
                .collect();
            if state.topics.set_neighbor_topics(from, topics) {
                self.queue_advertisements(&mut state);
            }
            newly_interested
        };
        self.inner.ready.notify_waiters();

        for topic in newly_interested {
            // No receivers is fine.
            let _ = self.inner.interest_tx.send(topic);
        }
    }

    /// Local topics that a neighbor has just started asking for.
    ///
    /// Replicated state can use this to push itself to new readers.
    pub fn interest_events(&self) -> broadcast::Receiver<String> {
        self.inner.interest_tx.subscribe()
    }

    fn on_publish(&self, from: PeerId, message: Message) {
        let targets = {
            let mut state = self.inner.state.lock();
            if !state.neighbors.contains_key(&from) {
                trace!(peer = %from.short(), "Publish from non-neighbor ignored");
                return;
            }
            if !state.seen.insert(message.id) {
                self.inner.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                counter!(names::GOSSIP_DUPLICATES_TOTAL).increment(1);
                trace!(message_id = %message.id.short(), "Duplicate dropped");
                return;
            }
            if self.inner.contacts.is_blocked(&message.sender) {
                self.inner.counters.blocked.fetch_add(1, Ordering::Relaxed);
                counter!(names::GOSSIP_BLOCKED_TOTAL).increment(1);
                debug!(
                    sender = %message.sender.short(),
                    message_id = %message.id.short(),
                    "Dropped message from blocked sender"
                );
                return;
            }
            if message.hops < self.inner.config.max_hops {
                state.topics.interested(&message.topic, Some(from))
            } else {
                self.inner.counters.hop_limited.fetch_add(1, Ordering::Relaxed);
                trace!(message_id = %message.id.short(), hops = message.hops, "Hop limit reached");
                Vec::new()
            }
        };

        self.deliver_local(&message);

        if targets.is_empty() {
            return;
        }
        match (Frame::Publish {
            message: message.forwarded(),
        })
        .encode()
        {
            Ok(frame) => {
                for peer in &targets {
                    self.enqueue(*peer, frame.clone());
                }
                self.inner
                    .counters
                    .relayed
                    .fetch_add(targets.len() as u64, Ordering::Relaxed);
                counter!(names::GOSSIP_RELAYED_TOTAL).increment(targets.len() as u64);
            }
            Err(e) => e.log(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn neighbors(&self) -> Vec<NeighborInfo> {
        let state = self.inner.state.lock();
        let mut list: Vec<NeighborInfo> = state
            .neighbors
            .iter()
            .map(|(peer, n)| NeighborInfo {
                peer_id: *peer,
                address: n.address.clone(),
                connected_at: n.connected_at,
                topics: state.topics.topics_of(*peer),
            })
            .collect();
        list.sort_by_key(|n| n.peer_id);
        list
    }

    pub fn neighbor_count(&self) -> usize {
        self.inner.state.lock().neighbors.len()
    }

    /// Neighbors that asked for `topic`.
    pub fn interested_neighbors(&self, topic: &str) -> Vec<PeerId> {
        self.inner.state.lock().topics.interested(topic, None)
    }

    pub fn stats(&self) -> GossipStats {
        let c = &self.inner.counters;
        GossipStats {
            published: c.published.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            relayed: c.relayed.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
            hop_limited: c.hop_limited.load(Ordering::Relaxed),
            refused_neighbors: c.refused_neighbors.load(Ordering::Relaxed),
            malformed_frames: c.malformed_frames.load(Ordering::Relaxed),
            blocked: c.blocked.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for GossipTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipTransport")
            .field("peer", &self.local_peer())
            .field("neighbors", &self.neighbor_count())
            .field("running", &self.is_running())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tasks
// ═══════════════════════════════════════════════════════════════════════════════

async fn pump(inner: Weak<Inner>, transport: Arc<dyn Transport>, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = transport.next_event() => event,
        };
        let Some(event) = event else {
            debug!("Transport closed, pump exiting");
            break;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        GossipTransport { inner }.handle_event(event).await;
    }
}

async fn writer(
    outbound: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Outbound>>>,
    transport: Arc<dyn Transport>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    let mut rx = outbound.lock().await;
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = rx.recv() => item,
        };
        let Some(Outbound { peer, frame }) = item else {
            break;
        };
        if let Err(e) = transport.send(peer, frame).await {
            counters.send_failures.fetch_add(1, Ordering::Relaxed);
            counter!(names::GOSSIP_SEND_FAILURES_TOTAL).increment(1);
            if e.code() == ErrorCode::PeerUnreachable {
                debug!(peer = %peer.short(), "Send failed: peer unreachable");
            } else {
                warn!(peer = %peer.short(), error = %e, "Send failed");
            }
        }
    }
}
