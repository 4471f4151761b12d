//! In-process transport hub.
//!
//! Every endpoint gets an address of the form `mem://<peer hex>` and an
//! unbounded event queue. Links are symmetric; opening or closing one notifies
//! both ends. Partitions drop frames on a link without tearing it down, which
//! is what the convergence tests need.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::transport::{Transport, TransportEvent};
use crate::error::{ErrorCode, Result, SwarmError};
use crate::identity::PeerId;

const SCHEME: &str = "mem://";

/// Unordered pair key for links and partitions.
fn pair(a: PeerId, b: PeerId) -> (PeerId, PeerId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

struct EndpointHandle {
    tx: mpsc::UnboundedSender<TransportEvent>,
    listening: Arc<AtomicBool>,
    address: String,
}

#[derive(Default)]
struct Hub {
    endpoints: DashMap<PeerId, EndpointHandle>,
    addresses: DashMap<String, PeerId>,
    links: Mutex<HashSet<(PeerId, PeerId)>>,
    partitions: Mutex<HashSet<(PeerId, PeerId)>>,
}

impl Hub {
    fn notify(&self, to: PeerId, event: TransportEvent) {
        if let Some(endpoint) = self.endpoints.get(&to) {
            let _ = endpoint.tx.send(event);
        }
    }

    fn drop_links_of(&self, peer: PeerId) -> Vec<PeerId> {
        let mut links = self.links.lock();
        let mut others = Vec::new();
        links.retain(|&(a, b)| {
            if a == peer || b == peer {
                others.push(if a == peer { b } else { a });
                false
            } else {
                true
            }
        });
        others
    }
}

/// Shared in-memory network. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Hub>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address an endpoint for `peer` registers under.
    pub fn address_of(peer: PeerId) -> String {
        format!("{}{}", SCHEME, peer.to_hex())
    }

    /// Register an endpoint. Each peer id may be registered once at a time.
    pub fn endpoint(&self, peer: PeerId) -> Result<Arc<MemoryTransport>> {
        let address = Self::address_of(peer);
        let (tx, rx) = mpsc::unbounded_channel();
        let listening = Arc::new(AtomicBool::new(false));

        match self.hub.endpoints.entry(peer) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(SwarmError::new(
                    ErrorCode::ConfigurationError,
                    format!("Address already registered: {}", address),
                ));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(EndpointHandle {
                    tx,
                    listening: Arc::clone(&listening),
                    address: address.clone(),
                });
            }
        }
        self.hub.addresses.insert(address.clone(), peer);
        debug!(peer = %peer.short(), "Registered memory endpoint");

        Ok(Arc::new(MemoryTransport {
            network: self.clone(),
            peer,
            address,
            listening,
            rx: tokio::sync::Mutex::new(rx),
        }))
    }

    /// Drop frames between `a` and `b` until [`heal`](Self::heal).
    pub fn partition(&self, a: PeerId, b: PeerId) {
        self.hub.partitions.lock().insert(pair(a, b));
    }

    pub fn heal(&self, a: PeerId, b: PeerId) {
        self.hub.partitions.lock().remove(&pair(a, b));
    }

    pub fn heal_all(&self) {
        self.hub.partitions.lock().clear();
    }

    pub fn is_linked(&self, a: PeerId, b: PeerId) -> bool {
        self.hub.links.lock().contains(&pair(a, b))
    }

    pub fn endpoint_count(&self) -> usize {
        self.hub.endpoints.len()
    }

    fn unregister(&self, peer: PeerId) {
        for other in self.hub.drop_links_of(peer) {
            self.hub
                .notify(other, TransportEvent::PeerDisconnected { peer_id: peer });
        }
        if let Some((_, endpoint)) = self.hub.endpoints.remove(&peer) {
            self.hub.addresses.remove(&endpoint.address);
        }
    }
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("endpoints", &self.hub.endpoints.len())
            .field("links", &self.hub.links.lock().len())
            .finish()
    }
}

/// One node's view of a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    peer: PeerId,
    address: String,
    listening: Arc<AtomicBool>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl MemoryTransport {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    fn unreachable(&self, peer: impl std::fmt::Display) -> SwarmError {
        SwarmError::peer_unreachable(peer)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    fn local_address(&self) -> String {
        self.address.clone()
    }

    async fn listen(&self) -> Result<()> {
        self.listening.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.listening.store(false, Ordering::SeqCst);
        let hub = &self.network.hub;
        for other in hub.drop_links_of(self.peer) {
            hub.notify(other, TransportEvent::PeerDisconnected { peer_id: self.peer });
        }
        // Anything still queued belongs to the session that just ended.
        if let Ok(mut rx) = self.rx.try_lock() {
            while rx.try_recv().is_ok() {}
        }
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<PeerId> {
        if !self.listening.load(Ordering::SeqCst) {
            return Err(SwarmError::new(
                ErrorCode::PeerUnreachable,
                "Local endpoint is not listening",
            ));
        }

        let hub = &self.network.hub;
        let target = hub
            .addresses
            .get(address)
            .map(|entry| *entry.value())
            .ok_or_else(|| self.unreachable(address))?;
        if target == self.peer {
            return Err(SwarmError::new(
                ErrorCode::PeerUnreachable,
                "Cannot connect to self",
            ));
        }

        let target_address = match hub.endpoints.get(&target) {
            Some(endpoint) if endpoint.listening.load(Ordering::SeqCst) => endpoint.address.clone(),
            _ => return Err(self.unreachable(address)),
        };
        if hub.partitions.lock().contains(&pair(self.peer, target)) {
            return Err(self.unreachable(address));
        }

        let added = hub.links.lock().insert(pair(self.peer, target));
        if added {
            trace!(from = %self.peer.short(), to = %target.short(), "Memory link up");
            hub.notify(
                self.peer,
                TransportEvent::PeerConnected {
                    peer_id: target,
                    address: target_address,
                },
            );
            hub.notify(
                target,
                TransportEvent::PeerConnected {
                    peer_id: self.peer,
                    address: self.address.clone(),
                },
            );
        }
        Ok(target)
    }

    async fn disconnect(&self, peer: PeerId) -> Result<()> {
        let hub = &self.network.hub;
        if hub.links.lock().remove(&pair(self.peer, peer)) {
            trace!(from = %self.peer.short(), to = %peer.short(), "Memory link down");
            hub.notify(self.peer, TransportEvent::PeerDisconnected { peer_id: peer });
            hub.notify(peer, TransportEvent::PeerDisconnected { peer_id: self.peer });
        }
        Ok(())
    }

    fn is_connected(&self, peer: PeerId) -> bool {
        self.network.is_linked(self.peer, peer)
    }

    async fn send(&self, peer: PeerId, frame: Bytes) -> Result<()> {
        let hub = &self.network.hub;
        let key = pair(self.peer, peer);
        if !hub.links.lock().contains(&key) || hub.partitions.lock().contains(&key) {
            return Err(self.unreachable(peer));
        }
        let endpoint = hub.endpoints.get(&peer).ok_or_else(|| self.unreachable(peer))?;
        endpoint
            .tx
            .send(TransportEvent::Frame {
                from: self.peer,
                data: frame,
            })
            .map_err(|_| self.unreachable(peer))
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.rx.lock().await.recv().await
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.unregister(self.peer);
    }
}
