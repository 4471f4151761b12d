//! The point-to-point substrate gossip runs on.
//!
//! Implementations deliver frames reliably and in order per link. Everything
//! above this trait (neighbor limits, topic routing, deduplication) lives in
//! [`GossipTransport`](super::GossipTransport).

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::identity::PeerId;

/// Something that happened on the substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A link came up, dialed by either side.
    PeerConnected { peer_id: PeerId, address: String },

    /// A link went down.
    PeerDisconnected { peer_id: PeerId },

    /// A frame arrived on a link.
    Frame { from: PeerId, data: Bytes },
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn local_peer(&self) -> PeerId;

    /// Address other nodes dial to reach this one.
    fn local_address(&self) -> String;

    /// Start accepting links.
    async fn listen(&self) -> Result<()>;

    /// Stop accepting links and drop every existing one.
    async fn shutdown(&self) -> Result<()>;

    /// Open a link and return the remote peer's id.
    async fn connect(&self, address: &str) -> Result<PeerId>;

    async fn disconnect(&self, peer: PeerId) -> Result<()>;

    /// Whether a link to `peer` is currently up.
    fn is_connected(&self, peer: PeerId) -> bool;

    async fn send(&self, peer: PeerId, frame: Bytes) -> Result<()>;

    /// Next event, or `None` once the transport is gone for good.
    ///
    /// Must be cancel safe: dropping the future loses no event.
    async fn next_event(&self) -> Option<TransportEvent>;
}
