//! Topic-routed gossip between neighbors.
//!
//! The [`Transport`] trait is the seam to the wire. [`MemoryNetwork`] provides
//! an in-process implementation used by tests, benches and the simulator.

pub mod memory;
pub mod message;
pub mod relay;
pub mod seen;
pub mod topics;
pub mod transport;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use message::{Frame, Message};
pub use relay::{GossipStats, GossipTransport, MessageSink, NeighborInfo};
pub use seen::SeenCache;
pub use topics::TopicTable;
pub use transport::{Transport, TransportEvent};
