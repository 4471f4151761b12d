#![allow(clippy::result_large_err)]
//! # Swarmlink Core
//!
//! Peer-to-peer agent mesh with topic gossip and a replicated task list.
//!
//! ## Architecture
//!
//! - **Identity**: Persistent machine keys, per-agent keys, 32-byte hex identifiers
//! - **Contacts**: Per-agent trust levels; blocked senders are filtered out of gossip
//! - **Events**: In-process callback registry for lifecycle and task events
//! - **Gossip**: Bounded neighbor set, topic interest routing, epidemic relay with dedup
//! - **PubSub**: Per-subscription bounded queues, cancellable receive, streams
//! - **CRDT**: Task list on an OR-Set with per-field conflict resolution
//! - **Agent**: Composition root, builder and network lifecycle
//! - **Telemetry**: Structured logging with key redaction, metric counters
//!
//! ## Example
//!
//! ```rust,no_run
//! use swarmlink_core::prelude::*;
//!
//! # async fn demo() -> swarmlink_core::Result<()> {
//! let network = MemoryNetwork::new();
//! let alice = Agent::builder().with_network(network.clone()).build().await?;
//! alice.join_network().await?;
//!
//! let bob = Agent::builder()
//!     .with_network(network)
//!     .with_bootstrap_peers([alice.address()])
//!     .build()
//!     .await?;
//! bob.join_network().await?;
//!
//! let tasks = alice.create_task_list("team-tasks").await?;
//! let id = tasks.add_task("Fix bug", "timeout").await?;
//!
//! // Replication is asynchronous; wait for the task to arrive before claiming.
//! let bob_tasks = bob.join_task_list("team-tasks").await?;
//! while bob_tasks.get_task(id).await.is_err() {
//!     tokio::time::sleep(std::time::Duration::from_millis(20)).await;
//! }
//! bob_tasks.claim_task(id).await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod contacts;
pub mod crdt;
pub mod error;
pub mod events;
pub mod gossip;
pub mod identity;
pub mod pubsub;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, SwarmError};

pub use agent::{Agent, AgentBuilder, NetworkState};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::agent::{Agent, AgentBuilder, NetworkState};
    pub use crate::config::{Config, PeerIdentitySource};
    pub use crate::contacts::{Contact, ContactStore, TrustLevel};
    pub use crate::crdt::{TaskItem, TaskList, TaskStatus};
    pub use crate::error::{ErrorCode, ErrorContext, Result, SwarmError};
    pub use crate::events::{AgentEvent, EventBus, EventCallback};
    pub use crate::gossip::{MemoryNetwork, Message, NeighborInfo, Transport, TransportEvent};
    pub use crate::identity::{
        derive_agent_identity, load_or_create_machine_identity, AgentId, MachineId, MessageId,
        PeerId, TaskId,
    };
    pub use crate::pubsub::{Subscription, SubscriptionCloser};
}
