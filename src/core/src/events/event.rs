//! Events emitted by an agent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crdt::TaskStatus;
use crate::identity::{AgentId, PeerId, TaskId};

// =============================================================================
// Event Names
// =============================================================================

pub const CONNECTED: &str = "connected";
pub const DISCONNECTED: &str = "disconnected";
pub const PEER_JOINED: &str = "peer_joined";
pub const PEER_LEFT: &str = "peer_left";
pub const TASK_UPDATED: &str = "task_updated";

// =============================================================================
// Event Enumeration
// =============================================================================

/// Everything the [`EventBus`](super::EventBus) dispatches.
///
/// Lifecycle and task events are typed. Anything else travels as
/// [`AgentEvent::Custom`] with a free-form map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The local node reached Connected.
    Connected { peer_id: PeerId },

    /// The local node left the network.
    Disconnected { peer_id: PeerId },

    /// A neighbor link came up.
    PeerJoined { peer_id: PeerId, address: String },

    /// A neighbor link went down.
    PeerLeft { peer_id: PeerId },

    /// A task's status or assignee changed, locally or by merge.
    TaskUpdated {
        task_id: TaskId,
        status: TaskStatus,
        assignee: Option<AgentId>,
    },

    Custom {
        name: String,
        #[serde(default)]
        data: Map<String, Value>,
    },
}

impl AgentEvent {
    pub fn custom(name: impl Into<String>, data: Map<String, Value>) -> Self {
        Self::Custom {
            name: name.into(),
            data,
        }
    }

    /// Name callbacks are registered under.
    pub fn name(&self) -> &str {
        match self {
            AgentEvent::Connected { .. } => CONNECTED,
            AgentEvent::Disconnected { .. } => DISCONNECTED,
            AgentEvent::PeerJoined { .. } => PEER_JOINED,
            AgentEvent::PeerLeft { .. } => PEER_LEFT,
            AgentEvent::TaskUpdated { .. } => TASK_UPDATED,
            AgentEvent::Custom { name, .. } => name,
        }
    }

    /// Key/value view of the payload. Identifiers appear as hex strings.
    pub fn data(&self) -> Map<String, Value> {
        let mut map = Map::new();
        match self {
            AgentEvent::Connected { peer_id }
            | AgentEvent::Disconnected { peer_id }
            | AgentEvent::PeerLeft { peer_id } => {
                map.insert("peer_id".into(), Value::String(peer_id.to_hex()));
            }
            AgentEvent::PeerJoined { peer_id, address } => {
                map.insert("peer_id".into(), Value::String(peer_id.to_hex()));
                map.insert("address".into(), Value::String(address.clone()));
            }
            AgentEvent::TaskUpdated {
                task_id,
                status,
                assignee,
            } => {
                map.insert("task_id".into(), Value::String(task_id.to_hex()));
                map.insert("status".into(), Value::String(status.as_str().into()));
                map.insert(
                    "assignee".into(),
                    assignee
                        .map(|a| Value::String(a.to_hex()))
                        .unwrap_or(Value::Null),
                );
            }
            AgentEvent::Custom { data, .. } => return data.clone(),
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let peer = PeerId::from_bytes([1; 32]);
        assert_eq!(AgentEvent::Connected { peer_id: peer }.name(), "connected");
        assert_eq!(AgentEvent::PeerLeft { peer_id: peer }.name(), "peer_left");
        assert_eq!(AgentEvent::custom("deploy", Map::new()).name(), "deploy");
    }

    #[test]
    fn test_task_updated_data() {
        let event = AgentEvent::TaskUpdated {
            task_id: TaskId::from_bytes([2; 32]),
            status: TaskStatus::Claimed,
            assignee: Some(AgentId::from_bytes([3; 32])),
        };
        let data = event.data();
        assert_eq!(data["status"], "claimed");
        assert_eq!(data["task_id"], "02".repeat(32));
        assert_eq!(data["assignee"], "03".repeat(32));
    }

    #[test]
    fn test_custom_data_passthrough() {
        let mut data = Map::new();
        data.insert("k".into(), Value::from(1));
        let event = AgentEvent::custom("x", data.clone());
        assert_eq!(event.data(), data);
    }

    #[test]
    fn test_serialized_tag() {
        let event = AgentEvent::PeerJoined {
            peer_id: PeerId::from_bytes([4; 32]),
            address: "mem://x".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "peer_joined");
        assert_eq!(json["address"], "mem://x");
    }
}
