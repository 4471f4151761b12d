//! Machine and agent identity.
//!
//! A machine key is long-lived and usually persisted; agent keys are cheap and
//! fresh by default. The node's [`PeerId`] comes from one of the two,
//! selected by [`PeerIdentitySource`].

mod ids;
mod keys;
mod store;

pub use ids::{decode_id_hex, AgentId, MachineId, MessageId, PeerId, TaskId, ID_LEN};
pub use keys::{AgentKeypair, MachineKeypair};
pub use store::{load_or_create_agent_identity, load_or_create_machine_identity};

use crate::config::PeerIdentitySource;

/// Create an agent identity. A seed makes it deterministic.
pub fn derive_agent_identity(seed: Option<[u8; 32]>) -> (AgentId, AgentKeypair) {
    let key = match seed {
        Some(seed) => AgentKeypair::from_secret_bytes(&seed),
        None => AgentKeypair::generate(),
    };
    (key.id(), key)
}

/// Everything a running agent knows about who it is.
#[derive(Debug, Clone)]
pub struct Identity {
    machine: MachineKeypair,
    agent: AgentKeypair,
    peer_id: PeerId,
}

impl Identity {
    pub fn new(machine: MachineKeypair, agent: AgentKeypair, source: PeerIdentitySource) -> Self {
        let peer_id = match source {
            PeerIdentitySource::Machine => PeerId::from_machine(machine.id()),
            PeerIdentitySource::Agent => PeerId::from_agent(agent.id()),
        };
        Self {
            machine,
            agent,
            peer_id,
        }
    }

    pub fn machine_id(&self) -> MachineId {
        self.machine.id()
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent.id()
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn machine_keypair(&self) -> &MachineKeypair {
        &self.machine
    }

    pub fn agent_keypair(&self) -> &AgentKeypair {
        &self.agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_agent_identity() {
        let (a, _) = derive_agent_identity(None);
        let (b, _) = derive_agent_identity(None);
        assert_ne!(a, b);

        let (c, _) = derive_agent_identity(Some([3u8; 32]));
        let (d, _) = derive_agent_identity(Some([3u8; 32]));
        assert_eq!(c, d);
    }

    #[test]
    fn test_peer_id_source() {
        let machine = MachineKeypair::generate();
        let agent = AgentKeypair::generate();

        let by_machine = Identity::new(machine.clone(), agent.clone(), PeerIdentitySource::Machine);
        assert_eq!(by_machine.peer_id().as_bytes(), machine.id().as_bytes());

        let by_agent = Identity::new(machine, agent.clone(), PeerIdentitySource::Agent);
        assert_eq!(by_agent.peer_id().as_bytes(), agent.id().as_bytes());
    }
}
