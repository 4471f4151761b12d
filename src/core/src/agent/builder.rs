//! Agent construction.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use super::Agent;
use crate::config::Config;
use crate::contacts::ContactStore;
use crate::error::{ErrorCode, Result, SwarmError};
use crate::gossip::{MemoryNetwork, Transport};
use crate::identity::{
    derive_agent_identity, load_or_create_agent_identity, load_or_create_machine_identity,
    AgentKeypair, Identity, MachineKeypair, PeerId,
};

type TransportFactory = Box<dyn FnOnce(PeerId) -> Result<Arc<dyn Transport>> + Send>;

/// Builder for [`Agent`].
///
/// `build` takes the builder by value, so a builder cannot be used twice:
///
/// ```compile_fail
/// # async fn demo() -> swarmlink_core::Result<()> {
/// let builder = swarmlink_core::Agent::builder();
/// let first = builder.build().await?;
/// let second = builder.build().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct AgentBuilder {
    config: Option<Config>,
    machine_key: Option<MachineKeypair>,
    machine_key_path: Option<PathBuf>,
    agent_key: Option<AgentKeypair>,
    agent_seed: Option<[u8; 32]>,
    agent_key_path: Option<PathBuf>,
    bootstrap_peers: Vec<String>,
    contacts: Option<ContactStore>,
    transport: Option<TransportFactory>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this machine key instead of loading one.
    pub fn with_machine_key(mut self, key: MachineKeypair) -> Self {
        self.machine_key = Some(key);
        self
    }

    /// Load or create the machine key at `path`.
    pub fn with_machine_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.machine_key_path = Some(path.into());
        self
    }

    /// Import an existing agent keypair.
    pub fn with_agent_keypair(mut self, key: AgentKeypair) -> Self {
        self.agent_key = Some(key);
        self
    }

    /// Derive the agent keypair from a seed.
    pub fn with_agent_seed(mut self, seed: [u8; 32]) -> Self {
        self.agent_seed = Some(seed);
        self
    }

    /// Load or create the agent key at `path`.
    pub fn with_agent_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.agent_key_path = Some(path.into());
        self
    }

    /// Addresses to dial on join, in addition to any in the config.
    pub fn with_bootstrap_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bootstrap_peers.extend(peers.into_iter().map(Into::into));
        self
    }

    /// Share an existing contact store instead of opening
    /// `identity.contacts_path`.
    pub fn with_contacts(mut self, contacts: ContactStore) -> Self {
        self.contacts = Some(contacts);
        self
    }

    /// Create the transport once the node's [`PeerId`] is known.
    pub fn with_transport<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(PeerId) -> Result<Arc<dyn Transport>> + Send + 'static,
    {
        self.transport = Some(Box::new(factory));
        self
    }

    /// Attach to a shared in-memory network.
    pub fn with_network(self, network: MemoryNetwork) -> Self {
        self.with_transport(move |peer| {
            let transport: Arc<dyn Transport> = network.endpoint(peer)?;
            Ok(transport)
        })
    }

    /// Load identities and wire up the agent. Does not touch the network.
    ///
    /// # Errors
    ///
    /// `IoError` or `InvalidKeyMaterial` from key files, `SerializationError`
    /// from a corrupt contacts file, `ConfigurationError` for invalid
    /// settings or a transport that cannot be created.
    pub async fn build(self) -> Result<Agent> {
        let mut config = self.config.unwrap_or_default();
        config.validate()?;
        config.network.bootstrap_peers.extend(self.bootstrap_peers);

        let machine_key_path = self
            .machine_key_path
            .or_else(|| config.identity.machine_key_path.clone());
        let machine = match (self.machine_key, machine_key_path) {
            (Some(key), _) => key,
            (None, Some(path)) => {
                let (_, key) = blocking(move || load_or_create_machine_identity(&path)).await?;
                key
            }
            (None, None) => MachineKeypair::generate(),
        };

        let agent_key_path = self
            .agent_key_path
            .or_else(|| config.identity.agent_key_path.clone());
        let agent = match (self.agent_key, self.agent_seed, agent_key_path) {
            (Some(key), _, _) => key,
            (None, Some(seed), _) => derive_agent_identity(Some(seed)).1,
            (None, None, Some(path)) => {
                let (_, key) = blocking(move || load_or_create_agent_identity(&path)).await?;
                key
            }
            (None, None, None) => derive_agent_identity(None).1,
        };

        let contacts = match (self.contacts, config.identity.contacts_path.clone()) {
            (Some(contacts), _) => contacts,
            (None, Some(path)) => blocking(move || ContactStore::open(path)).await?,
            (None, None) => ContactStore::in_memory(),
        };

        let identity = Identity::new(machine, agent, config.network.peer_identity);
        let transport = match self.transport {
            Some(factory) => factory(identity.peer_id())?,
            None => {
                let transport: Arc<dyn Transport> =
                    MemoryNetwork::new().endpoint(identity.peer_id())?;
                transport
            }
        };

        debug!(
            machine_id = %identity.machine_id().short(),
            agent_id = %identity.agent_id().short(),
            peer_id = %identity.peer_id().short(),
            "Agent built"
        );
        Ok(Agent::assemble(identity, config, contacts, transport))
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        SwarmError::new(ErrorCode::InternalError, "Identity task failed").with_source(e)
    })?
}

impl std::fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("machine_key_path", &self.machine_key_path)
            .field("agent_key_path", &self.agent_key_path)
            .field("bootstrap_peers", &self.bootstrap_peers)
            .field("contacts", &self.contacts)
            .field("custom_transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}
