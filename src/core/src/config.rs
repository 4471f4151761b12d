//! Configuration management.
//!
//! Every field has a default, so an empty environment yields a working seed
//! node. Environment variables use the `SWARMLINK` prefix with `__` between
//! path segments, e.g. `SWARMLINK__GOSSIP__MAX_HOPS=4`.

use crate::error::{Result, SwarmError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::telemetry::LoggingConfig;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub gossip: GossipConfig,

    #[serde(default)]
    pub pubsub: PubSubConfig,

    #[serde(default)]
    pub tasks: TasksConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Machine key file. When unset the machine key lives only in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_key_path: Option<PathBuf>,

    /// Agent key file. When unset every build gets a fresh agent identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_key_path: Option<PathBuf>,

    /// Contacts file. When unset contacts live only in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contacts_path: Option<PathBuf>,
}

/// Which identity a node uses as its network address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerIdentitySource {
    /// All agents on a machine share one network identity.
    #[default]
    Machine,
    /// Each agent is addressed individually.
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Addresses dialed on join. Empty means this node is a seed.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    /// Upper bound on a whole `join_network` call
    #[serde(default = "default_join_timeout", with = "humantime_serde")]
    pub join_timeout: Duration,

    /// Dial rounds before giving up
    #[serde(default = "default_bootstrap_rounds")]
    pub bootstrap_rounds: u32,

    /// Pause between dial rounds
    #[serde(default = "default_bootstrap_retry_delay", with = "humantime_serde")]
    pub bootstrap_retry_delay: Duration,

    #[serde(default)]
    pub peer_identity: PeerIdentitySource,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bootstrap_peers: Vec::new(),
            join_timeout: default_join_timeout(),
            bootstrap_rounds: default_bootstrap_rounds(),
            bootstrap_retry_delay: default_bootstrap_retry_delay(),
            peer_identity: PeerIdentitySource::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Largest payload `publish` accepts
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Neighbor set bound; extra peers are refused
    #[serde(default = "default_max_neighbors")]
    pub max_neighbors: usize,

    /// Relays stop once a message has travelled this many hops
    #[serde(default = "default_max_hops")]
    pub max_hops: u8,

    /// Number of message ids remembered for deduplication
    #[serde(default = "default_seen_cache_capacity")]
    pub seen_cache_capacity: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            max_neighbors: default_max_neighbors(),
            max_hops: default_max_hops(),
            seen_cache_capacity: default_seen_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubConfig {
    /// Per-subscription queue depth
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Full-state republish period. Zero disables anti-entropy.
    #[serde(default = "default_anti_entropy_interval", with = "humantime_serde")]
    pub anti_entropy_interval: Duration,

    #[serde(default = "default_priority")]
    pub default_priority: u8,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            anti_entropy_interval: default_anti_entropy_interval(),
            default_priority: default_priority(),
        }
    }
}

// Default value functions
fn default_join_timeout() -> Duration { Duration::from_secs(10) }
fn default_bootstrap_rounds() -> u32 { 3 }
fn default_bootstrap_retry_delay() -> Duration { Duration::from_millis(500) }
fn default_max_payload_bytes() -> usize { 1024 * 1024 }
fn default_max_neighbors() -> usize { 32 }
fn default_max_hops() -> u8 { 8 }
fn default_seen_cache_capacity() -> usize { 4096 }
fn default_queue_capacity() -> usize { 100 }
fn default_anti_entropy_interval() -> Duration { Duration::from_secs(30) }
fn default_priority() -> u8 { 128 }

const ENV_PREFIX: &str = "SWARMLINK";

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("network.bootstrap_peers")
        .try_parsing(true)
}

impl Config {
    /// Load configuration from the environment on top of defaults.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(environment())
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(environment())
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make the node unusable.
    pub fn validate(&self) -> Result<()> {
        if self.gossip.max_neighbors == 0 {
            return Err(SwarmError::configuration("gossip.max_neighbors must be at least 1"));
        }
        if self.gossip.max_hops == 0 {
            return Err(SwarmError::configuration("gossip.max_hops must be at least 1"));
        }
        if self.gossip.seen_cache_capacity == 0 {
            return Err(SwarmError::configuration(
                "gossip.seen_cache_capacity must be at least 1",
            ));
        }
        if self.pubsub.queue_capacity == 0 {
            return Err(SwarmError::configuration("pubsub.queue_capacity must be at least 1"));
        }
        if self.network.bootstrap_rounds == 0 {
            return Err(SwarmError::configuration(
                "network.bootstrap_rounds must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gossip.max_payload_bytes, 1024 * 1024);
        assert_eq!(config.gossip.max_hops, 8);
        assert_eq!(config.pubsub.queue_capacity, 100);
        assert_eq!(config.tasks.default_priority, 128);
        assert_eq!(config.network.peer_identity, PeerIdentitySource::Machine);
        assert!(config.network.bootstrap_peers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[network]
bootstrap_peers = ["mem://aa", "mem://bb"]
join_timeout = "2s"
peer_identity = "agent"

[gossip]
max_neighbors = 4

[tasks]
anti_entropy_interval = "0s"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.network.bootstrap_peers.len(), 2);
        assert_eq!(config.network.join_timeout, Duration::from_secs(2));
        assert_eq!(config.network.peer_identity, PeerIdentitySource::Agent);
        assert_eq!(config.gossip.max_neighbors, 4);
        assert_eq!(config.gossip.max_hops, 8);
        assert!(config.tasks.anti_entropy_interval.is_zero());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = Config::default();
        config.pubsub.queue_capacity = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.network.join_timeout, config.network.join_timeout);
    }
}
