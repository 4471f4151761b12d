//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use swarmlink_core::config::Config;
use swarmlink_core::events::AgentEvent;
use swarmlink_core::gossip::MemoryNetwork;
use swarmlink_core::Agent;

/// Poll `check` until it returns true or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Config with fast retries and anti-entropy off.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.network.join_timeout = Duration::from_secs(5);
    config.network.bootstrap_retry_delay = Duration::from_millis(10);
    config.tasks.anti_entropy_interval = Duration::ZERO;
    config
}

/// A connected seed agent on `network`.
pub async fn seed(network: &MemoryNetwork) -> Agent {
    let agent = Agent::builder()
        .with_network(network.clone())
        .with_config(test_config())
        .build()
        .await
        .unwrap();
    agent.join_network().await.unwrap();
    agent
}

/// A connected agent bootstrapped from `peers`.
pub async fn joined(network: &MemoryNetwork, peers: &[&Agent]) -> Agent {
    let agent = Agent::builder()
        .with_network(network.clone())
        .with_config(test_config())
        .with_bootstrap_peers(peers.iter().map(|p| p.address()))
        .build()
        .await
        .unwrap();
    agent.join_network().await.unwrap();
    agent
}

/// Wait until `agent` has a neighbor that asked for `topic`.
pub async fn wait_for_interest(agent: &Agent, topic: &str) -> bool {
    eventually(|| async move { agent.neighbors().iter().any(|n| n.topics.contains(topic)) }).await
}

/// Records every event emitted under the given names.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<AgentEvent>>>,
}

impl EventLog {
    pub fn attach(agent: &Agent, names: &[&str]) -> Self {
        let log = Self::default();
        for name in names {
            let sink = log.events.clone();
            agent.on(*name, move |event| {
                sink.lock().push(event.clone());
                Ok(())
            });
        }
        log
    }

    pub fn snapshot(&self) -> Vec<AgentEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }
}
