//! Topic interest bookkeeping.
//!
//! Each node tells every neighbor which topics it wants from that neighbor:
//! its own subscriptions plus whatever its *other* neighbors asked for. Not
//! echoing a neighbor's own topics back to it (split horizon) keeps a plain
//! line or tree of nodes from advertising interest that nobody has.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::identity::PeerId;

/// Local subscriptions, neighbor interests, and what was last advertised.
#[derive(Debug, Default)]
pub struct TopicTable {
    /// Topics with at least one local subscription
    local: HashSet<String>,
    /// Topics each neighbor asked for
    neighbor_topics: HashMap<PeerId, HashSet<String>>,
    /// Index of topic to interested neighbors (for fast routing)
    topic_neighbors: HashMap<String, HashSet<PeerId>>,
    /// Last advertisement sent to each neighbor
    advertised: HashMap<PeerId, BTreeSet<String>>,
}

impl TopicTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the topic was not already local.
    pub fn add_local(&mut self, topic: &str) -> bool {
        self.local.insert(topic.to_string())
    }

    pub fn remove_local(&mut self, topic: &str) -> bool {
        self.local.remove(topic)
    }

    pub fn is_local(&self, topic: &str) -> bool {
        self.local.contains(topic)
    }

    pub fn local_topics(&self) -> BTreeSet<String> {
        self.local.iter().cloned().collect()
    }

    /// Replace a neighbor's interest set. Returns whether it changed.
    pub fn set_neighbor_topics<I>(&mut self, peer: PeerId, topics: I) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        let new: HashSet<String> = topics.into_iter().collect();
        let old = self.neighbor_topics.remove(&peer).unwrap_or_default();
        let changed = old != new;

        for topic in old.difference(&new) {
            if let Some(peers) = self.topic_neighbors.get_mut(topic) {
                peers.remove(&peer);
                if peers.is_empty() {
                    self.topic_neighbors.remove(topic);
                }
            }
        }
        for topic in new.difference(&old) {
            self.topic_neighbors
                .entry(topic.clone())
                .or_default()
                .insert(peer);
        }

        self.neighbor_topics.insert(peer, new);
        changed
    }

    /// Forget a neighbor entirely. Returns whether it had any interest.
    pub fn remove_neighbor(&mut self, peer: PeerId) -> bool {
        self.advertised.remove(&peer);
        let had_topics = self.set_neighbor_topics(peer, std::iter::empty());
        self.neighbor_topics.remove(&peer);
        had_topics
    }

    /// Neighbors that asked for `topic`, minus `except`, in stable order.
    pub fn interested(&self, topic: &str, except: Option<PeerId>) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .topic_neighbors
            .get(topic)
            .map(|peers| {
                peers
                    .iter()
                    .copied()
                    .filter(|p| Some(*p) != except)
                    .collect()
            })
            .unwrap_or_default();
        peers.sort();
        peers
    }

    pub fn topics_of(&self, peer: PeerId) -> BTreeSet<String> {
        self.neighbor_topics
            .get(&peer)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// What `peer` should be told we want.
    pub fn advertisement_for(&self, peer: PeerId) -> BTreeSet<String> {
        let mut topics: BTreeSet<String> = self.local.iter().cloned().collect();
        for (other, wanted) in &self.neighbor_topics {
            if *other != peer {
                topics.extend(wanted.iter().cloned());
            }
        }
        topics
    }

    /// Advertisements that differ from what each neighbor last heard.
    ///
    /// A neighbor that has never been told anything always gets one, even if
    /// it is empty. The returned sets are recorded as sent.
    pub fn pending_advertisements<I>(&mut self, neighbors: I) -> Vec<(PeerId, Vec<String>)>
    where
        I: IntoIterator<Item = PeerId>,
    {
        let mut out = Vec::new();
        for peer in neighbors {
            let ad = self.advertisement_for(peer);
            if self.advertised.get(&peer) != Some(&ad) {
                out.push((peer, ad.iter().cloned().collect()));
                self.advertised.insert(peer, ad);
            }
        }
        out
    }

    /// Drop everything learned from neighbors. Local topics survive.
    pub fn clear_neighbors(&mut self) {
        self.neighbor_topics.clear();
        self.topic_neighbors.clear();
        self.advertised.clear();
    }
}
