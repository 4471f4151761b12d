//! Gossip messages and the frames that carry them between neighbors.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::identity::{AgentId, MessageId, PeerId};

// ═══════════════════════════════════════════════════════════════════════════════
// Message
// ═══════════════════════════════════════════════════════════════════════════════

/// One published payload on a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub topic: String,
    #[serde(with = "base64_bytes")]
    pub payload: Bytes,
    /// Agent that called `publish`
    pub sender: AgentId,
    /// Node the message entered the mesh at
    pub origin: PeerId,
    pub timestamp: DateTime<Utc>,
    /// Links travelled so far. Zero at the origin.
    pub hops: u8,
}

impl Message {
    pub fn new(origin: PeerId, sender: AgentId, seq: u64, topic: String, payload: Bytes) -> Self {
        let id = Self::compute_id(origin, seq, &topic, &payload);
        Self {
            id,
            topic,
            payload,
            sender,
            origin,
            timestamp: Utc::now(),
            hops: 0,
        }
    }

    /// SHA-256 over origin, sequence number, topic and payload. The topic is
    /// length-prefixed so topic/payload boundaries cannot collide.
    pub fn compute_id(origin: PeerId, seq: u64, topic: &str, payload: &[u8]) -> MessageId {
        let mut hasher = Sha256::new();
        hasher.update(origin.as_bytes());
        hasher.update(seq.to_be_bytes());
        hasher.update((topic.len() as u64).to_be_bytes());
        hasher.update(topic.as_bytes());
        hasher.update(payload);
        MessageId::from_bytes(hasher.finalize().into())
    }

    /// Copy for the next link.
    pub fn forwarded(&self) -> Self {
        let mut next = self.clone();
        next.hops = next.hops.saturating_add(1);
        next
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Frames
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything neighbors say to each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Full set of topics the sender wants from the receiver.
    Announce { topics: Vec<String> },

    Publish { message: Message },
}

impl Frame {
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Announce { .. } => "announce",
            Frame::Publish { .. } => "publish",
        }
    }
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Bytes, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(s.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
