//! 32-byte identifiers with a lowercase hex text form.

use crate::error::{Result, SwarmError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Byte length shared by every identifier type.
pub const ID_LEN: usize = 32;

/// Decode a hex string into exactly [`ID_LEN`] bytes.
///
/// Accepts upper and lower case. Non-hex characters and odd-length input
/// are encoding errors; a well-formed string of the wrong size is a length
/// error.
pub fn decode_id_hex(input: &str) -> Result<[u8; ID_LEN]> {
    let bytes = hex::decode(input).map_err(|e| {
        SwarmError::invalid_hex(input).with_context("reason", e.to_string())
    })?;
    <[u8; ID_LEN]>::try_from(bytes.as_slice())
        .map_err(|_| SwarmError::invalid_length(ID_LEN, bytes.len()))
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; ID_LEN]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
                Self(bytes)
            }

            pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(input: &str) -> Result<Self> {
                decode_id_hex(input).map(Self)
            }

            /// First eight hex characters, for log lines.
            pub fn short(&self) -> String {
                hex::encode(&self.0[..4])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.short())
            }
        }

        impl FromStr for $name {
            type Err = SwarmError;

            fn from_str(s: &str) -> Result<Self> {
                Self::from_hex(s)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = SwarmError;

            fn try_from(bytes: &[u8]) -> Result<Self> {
                <[u8; ID_LEN]>::try_from(bytes)
                    .map(Self)
                    .map_err(|_| SwarmError::invalid_length(ID_LEN, bytes.len()))
            }
        }

        impl From<[u8; ID_LEN]> for $name {
            fn from(bytes: [u8; ID_LEN]) -> Self {
                Self(bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

define_id!(
    /// Stable identity of a machine: SHA-256 of its ed25519 public key.
    MachineId
);

define_id!(
    /// Identity of one agent: SHA-256 of the agent's ed25519 public key.
    AgentId
);

define_id!(
    /// Network address of a node. Equal to either the machine or the agent
    /// id, depending on `network.peer_identity`.
    PeerId
);

define_id!(
    /// Identifier of a task, random at creation.
    TaskId
);

define_id!(
    /// Content hash of a gossip message, used for deduplication.
    MessageId
);

impl MachineId {
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        Self(sha256(public_key))
    }
}

impl AgentId {
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        Self(sha256(public_key))
    }
}

impl PeerId {
    pub fn from_machine(id: MachineId) -> Self {
        Self(id.0)
    }

    pub fn from_agent(id: AgentId) -> Self {
        Self(id.0)
    }
}

impl TaskId {
    /// Fresh random id from the OS RNG.
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; ID_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

pub(crate) fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
