//! ed25519 keypairs for machines and agents.

use super::ids::{AgentId, MachineId};
use crate::telemetry::SensitiveFieldRedactor;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;

macro_rules! define_keypair {
    ($(#[$meta:meta])* $name:ident => $id:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            signing: SigningKey,
        }

        impl $name {
            /// Fresh keypair from the OS RNG.
            pub fn generate() -> Self {
                Self {
                    signing: SigningKey::generate(&mut OsRng),
                }
            }

            /// Deterministic keypair from a 32-byte secret.
            pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
                Self {
                    signing: SigningKey::from_bytes(secret),
                }
            }

            pub fn secret_bytes(&self) -> [u8; 32] {
                self.signing.to_bytes()
            }

            pub fn verifying_key(&self) -> VerifyingKey {
                self.signing.verifying_key()
            }

            pub fn public_key_bytes(&self) -> [u8; 32] {
                self.signing.verifying_key().to_bytes()
            }

            pub fn id(&self) -> $id {
                $id::from_public_key(&self.public_key_bytes())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let redactor = SensitiveFieldRedactor::global();
                f.debug_struct(stringify!($name))
                    .field("id", &self.id())
                    .field(
                        "secret_key",
                        &redactor.redact("secret_key", &hex::encode(self.secret_bytes())),
                    )
                    .finish()
            }
        }
    };
}

define_keypair!(
    /// Long-lived machine key, normally persisted to disk.
    MachineKeypair => MachineId
);

define_keypair!(
    /// Per-agent key. Fresh on every build unless a seed or key file is given.
    AgentKeypair => AgentId
);
