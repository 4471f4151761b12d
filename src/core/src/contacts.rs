//! Trust levels for other agents.
//!
//! Gossip consults the store for every inbound message. Messages whose
//! sender is [`TrustLevel::Blocked`] are dropped and never relayed; the other
//! levels are informational. A store opened from a file writes every change
//! through to it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{ErrorCode, Result, SwarmError};
use crate::identity::AgentId;

const CONTACTS_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Messages are dropped and not relayed
    Blocked,
    #[default]
    Unknown,
    Known,
    Trusted,
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Blocked => "blocked",
            Self::Unknown => "unknown",
            Self::Known => "known",
            Self::Trusted => "trusted",
        };
        f.write_str(name)
    }
}

impl FromStr for TrustLevel {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "blocked" => Ok(Self::Blocked),
            "unknown" => Ok(Self::Unknown),
            "known" => Ok(Self::Known),
            "trusted" => Ok(Self::Trusted),
            _ => Err(SwarmError::configuration(format!("Invalid trust level: {}", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub agent_id: AgentId,
    pub trust_level: TrustLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(agent_id: AgentId, trust_level: TrustLevel) -> Self {
        Self {
            agent_id,
            trust_level,
            label: None,
            added_at: Utc::now(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Serialize, Deserialize)]
struct ContactsFile {
    version: u32,
    contacts: Vec<Contact>,
}

#[derive(Default)]
struct Inner {
    contacts: HashMap<AgentId, Contact>,
    path: Option<PathBuf>,
}

/// Shared contact list. Clones see the same contacts.
#[derive(Clone, Default)]
pub struct ContactStore {
    inner: Arc<RwLock<Inner>>,
}

impl ContactStore {
    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the contacts at `path`. A missing file gives an empty store that
    /// creates the file on the first change.
    ///
    /// # Errors
    ///
    /// `IoError` when the file cannot be read, `SerializationError` when it
    /// is not a contacts file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let contacts = match fs::read(&path) {
            Ok(bytes) => {
                let file: ContactsFile = serde_json::from_slice(&bytes).map_err(|e| {
                    SwarmError::from(e).with_context("path", path.display().to_string())
                })?;
                if file.version != CONTACTS_FILE_VERSION {
                    return Err(SwarmError::new(
                        ErrorCode::SerializationError,
                        format!("Unsupported contacts file version {}", file.version),
                    ));
                }
                file.contacts
                    .into_iter()
                    .map(|c| (c.agent_id, c))
                    .collect()
            }
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(SwarmError::from(e).with_context("path", path.display().to_string()))
            }
        };
        debug!(path = %path.display(), contacts = contacts.len(), "Loaded contacts");

        Ok(Self {
            inner: Arc::new(RwLock::new(Inner {
                contacts,
                path: Some(path),
            })),
        })
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<PathBuf> {
        self.inner.read().path.clone()
    }

    /// Insert or replace a contact.
    ///
    /// The in-memory change stands even when writing the file fails.
    pub fn add(&self, contact: Contact) -> Result<()> {
        let mut inner = self.inner.write();
        info!(agent_id = %contact.agent_id.short(), trust = %contact.trust_level, "Contact added");
        inner.contacts.insert(contact.agent_id, contact);
        save(&inner)
    }

    /// Set the trust level, adding the contact if it is new.
    pub fn set_trust(&self, agent_id: AgentId, trust_level: TrustLevel) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .contacts
            .entry(agent_id)
            .and_modify(|c| c.trust_level = trust_level)
            .or_insert_with(|| Contact::new(agent_id, trust_level));
        info!(agent_id = %agent_id.short(), trust = %trust_level, "Trust level set");
        save(&inner)
    }

    pub fn remove(&self, agent_id: &AgentId) -> Result<Option<Contact>> {
        let mut inner = self.inner.write();
        let removed = inner.contacts.remove(agent_id);
        if removed.is_some() {
            save(&inner)?;
        }
        Ok(removed)
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<Contact> {
        self.inner.read().contacts.get(agent_id).cloned()
    }

    /// All contacts, by agent id.
    pub fn list(&self) -> Vec<Contact> {
        let mut list: Vec<Contact> = self.inner.read().contacts.values().cloned().collect();
        list.sort_by_key(|c| c.agent_id);
        list
    }

    /// `Unknown` for agents not in the store.
    pub fn trust_level(&self, agent_id: &AgentId) -> TrustLevel {
        self.inner
            .read()
            .contacts
            .get(agent_id)
            .map(|c| c.trust_level)
            .unwrap_or_default()
    }

    pub fn is_blocked(&self, agent_id: &AgentId) -> bool {
        self.trust_level(agent_id) == TrustLevel::Blocked
    }

    pub fn is_trusted(&self, agent_id: &AgentId) -> bool {
        self.trust_level(agent_id) == TrustLevel::Trusted
    }

    pub fn len(&self) -> usize {
        self.inner.read().contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ContactStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ContactStore")
            .field("path", &inner.path)
            .field("contacts", &inner.contacts.len())
            .finish()
    }
}

/// Replace the backing file, if any, with the current contacts.
fn save(inner: &Inner) -> Result<()> {
    let Some(path) = &inner.path else {
        return Ok(());
    };
    let mut contacts: Vec<Contact> = inner.contacts.values().cloned().collect();
    contacts.sort_by_key(|c| c.agent_id);
    let body = serde_json::to_vec_pretty(&ContactsFile {
        version: CONTACTS_FILE_VERSION,
        contacts,
    })?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(&body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| SwarmError::from(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(n: u8) -> AgentId {
        AgentId::from_bytes([n; 32])
    }

    #[test]
    fn test_trust_level_parse() {
        for level in [
            TrustLevel::Blocked,
            TrustLevel::Unknown,
            TrustLevel::Known,
            TrustLevel::Trusted,
        ] {
            assert_eq!(level.to_string().parse::<TrustLevel>().unwrap(), level);
        }
        assert_eq!("TRUSTED".parse::<TrustLevel>().unwrap(), TrustLevel::Trusted);

        let err = "friendly".parse::<TrustLevel>().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
    }

    #[test]
    fn test_unknown_by_default() {
        let store = ContactStore::in_memory();
        assert_eq!(store.trust_level(&agent(1)), TrustLevel::Unknown);
        assert!(!store.is_blocked(&agent(1)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_trust_and_remove() {
        let store = ContactStore::in_memory();
        store.set_trust(agent(1), TrustLevel::Known).unwrap();
        store.set_trust(agent(1), TrustLevel::Blocked).unwrap();
        assert!(store.is_blocked(&agent(1)));
        assert_eq!(store.len(), 1);

        store.add(Contact::new(agent(2), TrustLevel::Trusted).with_label("ops")).unwrap();
        assert!(store.is_trusted(&agent(2)));
        assert_eq!(store.list().len(), 2);

        let removed = store.remove(&agent(1)).unwrap().unwrap();
        assert_eq!(removed.trust_level, TrustLevel::Blocked);
        assert!(store.remove(&agent(1)).unwrap().is_none());
        assert_eq!(store.trust_level(&agent(1)), TrustLevel::Unknown);
    }

    #[test]
    fn test_clones_share_contacts() {
        let store = ContactStore::in_memory();
        let clone = store.clone();
        store.set_trust(agent(3), TrustLevel::Blocked).unwrap();
        assert!(clone.is_blocked(&agent(3)));
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("contacts.json");

        let store = ContactStore::open(&path).unwrap();
        assert!(store.is_empty());
        store.add(Contact::new(agent(1), TrustLevel::Trusted).with_label("ci")).unwrap();
        store.set_trust(agent(2), TrustLevel::Blocked).unwrap();
        assert!(path.exists());

        let reopened = ContactStore::open(&path).unwrap();
        assert_eq!(reopened.list(), store.list());
        assert_eq!(reopened.get(&agent(1)).unwrap().label.as_deref(), Some("ci"));
        assert!(reopened.is_blocked(&agent(2)));
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contacts.json");
        fs::write(&path, b"not json").unwrap();

        let err = ContactStore::open(&path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SerializationError);
    }
}
