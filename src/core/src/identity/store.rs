//! Key file persistence.
//!
//! A key file is a small JSON document:
//!
//! ```json
//! { "version": 1, "secret_key": "<64 hex>", "machine_id": "<64 hex>" }
//! ```
//!
//! Agent key files carry `agent_id` instead of `machine_id`. New files are
//! written to a temp file in the target directory and linked into place
//! without clobbering, so concurrent creators converge on whichever file
//! landed first.

use super::ids::{decode_id_hex, AgentId, MachineId};
use super::keys::{AgentKeypair, MachineKeypair};
use crate::error::{ErrorCode, Result, SwarmError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};

const KEY_FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    version: u32,
    secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    machine_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent_id: Option<String>,
}

trait StoredKey: Sized {
    const LABEL: &'static str;

    fn generate() -> Self;
    fn from_secret(secret: &[u8; 32]) -> Self;
    fn secret(&self) -> [u8; 32];
    fn id_hex(&self) -> String;
    fn stored_id(file: &KeyFile) -> Option<&str>;
    fn with_id(file: KeyFile, id: String) -> KeyFile;
}

impl StoredKey for MachineKeypair {
    const LABEL: &'static str = "machine";

    fn generate() -> Self {
        MachineKeypair::generate()
    }
    fn from_secret(secret: &[u8; 32]) -> Self {
        MachineKeypair::from_secret_bytes(secret)
    }
    fn secret(&self) -> [u8; 32] {
        self.secret_bytes()
    }
    fn id_hex(&self) -> String {
        self.id().to_hex()
    }
    fn stored_id(file: &KeyFile) -> Option<&str> {
        file.machine_id.as_deref()
    }
    fn with_id(mut file: KeyFile, id: String) -> KeyFile {
        file.machine_id = Some(id);
        file
    }
}

impl StoredKey for AgentKeypair {
    const LABEL: &'static str = "agent";

    fn generate() -> Self {
        AgentKeypair::generate()
    }
    fn from_secret(secret: &[u8; 32]) -> Self {
        AgentKeypair::from_secret_bytes(secret)
    }
    fn secret(&self) -> [u8; 32] {
        self.secret_bytes()
    }
    fn id_hex(&self) -> String {
        self.id().to_hex()
    }
    fn stored_id(file: &KeyFile) -> Option<&str> {
        file.agent_id.as_deref()
    }
    fn with_id(mut file: KeyFile, id: String) -> KeyFile {
        file.agent_id = Some(id);
        file
    }
}

/// Load the machine identity at `path`, creating it if absent.
///
/// # Errors
///
/// `IoError` when the parent directory is missing or unwritable,
/// `InvalidKeyMaterial` when an existing file is corrupt.
pub fn load_or_create_machine_identity(path: &Path) -> Result<(MachineId, MachineKeypair)> {
    let key: MachineKeypair = load_or_create(path)?;
    Ok((key.id(), key))
}

/// Load the agent identity at `path`, creating it if absent.
pub fn load_or_create_agent_identity(path: &Path) -> Result<(AgentId, AgentKeypair)> {
    let key: AgentKeypair = load_or_create(path)?;
    Ok((key.id(), key))
}

fn load_or_create<K: StoredKey>(path: &Path) -> Result<K> {
    match fs::read(path) {
        Ok(bytes) => {
            let key = parse::<K>(&bytes)?;
            debug!(kind = K::LABEL, path = %path.display(), "Loaded key file");
            return Ok(key);
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(SwarmError::from(e).with_context("path", path.display().to_string())),
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(SwarmError::new(
            ErrorCode::IoError,
            format!("Key directory does not exist: {}", parent.display()),
        ));
    }

    let key = K::generate();
    let file = K::with_id(
        KeyFile {
            version: KEY_FILE_VERSION,
            secret_key: hex::encode(key.secret()),
            machine_id: None,
            agent_id: None,
        },
        key.id_hex(),
    );
    let body = serde_json::to_vec_pretty(&file)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    restrict_permissions(tmp.as_file())?;
    tmp.write_all(&body)?;
    tmp.as_file().sync_all()?;

    match tmp.persist_noclobber(path) {
        Ok(_) => {
            info!(kind = K::LABEL, path = %path.display(), "Generated new key file");
            Ok(key)
        }
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
            debug!(kind = K::LABEL, path = %path.display(), "Lost key file creation race, re-reading");
            parse::<K>(&fs::read(path)?)
        }
        Err(e) => Err(e.error.into()),
    }
}

fn parse<K: StoredKey>(bytes: &[u8]) -> Result<K> {
    let file: KeyFile = serde_json::from_slice(bytes)
        .map_err(|e| SwarmError::invalid_key_material(format!("not a key file: {}", e)))?;

    if file.version != KEY_FILE_VERSION {
        return Err(SwarmError::invalid_key_material(format!(
            "unsupported version {}",
            file.version
        )));
    }

    let secret = decode_id_hex(&file.secret_key)
        .map_err(|e| SwarmError::invalid_key_material(format!("secret_key: {}", e.message())))?;
    let key = K::from_secret(&secret);

    let stored = K::stored_id(&file)
        .ok_or_else(|| SwarmError::invalid_key_material(format!("missing {}_id", K::LABEL)))?;
    let stored = decode_id_hex(stored)
        .map_err(|e| SwarmError::invalid_key_material(format!("{}_id: {}", K::LABEL, e.message())))?;
    if hex::encode(stored) != key.id_hex() {
        return Err(SwarmError::invalid_key_material(format!(
            "{}_id does not match secret_key",
            K::LABEL
        )));
    }

    Ok(key)
}

#[cfg(unix)]
fn restrict_permissions(file: &fs::File) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &fs::File) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_create_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine.key");

        let (first, _) = load_or_create_machine_identity(&path).unwrap();
        assert!(path.exists());
        let (second, _) = load_or_create_machine_identity(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine.key");
        let (id, key) = load_or_create_machine_identity(&path).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["machine_id"], id.to_hex());
        assert_eq!(json["secret_key"], hex::encode(key.secret_bytes()));
        assert!(json.get("agent_id").is_none());
    }

    #[test]
    fn test_missing_parent_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("machine.key");
        let err = load_or_create_machine_identity(&path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IoError);
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine.key");
        fs::write(&path, b"not json").unwrap();
        let err = load_or_create_machine_identity(&path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidKeyMaterial);
    }

    #[test]
    fn test_mismatched_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine.key");
        let body = serde_json::json!({
            "version": 1,
            "secret_key": "11".repeat(32),
            "machine_id": "22".repeat(32),
        });
        fs::write(&path, body.to_string()).unwrap();
        let err = load_or_create_machine_identity(&path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidKeyMaterial);
    }

    #[test]
    fn test_agent_file_uses_agent_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.key");
        let (id, _) = load_or_create_agent_identity(&path).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["agent_id"], id.to_hex());

        // A machine loader must not accept an agent file.
        let err = load_or_create_machine_identity(&path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidKeyMaterial);
    }

    #[test]
    fn test_concurrent_creators_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = Arc::new(dir.path().join("machine.key"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = Arc::clone(&path);
                std::thread::spawn(move || load_or_create_machine_identity(&path).unwrap().0)
            })
            .collect();

        let ids: Vec<MachineId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(load_or_create_machine_identity(&path).unwrap().0, ids[0]);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_mode_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine.key");
        load_or_create_machine_identity(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
