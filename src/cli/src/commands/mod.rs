pub mod config;
pub mod contacts;
pub mod identity;
pub mod simulate;

use anyhow::{Context, Result};
use std::path::PathBuf;

/// `~/.swarmlink`, where the CLI keeps keys and configuration.
pub fn home_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".swarmlink"))
}
