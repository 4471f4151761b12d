//! Identity commands.
//!
//! The machine key lives in `~/.swarmlink/machine.key` unless `--key` says
//! otherwise and is created on first use.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use std::path::PathBuf;
use swarmlink_core::identity::{
    decode_id_hex, derive_agent_identity, load_or_create_machine_identity, PeerId,
};
use tabled::Tabled;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum IdentityCommands {
    /// Show this machine's identity, creating the key file if needed
    Show {
        /// Machine key file
        #[arg(short, long)]
        key: Option<PathBuf>,
    },

    /// Derive an agent identity
    Agent {
        /// 64-character hex seed; omit for a random identity
        #[arg(short, long)]
        seed: Option<String>,
    },

    /// Check whether a string is a well-formed identifier
    Check {
        /// 64-character hex identifier
        id: String,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct IdentityRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Peer ID")]
    peer_id: String,
}

fn machine_key_path(key: Option<PathBuf>) -> Result<PathBuf> {
    match key {
        Some(path) => Ok(path),
        None => Ok(super::home_dir()?.join("machine.key")),
    }
}

pub async fn execute(cmd: IdentityCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        IdentityCommands::Show { key } => {
            let path = machine_key_path(key)?;
            let load_path = path.clone();
            let (machine_id, _key) =
                tokio::task::spawn_blocking(move || load_or_create_machine_identity(&load_path))
                    .await
                    .context("Identity task panicked")?
                    .with_context(|| format!("Failed to load {}", path.display()))?;

            let (agent_id, _) = derive_agent_identity(None);

            let rows = vec![
                IdentityRow {
                    kind: "machine".to_string(),
                    id: machine_id.to_hex(),
                    peer_id: PeerId::from_machine(machine_id).to_hex(),
                },
                IdentityRow {
                    kind: "agent (fresh)".to_string(),
                    id: agent_id.to_hex(),
                    peer_id: PeerId::from_agent(agent_id).to_hex(),
                },
            ];
            if let OutputFormat::Table = format {
                output::print_header("Identity");
                output::print_detail("Key file", &path.display().to_string());
                println!();
            }
            output::print_list(&rows, format)?;
        }

        IdentityCommands::Agent { seed } => {
            let seed = seed
                .map(|hex| decode_id_hex(&hex))
                .transpose()
                .context("Invalid seed")?;
            let (agent_id, _key) = derive_agent_identity(seed);

            let rows = vec![IdentityRow {
                kind: if seed.is_some() { "agent (seeded)" } else { "agent" }.to_string(),
                id: agent_id.to_hex(),
                peer_id: PeerId::from_agent(agent_id).to_hex(),
            }];
            output::print_list(&rows, format)?;
        }

        IdentityCommands::Check { id } => match decode_id_hex(&id) {
            Ok(bytes) => match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Valid identifier ({} bytes)", bytes.len()))
                }
                _ => output::print_item(
                    &serde_json::json!({ "id": id, "valid": true }),
                    format,
                )?,
            },
            Err(e) => match format {
                OutputFormat::Table => output::print_error(&format!("{} [{}]", e, e.code())),
                _ => output::print_item(
                    &serde_json::json!({ "id": id, "valid": false, "error": e.code() }),
                    format,
                )?,
            },
        },
    }

    Ok(())
}
