//! Contact commands.
//!
//! Contacts live in `~/.swarmlink/contacts.json` unless `--file` says
//! otherwise. Point `identity.contacts_path` at the same file to have a node
//! drop messages from blocked agents.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use std::path::PathBuf;
use swarmlink_core::contacts::{Contact, ContactStore, TrustLevel};
use swarmlink_core::identity::AgentId;
use tabled::Tabled;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ContactsCommands {
    /// List contacts
    List {
        /// Contacts file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Set an agent's trust level, adding it if needed
    Set {
        /// Agent id (64-character hex)
        agent_id: String,

        /// blocked, unknown, known or trusted
        level: String,

        /// Human-readable label
        #[arg(short, long)]
        label: Option<String>,

        /// Contacts file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Forget an agent
    Remove {
        /// Agent id (64-character hex)
        agent_id: String,

        /// Contacts file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct ContactRow {
    #[tabled(rename = "Agent")]
    agent_id: String,
    #[tabled(rename = "Trust")]
    trust_level: String,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Added")]
    added_at: String,
}

impl From<Contact> for ContactRow {
    fn from(contact: Contact) -> Self {
        Self {
            agent_id: contact.agent_id.to_hex(),
            trust_level: contact.trust_level.to_string(),
            label: contact.label.unwrap_or_default(),
            added_at: contact.added_at.to_rfc3339(),
        }
    }
}

async fn open_store(file: Option<PathBuf>) -> Result<ContactStore> {
    let path = match file {
        Some(path) => path,
        None => super::home_dir()?.join("contacts.json"),
    };
    let display = path.display().to_string();
    tokio::task::spawn_blocking(move || ContactStore::open(path))
        .await
        .context("Contacts task panicked")?
        .with_context(|| format!("Failed to open {}", display))
}

pub async fn execute(cmd: ContactsCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        ContactsCommands::List { file } => {
            let store = open_store(file).await?;
            let rows: Vec<ContactRow> = store.list().into_iter().map(ContactRow::from).collect();
            output::print_list(&rows, format)?;
        }

        ContactsCommands::Set {
            agent_id,
            level,
            label,
            file,
        } => {
            let agent_id = AgentId::from_hex(&agent_id).context("Invalid agent id")?;
            let level: TrustLevel = level.parse()?;
            let store = open_store(file).await?;

            let mut contact = store
                .get(&agent_id)
                .unwrap_or_else(|| Contact::new(agent_id, level));
            contact.trust_level = level;
            if let Some(label) = label {
                contact.label = Some(label);
            }
            store.add(contact)?;
            output::print_success(&format!("{} is now {}", agent_id.short(), level));
        }

        ContactsCommands::Remove { agent_id, file } => {
            let agent_id = AgentId::from_hex(&agent_id).context("Invalid agent id")?;
            let store = open_store(file).await?;
            match store.remove(&agent_id)? {
                Some(_) => output::print_success(&format!("Removed {}", agent_id.short())),
                None => output::print_warning(&format!("{} is not a contact", agent_id.short())),
            }
        }
    }

    Ok(())
}
