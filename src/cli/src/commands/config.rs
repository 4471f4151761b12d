//! Node configuration commands.
//!
//! The node reads `~/.swarmlink/config.toml` with `SWARMLINK__*` environment
//! overrides on top.

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use swarmlink_core::config::Config;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show {
        /// Read this file instead of the default location
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Print the default config file location
    Path,

    /// Write a config file with every default spelled out
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// `~/.swarmlink/config.toml`
fn config_path() -> Result<PathBuf> {
    Ok(super::home_dir()?.join("config.toml"))
}

fn load(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Config::load().context("Failed to load configuration from environment");
    }
    let path_str = path
        .to_str()
        .with_context(|| format!("Non UTF-8 path: {}", path.display()))?;
    Config::from_file(path_str).with_context(|| format!("Failed to load {}", path.display()))
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show { file } => {
            let path = match file {
                Some(path) => path,
                None => config_path()?,
            };
            let cfg = load(&path)?;

            match format {
                OutputFormat::Table => {
                    output::print_header("Configuration");
                    let source = if path.exists() {
                        path.display().to_string()
                    } else {
                        "defaults + environment".to_string()
                    };
                    output::print_detail("Source", &source);
                    println!();
                    print!("{}", toml::to_string_pretty(&cfg).context("Failed to render config")?);
                }
                _ => output::print_item(&cfg, format)?,
            }
        }

        ConfigCommands::Path => {
            let path = config_path()?;
            match format {
                OutputFormat::Table => println!("{}", path.display()),
                _ => output::print_item(
                    &serde_json::json!({ "path": path, "exists": path.exists() }),
                    format,
                )?,
            }
        }

        ConfigCommands::Init { force } => {
            let path = config_path()?;
            if path.exists() && !force {
                output::print_info(&format!(
                    "{} already exists. Use --force to overwrite.",
                    path.display()
                ));
                return Ok(());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let content =
                toml::to_string_pretty(&Config::default()).context("Failed to serialize config")?;
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;

            output::print_success(&format!("Wrote {}", path.display()));
        }
    }

    Ok(())
}
