//! Swarmlink CLI - inspect identities, manage node configuration and run
//! local mesh simulations.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use swarmlink_core::telemetry::{init_logging, LoggingConfig};

use commands::{config, contacts, identity, simulate};
use output::OutputFormat;

/// Swarmlink - peer-to-peer agent mesh
#[derive(Parser)]
#[command(
    name = "swarmlink",
    version,
    about = "Swarmlink - peer-to-peer agent mesh",
    long_about = "Inspect machine and agent identities, manage node configuration, and run in-memory swarms.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Log level for the embedded node (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "SWARMLINK_LOG", default_value = "warn")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Machine and agent identity operations
    #[command(subcommand)]
    Identity(identity::IdentityCommands),

    /// Trust levels for other agents
    #[command(subcommand)]
    Contacts(contacts::ContactsCommands),

    /// Run a swarm of in-memory agents sharing one task list
    Simulate(simulate::SimulateArgs),

    /// Node configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let logging = LoggingConfig {
        level: cli.log_level.clone(),
        ..Default::default()
    };
    if let Err(e) = init_logging(&logging) {
        output::print_warning(&format!("Logging disabled: {:#}", e));
    }

    let format = cli.output;
    let result = match cli.command {
        Commands::Identity(cmd) => identity::execute(cmd, format).await,
        Commands::Contacts(cmd) => contacts::execute(cmd, format).await,
        Commands::Simulate(args) => simulate::execute(args, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
