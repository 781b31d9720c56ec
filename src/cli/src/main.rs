//! Follow CLI - Command-line interface for a follow server.
//!
//! Provides commands to notify entities with account events and to inspect
//! committed state, account balances, and server health.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{account, health, notify, state};
use output::OutputFormat;

/// Follow - ordered event delivery into per-entity followers
#[derive(Parser)]
#[command(
    name = "follow",
    version,
    about = "Follow - ordered event delivery into per-entity followers",
    long_about = "CLI tool for sending account events to a follow server and inspecting follower state.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(
        long,
        global = true,
        env = "FOLLOW_API_URL",
        default_value = "http://localhost:8080"
    )]
    api_url: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send an account event to its follower
    #[command(subcommand)]
    Notify(notify::NotifyCommands),

    /// Show the committed state of an entity
    State(state::StateArgs),

    /// Show an account from the read model
    Account(account::AccountArgs),

    /// Check server health
    Health(health::HealthArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let client = client::ApiClient::new(&cli.api_url)?;
    let format = cli.output;

    let result = match cli.command {
        Commands::Notify(cmd) => notify::execute(cmd, &client, format).await,
        Commands::State(args) => state::execute(args, &client, format).await,
        Commands::Account(args) => account::execute(args, &client, format).await,
        Commands::Health(args) => health::execute(args, &client, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
