//! Bridge vault guard - multi-bot approval gate for bridge releases
//!
//! # WARNING
//! - The bundled commands run against an in-memory bridge and a dry-run
//!   submitter. Nothing is broadcast.
//! - Validator secrets in the config authorize approvals. Keep them out of
//!   version control.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

// Use the library crate
use bridge_vault_guard::cli::commands;
use bridge_vault_guard::config::Config;

/// Bridge vault guard - quorum-approved transfer execution
#[derive(Parser)]
#[command(name = "vault-guard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "vault-guard.toml", env = "VAULT_GUARD_CONFIG")]
    config: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration (secrets masked)
    Config,

    /// Run a single transfer through the approval pipeline
    Request {
        /// Bridge transaction id
        bridge_tx_id: String,

        /// Recipient address
        recipient: String,

        /// Amount to release
        amount: f64,

        /// Source-chain transaction backing the release
        #[arg(long)]
        source_tx: Option<String>,
    },

    /// Read JSON-lines transfer requests from stdin and process them
    Run,

    /// Generate a signer key
    Keygen,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("bridge_vault_guard=info".parse()?);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    init_tracing(cli.json)?;

    // Key generation needs no configuration
    if let Commands::Keygen = cli.command {
        return commands::keygen();
    }

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Config => commands::show_config(&config),
        Commands::Request {
            bridge_tx_id,
            recipient,
            amount,
            source_tx,
        } => commands::request(&config, &bridge_tx_id, &recipient, amount, source_tx).await,
        Commands::Run => commands::run(&config).await,
        Commands::Keygen => commands::keygen(),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
