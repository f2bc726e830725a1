//! Stealth-wallet alert bot
//!
//! Watches the stealth-money purchase feed for clusters of distinct wallets
//! buying the same token inside a short window and pushes enriched alerts
//! to Telegram.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

// Use the library crate
use stealth_alerts::cli::commands;
use stealth_alerts::config::Config;

/// Stealth-wallet buy-cluster alert bot
#[derive(Parser)]
#[command(name = "stealth-alerts")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (evaluation trigger + webhook ingress)
    Serve {
        /// Override the configured bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Execute one evaluation cycle and exit
    Run {
        /// Run the pipeline without sending any messages
        #[arg(long)]
        dry_run: bool,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Check that a provider session is obtainable
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stealth_alerts=info".parse().unwrap()),
        )
        .with_target(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Serve { bind } => commands::serve(config, bind).await,
        Commands::Run { dry_run } => commands::run(config, dry_run).await,
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
