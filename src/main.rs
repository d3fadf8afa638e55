//! EOS Wallet Bot - custodial EOS wallet on Telegram
//!
//! # WARNING
//! - The bot holds encrypted private keys of its users.
//! - Keep the database and the creator key out of reach of anyone else.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use eos_wallet_bot::cli::commands;
use eos_wallet_bot::config::Config;

/// EOS Wallet Bot - wallets, transfers and RAM orders over Telegram
#[derive(Parser)]
#[command(name = "eos-wallet-bot")]
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
    /// Start the bot, the RAM order matcher and the payment callback listener
    Start,

    /// Check system health (RPC endpoints, price feeds, database)
    Health,

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("eos_wallet_bot=info".parse()?),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Start => commands::start(&config).await,
        Commands::Health => commands::health(&config).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
