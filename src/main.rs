//! # repochat CLI
//!
//! `repochat serve` starts the web UI; `repochat init` scaffolds a config
//! file. All settings have defaults, so `serve` works without a config
//! file at all; secrets are collected through the UI, never from config.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use repochat::config;
use repochat::server;

/// Chat with a GitHub repository using retrieval-augmented generation.
#[derive(Parser)]
#[command(
    name = "repochat",
    about = "Chat with a GitHub repository using retrieval-augmented generation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/repochat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web UI and API server.
    ///
    /// Uses built-in defaults when the config file does not exist.
    Serve,

    /// Write a default configuration file at the `--config` path.
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            if cli.config.exists() {
                anyhow::bail!("config file already exists: {}", cli.config.display());
            }
            if let Some(parent) = cli.config.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&cli.config, config::EXAMPLE_CONFIG)?;
            println!("Wrote {}", cli.config.display());
        }
        Commands::Serve => {
            let cfg = if cli.config.exists() {
                config::load_config(&cli.config)?
            } else {
                tracing::info!(
                    "no config file at {}; using defaults",
                    cli.config.display()
                );
                config::Config::default()
            };
            server::run_server(cfg).await?;
        }
    }

    Ok(())
}
