//! Data Saver - inspect and edit per-app background data policy

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod config;

use config::{Config, LoggingConfig};
use datasaver_authority::FileAuthority;
use datasaver_core::{DataSaverBackend, Policy, Uid};

/// Data Saver - manage background data on metered networks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Policy store path
    #[arg(long, env = "DATASAVER_STORE")]
    store: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the data saver state and per-app policies
    Status,
    /// Turn data saver on
    Enable,
    /// Turn data saver off
    Disable,
    /// Set the background data policy of an app (none, allow or reject)
    Set {
        uid: u32,
        package: String,
        policy: Policy,
    },
    /// Follow the policy store and log every change
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;
    init_logging(&config.logging);

    let store_path = args.store.unwrap_or_else(|| config.store.path.clone());
    let authority = Arc::new(
        FileAuthority::open(&store_path)
            .with_context(|| format!("Failed to open policy store: {}", store_path))?,
    );
    let backend = DataSaverBackend::new(authority.clone());

    match args.command {
        Command::Status => print!("{}", commands::status(&backend)?),
        Command::Enable => println!("{}", commands::set_enabled(&backend, true)?),
        Command::Disable => println!("{}", commands::set_enabled(&backend, false)?),
        Command::Set {
            uid,
            package,
            policy,
        } => {
            commands::set_policy(&backend, Uid(uid), &package, policy)?;
            println!("{} ({}): {}", package, uid, policy);
        }
        Command::Watch => {
            info!("Starting Data Saver watch v{}", env!("CARGO_PKG_VERSION"));
            commands::watch(&backend, authority, &config).await?;
        }
    }

    Ok(())
}

/// Initialize logging
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout is reserved for command output
    if config.format == "json" {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}
