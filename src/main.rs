use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod remote;

use commands::{
    open_engine, AccountCommand, ConfigCommand, ContactCommand, QueueCommand, SyncCommand,
    WatchCommand,
};
use config::Config;

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(version)]
#[command(about = "Offline-first account and contact tracking", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage accounts
    Account(AccountCommand),

    /// Manage contacts
    Contact(ContactCommand),

    /// Replay pending changes or show sync status
    Sync(SyncCommand),

    /// Inspect and repair the pending change queue
    Queue(QueueCommand),

    /// Run in the foreground and sync whenever the server is reachable
    Watch(WatchCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if matches!(cli.command, Some(Commands::Watch(_))) {
        "fieldsync=info,fieldsync_core=info"
    } else {
        "fieldsync=warn,fieldsync_core=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Account(cmd)) => {
            let engine = open_engine(&config).await?;
            cmd.run(&engine).await?;
        }
        Some(Commands::Contact(cmd)) => {
            let engine = open_engine(&config).await?;
            cmd.run(&engine).await?;
        }
        Some(Commands::Sync(cmd)) => {
            let engine = open_engine(&config).await?;
            cmd.run(&engine, &config).await?;
        }
        Some(Commands::Queue(cmd)) => {
            let engine = open_engine(&config).await?;
            cmd.run(&engine).await?;
        }
        Some(Commands::Watch(cmd)) => {
            let engine = open_engine(&config).await?;
            cmd.run(&engine, &config).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
