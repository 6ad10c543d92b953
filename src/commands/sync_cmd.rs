//! Sync CLI commands: manual replay and status.

use clap::{Args, Subcommand};
use fieldsync_core::{ManualReplay, SyncError};

use super::{Engine, OutputFormat};
use crate::config::Config;

/// Replay pending changes against the server
#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Subcommand)]
enum SyncSubcommand {
    /// Show connectivity, pending changes and stuck entries
    Status {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl SyncCommand {
    pub async fn run(&self, engine: &Engine, config: &Config) -> Result<(), SyncCommandError> {
        match &self.command {
            None => self.sync(engine, config).await,
            Some(SyncSubcommand::Status { format }) => self.status(engine, config, format).await,
        }
    }

    async fn sync(&self, engine: &Engine, config: &Config) -> Result<(), SyncCommandError> {
        if !config.sync.is_configured() {
            return Err(SyncCommandError::NotConfigured);
        }

        match engine.scheduler().manual_replay().await? {
            ManualReplay::Completed(report) => {
                println!(
                    "Sync complete: {} succeeded, {} failed",
                    report.success, report.failed
                );
                let remaining = engine.scheduler().pending_count().await?;
                if remaining > 0 {
                    println!(
                        "{} change(s) still pending. Run 'fieldsync queue list' for details.",
                        remaining
                    );
                }
            }
            ManualReplay::AlreadySyncing => println!("A sync is already in progress."),
            ManualReplay::Offline => {
                println!("Server unreachable; changes stay queued until it is back.")
            }
        }
        Ok(())
    }

    async fn status(
        &self,
        engine: &Engine,
        config: &Config,
        format: &OutputFormat,
    ) -> Result<(), SyncCommandError> {
        let online = engine.monitor().is_online();
        let pending = engine.scheduler().pending_count().await?;
        let exhausted = engine.queue().exhausted().await?;

        if let OutputFormat::Json = format {
            let status = serde_json::json!({
                "configured": config.sync.is_configured(),
                "server_url": config.sync.server_url,
                "online": online,
                "pending": pending,
                "exhausted": exhausted,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&status).map_err(SyncError::from)?
            );
            return Ok(());
        }

        println!("Sync Status");
        println!("===========");
        println!();

        match &config.sync.server_url {
            Some(url) => {
                println!("Server:  {}", url);
                println!(
                    "Status:  {}",
                    if online { "✓ connected" } else { "✗ unreachable" }
                );
            }
            None => {
                println!("Server:  not configured");
                println!();
                println!("To enable sync, add to your config file:");
                println!();
                println!("  sync:");
                println!("    server_url: \"http://localhost:8080\"");
                println!("    api_key: \"your-api-key\"");
                println!();
                println!("Or set environment variables:");
                println!("  FIELDSYNC_SERVER_URL");
                println!("  FIELDSYNC_API_KEY");
            }
        }
        println!();
        println!("Pending changes: {}", pending);

        if !exhausted.is_empty() {
            println!();
            println!(
                "{} change(s) are no longer retried (attempt cap {} or a stuck dependency):",
                exhausted.len(),
                config.sync.max_attempts
            );
            for op in &exhausted {
                println!(
                    "  {}  {} {} '{}': {}",
                    op.id,
                    op.kind(),
                    op.entity_type(),
                    op.record_id(),
                    op.last_error.as_deref().unwrap_or("unknown error")
                );
            }
            println!();
            println!("Use 'fieldsync queue reset <id>' to retry or 'fieldsync queue clear <id>' to drop.");
        }

        Ok(())
    }
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    NotConfigured,
    SyncError(SyncError),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::NotConfigured => write!(
                f,
                "Sync server not configured. Set sync.server_url in config."
            ),
            SyncCommandError::SyncError(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::NotConfigured => None,
            SyncCommandError::SyncError(e) => Some(e),
        }
    }
}

impl From<SyncError> for SyncCommandError {
    fn from(e: SyncError) -> Self {
        SyncCommandError::SyncError(e)
    }
}
