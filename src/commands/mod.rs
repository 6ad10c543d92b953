mod account;
mod config_cmd;
mod contact;
mod queue;
mod sync_cmd;
mod watch;

pub use account::AccountCommand;
pub use config_cmd::ConfigCommand;
pub use contact::ContactCommand;
pub use queue::QueueCommand;
pub use sync_cmd::SyncCommand;
pub use watch::WatchCommand;

use clap::ValueEnum;
use fieldsync_core::{Record, SchedulerConfig, SyncEngine};

use crate::config::Config;
use crate::remote::CliGateway;

pub type Engine = SyncEngine<CliGateway>;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub fn scheduler_config(config: &Config) -> SchedulerConfig {
    SchedulerConfig {
        quiet_period: config.sync.quiet_period(),
        max_attempts: config.sync.max_attempts,
    }
}

/// Opens the local store and, when a server is configured, probes it once so
/// the command starts with a known connectivity state.
pub async fn open_engine(config: &Config) -> Result<Engine, Box<dyn std::error::Error>> {
    let gateway = CliGateway::from_config(&config.sync)?;
    let engine = SyncEngine::open(
        &config.database_path.value,
        gateway,
        scheduler_config(config),
    )
    .await?;

    if config.sync.is_configured() {
        let online = engine.probe_once().await;
        tracing::debug!("Server {}", if online { "reachable" } else { "unreachable" });
    }

    Ok(engine)
}

/// Marks records still waiting for their first sync.
fn pending_note<T>(record: &Record<T>) -> &'static str {
    if record.is_local() {
        " (pending sync)"
    } else {
        ""
    }
}

/// Truncates `value` to `width` characters for table output.
fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() > width {
        let cut: String = value.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        value.to_string()
    }
}
