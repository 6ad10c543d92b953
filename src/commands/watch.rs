use clap::Args;
use tokio::sync::broadcast::error::RecvError;

use fieldsync_core::SyncEvent;

use super::Engine;
use crate::config::Config;

/// Keep probing the server and replay the queue whenever it comes back
#[derive(Args)]
pub struct WatchCommand {
    /// Seconds between connectivity probes (overrides config)
    #[arg(long)]
    interval: Option<u64>,
}

impl WatchCommand {
    pub async fn run(&self, engine: &Engine, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        if !config.sync.is_configured() {
            return Err("Sync server not configured. Set sync.server_url in config.".into());
        }

        let interval = self
            .interval
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| config.sync.probe_interval());

        let mut events = engine.scheduler().subscribe_events();
        let _attached = engine.scheduler().attach();
        let _status = engine.monitor().subscribe(|online| {
            if online {
                tracing::info!("Server reachable");
            } else {
                tracing::warn!("Server unreachable; changes will be queued");
            }
        });
        let probe = engine.spawn_probe(interval);

        tracing::info!(
            "Watching {} every {:?} ({} pending change(s))",
            config.sync.server_url.as_deref().unwrap_or_default(),
            interval,
            engine.scheduler().pending_count().await?
        );

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Ok(SyncEvent::Started) => tracing::info!("Replay started"),
                    Ok(SyncEvent::Finished(report)) => tracing::info!(
                        success = report.success,
                        failed = report.failed,
                        "Replay finished"
                    ),
                    Ok(SyncEvent::Failed(message)) => tracing::error!("Replay failed: {}", message),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Missed {} sync event(s)", skipped)
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        probe.shutdown().await;
        Ok(())
    }
}
