//! Service graph, constructed once per process.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;

use crate::clock::{Clock, SystemClock};
use crate::connectivity::{spawn_probe, ConnectivityMonitor, ProbeHandle};
use crate::error::SyncError;
use crate::facade::OfflineFacade;
use crate::gateway::RemoteGateway;
use crate::scheduler::{SchedulerConfig, SyncScheduler};
use crate::store::{init_db, LocalStore, SyncQueue};

/// Owns the store, the monitor, the scheduler and the facade, all sharing
/// one gateway. The monitor starts offline until the first probe.
pub struct SyncEngine<G: RemoteGateway> {
    store: LocalStore,
    gateway: Arc<G>,
    monitor: Arc<ConnectivityMonitor>,
    scheduler: Arc<SyncScheduler<G>>,
    facade: OfflineFacade<G>,
}

impl<G: RemoteGateway> SyncEngine<G> {
    /// Opens the database at `path` (running migrations) and wires the services.
    pub async fn open(path: &Path, gateway: G, config: SchedulerConfig) -> Result<Self, SyncError> {
        let pool = init_db(path).await?;
        Ok(Self::with_pool(
            pool,
            Arc::new(gateway),
            Arc::new(SystemClock),
            config,
        ))
    }

    pub fn with_pool(
        pool: SqlitePool,
        gateway: Arc<G>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let store = LocalStore::new(pool, clock);
        let monitor = ConnectivityMonitor::new(false);
        let scheduler = SyncScheduler::new(
            store.clone(),
            Arc::clone(&gateway),
            Arc::clone(&monitor),
            config,
        );
        let facade = OfflineFacade::new(store.clone(), Arc::clone(&gateway), Arc::clone(&monitor));

        Self {
            store,
            gateway,
            monitor,
            scheduler,
            facade,
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn queue(&self) -> &SyncQueue {
        self.store.queue()
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler<G>> {
        &self.scheduler
    }

    pub fn facade(&self) -> &OfflineFacade<G> {
        &self.facade
    }

    /// Pings the gateway once and records the result.
    pub async fn probe_once(&self) -> bool {
        let online = self.gateway.ping().await;
        self.monitor.set_online(online);
        online
    }

    pub fn spawn_probe(&self, interval: Duration) -> ProbeHandle {
        spawn_probe(Arc::clone(&self.monitor), Arc::clone(&self.gateway), interval)
    }
}
