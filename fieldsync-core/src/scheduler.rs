//! Connectivity-driven queue replay.
//!
//! The scheduler drains the [`SyncQueue`](crate::SyncQueue) against the
//! gateway in global `(timestamp, seq)` order. At most one replay runs at a
//! time: automatic triggers are debounced and deferred, manual ones are
//! rejected while a run is in flight.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::connectivity::{ConnectivityMonitor, Subscription};
use crate::entity::{is_local_id, Entity};
use crate::error::SyncError;
use crate::gateway::{GatewayError, RemoteGateway};
use crate::models::{Account, Contact};
use crate::store::{LocalStore, Mutation, QueueOperation, QueuePayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How long connectivity must settle before an automatic replay starts.
    pub quiet_period: Duration,
    /// Attempts after which an entry is left in the queue and skipped.
    pub max_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_secs(2),
            max_attempts: 5,
        }
    }
}

/// Aggregate result of one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub success: usize,
    pub failed: usize,
}

/// Replay state transitions, broadcast to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Started,
    Finished(ReplayReport),
    Failed(String),
}

/// Outcome of [`SyncScheduler::manual_replay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualReplay {
    Completed(ReplayReport),
    AlreadySyncing,
    Offline,
}

#[derive(Debug, Default)]
struct ReplayState {
    scheduled: bool,
    running: bool,
    rerun: bool,
}

enum EntryOutcome {
    Succeeded,
    Failed,
    /// Depends on a record whose create has not reconciled yet. No attempt is
    /// recorded.
    Deferred,
}

enum Resolution<T: Entity> {
    Ready(Mutation<T>),
    /// Still holds this local id after mapping.
    Blocked(String),
}

pub struct SyncScheduler<G: RemoteGateway> {
    store: LocalStore,
    gateway: Arc<G>,
    monitor: Arc<ConnectivityMonitor>,
    config: SchedulerConfig,
    state: Mutex<ReplayState>,
    events: broadcast::Sender<SyncEvent>,
}

impl<G: RemoteGateway> SyncScheduler<G> {
    pub fn new(
        store: LocalStore,
        gateway: Arc<G>,
        monitor: Arc<ConnectivityMonitor>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            store,
            gateway,
            monitor,
            config,
            state: Mutex::new(ReplayState::default()),
            events,
        })
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.lock_state().running
    }

    /// Number of queue entries still waiting, exhausted ones included.
    pub async fn pending_count(&self) -> Result<usize, SyncError> {
        self.store.queue().len().await
    }

    /// Schedules a replay on every online transition, including the current
    /// status if already online.
    pub fn attach(self: &Arc<Self>) -> Subscription {
        let scheduler: Weak<Self> = Arc::downgrade(self);
        self.monitor.subscribe(move |online| {
            if !online {
                return;
            }
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.schedule_replay();
            }
        })
    }

    /// Requests a debounced replay. A no-op if one is already pending; if one
    /// is running, another is scheduled once it completes.
    pub fn schedule_replay(self: &Arc<Self>) {
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!("No async runtime available; replay not scheduled");
            return;
        };

        {
            let mut state = self.lock_state();
            if state.scheduled {
                return;
            }
            if state.running {
                state.rerun = true;
                return;
            }
            state.scheduled = true;
        }

        let scheduler = Arc::clone(self);
        let quiet_period = self.config.quiet_period;
        handle.spawn(async move {
            tokio::time::sleep(quiet_period).await;
            scheduler.run_scheduled().await;
        });
    }

    /// Replays immediately unless offline or a replay is already running.
    pub async fn manual_replay(self: &Arc<Self>) -> Result<ManualReplay, SyncError> {
        if !self.monitor.is_online() {
            return Ok(ManualReplay::Offline);
        }
        {
            let mut state = self.lock_state();
            if state.running {
                return Ok(ManualReplay::AlreadySyncing);
            }
            state.running = true;
        }

        let result = self.replay_with_events().await;
        self.finish_run();
        result.map(ManualReplay::Completed)
    }

    async fn run_scheduled(self: &Arc<Self>) {
        {
            let mut state = self.lock_state();
            state.scheduled = false;
            if !self.monitor.is_online() {
                tracing::debug!("Went offline during quiet period; skipping replay");
                return;
            }
            if state.running {
                state.rerun = true;
                return;
            }
            state.running = true;
        }

        // Failures are already broadcast and logged.
        let _ = self.replay_with_events().await;
        self.finish_run();
    }

    fn finish_run(self: &Arc<Self>) {
        let rerun = {
            let mut state = self.lock_state();
            state.running = false;
            std::mem::take(&mut state.rerun)
        };
        if rerun {
            self.schedule_replay();
        }
    }

    async fn replay_with_events(&self) -> Result<ReplayReport, SyncError> {
        let _ = self.events.send(SyncEvent::Started);
        match self.replay().await {
            Ok(report) => {
                tracing::info!(
                    "Replay finished: {} succeeded, {} failed",
                    report.success,
                    report.failed
                );
                let _ = self.events.send(SyncEvent::Finished(report));
                Ok(report)
            }
            Err(e) => {
                tracing::error!("Replay aborted: {}", e);
                let _ = self.events.send(SyncEvent::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn replay(&self) -> Result<ReplayReport, SyncError> {
        let queue = self.store.queue();
        let entries = queue.list().await?;
        let mut report = ReplayReport::default();

        tracing::debug!("Replaying {} queue entr(ies)", entries.len());

        for listed in entries {
            // An earlier step (a purge, a reconciliation) may have removed it.
            let Some(entry) = queue.get(&listed.id).await? else {
                continue;
            };

            if entry.exhausted || entry.attempts >= self.config.max_attempts {
                if !entry.exhausted {
                    queue.mark_exhausted(&entry.id).await?;
                }
                tracing::debug!("{}", SyncError::RetryExhausted(entry.id.clone()));
                report.failed += 1;
                continue;
            }

            let outcome = match entry.payload.clone() {
                QueuePayload::Account(mutation) => {
                    self.replay_entry::<Account>(&entry, mutation).await?
                }
                QueuePayload::Contact(mutation) => {
                    self.replay_entry::<Contact>(&entry, mutation).await?
                }
            };

            match outcome {
                EntryOutcome::Succeeded => report.success += 1,
                EntryOutcome::Failed | EntryOutcome::Deferred => report.failed += 1,
            }
        }

        Ok(report)
    }

    async fn replay_entry<T: Entity>(
        &self,
        entry: &QueueOperation,
        mutation: Mutation<T>,
    ) -> Result<EntryOutcome, SyncError> {
        let queue = self.store.queue();

        let mutation = match self.resolve(mutation).await? {
            Resolution::Ready(mutation) => mutation,
            Resolution::Blocked(blocking) => return self.defer(entry, &blocking).await,
        };

        if queue.record_attempt(&entry.id).await?.is_none() {
            return Ok(EntryOutcome::Succeeded);
        }

        match self.dispatch(&entry.id, mutation).await {
            Ok(()) => Ok(EntryOutcome::Succeeded),
            Err(e) => {
                tracing::warn!(
                    "Replay of {} {} '{}' failed: {}",
                    entry.kind(),
                    entry.entity_type(),
                    entry.record_id(),
                    e
                );
                queue
                    .record_failure(&entry.id, &e.to_string(), self.config.max_attempts)
                    .await?;
                Ok(EntryOutcome::Failed)
            }
        }
    }

    /// Leaves a blocked entry for a later run, or sets it aside when the
    /// create it waits on is exhausted or gone.
    async fn defer(
        &self,
        entry: &QueueOperation,
        blocking: &str,
    ) -> Result<EntryOutcome, SyncError> {
        let queue = self.store.queue();
        let parent_stuck = match queue.create_entry_for(blocking).await? {
            Some(parent) => parent.exhausted || parent.attempts >= self.config.max_attempts,
            None => true,
        };

        if parent_stuck {
            let reason = format!("Waiting on '{}', whose create will not replay", blocking);
            tracing::warn!(
                "Setting aside {} {} '{}': {}",
                entry.kind(),
                entry.entity_type(),
                entry.record_id(),
                reason
            );
            queue.set_aside(&entry.id, &reason).await?;
        } else {
            tracing::info!(
                "Deferring {} {} '{}': it references '{}', not yet synced",
                entry.kind(),
                entry.entity_type(),
                entry.record_id(),
                blocking
            );
        }
        Ok(EntryOutcome::Deferred)
    }

    /// Maps local-origin ids in a queued mutation to their server ids.
    async fn resolve<T: Entity>(
        &self,
        mutation: Mutation<T>,
    ) -> Result<Resolution<T>, SyncError> {
        let resolved = match mutation {
            Mutation::Create { mut record } => {
                self.store.resolve_references(&mut record.payload).await?;
                if let Some(blocking) = first_local(record.payload.references_mut()) {
                    return Ok(Resolution::Blocked(blocking));
                }
                Mutation::Create { record }
            }
            Mutation::Update { id, mut patch } => {
                let id = self.store.resolve_id(&id).await?;
                if is_local_id(&id) {
                    return Ok(Resolution::Blocked(id));
                }
                self.store.resolve_patch_references::<T>(&mut patch).await?;
                if let Some(blocking) = first_local(T::patch_references_mut(&mut patch)) {
                    return Ok(Resolution::Blocked(blocking));
                }
                Mutation::Update { id, patch }
            }
            Mutation::Delete { id } => {
                let id = self.store.resolve_id(&id).await?;
                if is_local_id(&id) {
                    return Ok(Resolution::Blocked(id));
                }
                Mutation::Delete { id }
            }
        };
        Ok(Resolution::Ready(resolved))
    }

    async fn dispatch<T: Entity>(
        &self,
        entry_id: &str,
        mutation: Mutation<T>,
    ) -> Result<(), SyncError> {
        match mutation {
            Mutation::Create { record } => {
                let created = self.gateway.create(&record.payload).await?;
                if created.id == record.id {
                    self.store.acknowledge(entry_id, &created).await?;
                } else {
                    self.store.reconcile(entry_id, &record.id, created).await?;
                }
            }
            Mutation::Update { id, patch } => {
                let updated = self.gateway.update::<T>(&id, &patch).await?;
                self.store.acknowledge(entry_id, &updated).await?;
            }
            Mutation::Delete { id } => {
                match self.gateway.delete::<T>(&id).await {
                    Ok(()) => {}
                    Err(GatewayError::NotFound { .. }) => {
                        tracing::debug!("{} '{}' already gone on server", T::ENTITY_TYPE, id);
                    }
                    Err(e) => return Err(e.into()),
                }
                self.store.confirm_delete::<T>(entry_id, &id).await?;
            }
        }
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn first_local(references: Vec<&mut String>) -> Option<String> {
    references
        .into_iter()
        .find(|reference| is_local_id(reference))
        .map(|reference| reference.clone())
}
