//! Fieldsync Core Library
//!
//! Offline-first sync engine: a durable record store tagged with per-record
//! sync state, an ordered mutation queue, a connectivity-driven replay
//! scheduler, and a facade that routes CRUD online or offline.

pub mod clock;
pub mod connectivity;
pub mod engine;
pub mod entity;
pub mod error;
pub mod facade;
pub mod gateway;
pub mod models;
pub mod scheduler;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connectivity::{spawn_probe, ConnectivityMonitor, ProbeHandle, Subscription};
pub use engine::SyncEngine;
pub use entity::{is_local_id, Entity, EntityType, Record, StoredRecord, SyncStatus};
pub use error::SyncError;
pub use facade::{OfflineFacade, OfflineRepository};
pub use gateway::{GatewayError, HttpGateway, RemoteGateway};
pub use models::{Account, AccountPatch, Contact, ContactPatch};
pub use scheduler::{ManualReplay, ReplayReport, SchedulerConfig, SyncEvent, SyncScheduler};
pub use store::{
    init_db, DeleteOutcome, LocalStore, Mutation, OperationKind, QueueOperation, QueuePayload,
    SyncQueue,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
