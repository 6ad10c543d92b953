//! SQLite-backed persistence: entity tables, the sync queue and the id map.

mod local;
mod queue;

pub use local::{DeleteOutcome, LocalStore};
pub use queue::{Mutation, OperationKind, QueueOperation, QueuePayload, SyncQueue};

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::error::SyncError;

/// Opens (creating if needed) the database at `path` and runs migrations.
///
/// The pool holds a single connection, so every logical step is serialized
/// and each read-modify-write runs inside one transaction.
pub async fn init_db(path: &Path) -> Result<SqlitePool, SyncError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::debug!("Opened local store at {}", path.display());
    Ok(pool)
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
