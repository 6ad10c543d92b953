use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use super::queue::{Mutation, SyncQueue};
use super::{from_millis, to_millis};
use crate::clock::Clock;
use crate::entity::{
    apply_patch, is_local_id, merge_server, new_local_id, Entity, EntityType, Record,
    StoredRecord, SyncStatus,
};
use crate::error::SyncError;
use crate::models::{Account, Contact};

// Row type for entity tables
#[derive(sqlx::FromRow)]
struct RecordRow {
    id: String,
    data: String,
    sync_status: String,
    last_modified: i64,
}

impl RecordRow {
    fn status(&self) -> Result<SyncStatus, SyncError> {
        self.sync_status
            .parse()
            .map_err(|e: String| SyncError::Storage(sqlx::Error::Decode(e.into())))
    }

    fn decode<T: Entity>(self) -> Result<StoredRecord<T>, SyncError> {
        let sync_status = self.status()?;
        Ok(StoredRecord {
            record: Record::new(self.id, serde_json::from_str(&self.data)?),
            sync_status,
            last_modified: from_millis(self.last_modified),
        })
    }
}

/// What `delete` did with the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Never synced: removed outright, nothing queued.
    Purged,
    /// Marked deleted and queued for remote deletion.
    Tombstoned,
}

/// Durable per-entity record store. Every local-origin mutation writes the
/// record and its queue entry in the same transaction.
#[derive(Clone, Debug)]
pub struct LocalStore {
    pool: SqlitePool,
    queue: SyncQueue,
    clock: Arc<dyn Clock>,
}

impl LocalStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        let queue = SyncQueue::new(pool.clone(), clock.clone());
        Self { pool, queue, clock }
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// All live records of a type, oldest modification first.
    pub async fn get_all<T: Entity>(&self) -> Result<Vec<Record<T>>, SyncError> {
        let sql = format!(
            "SELECT id, data, sync_status, last_modified FROM {} WHERE sync_status != 'deleted' ORDER BY last_modified ASC, id ASC",
            T::ENTITY_TYPE.table()
        );
        let rows: Vec<RecordRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| row.decode::<T>().map(|stored| stored.record))
            .collect()
    }

    /// A live record, or `None` if absent or tombstoned.
    pub async fn get_by_id<T: Entity>(&self, id: &str) -> Result<Option<Record<T>>, SyncError> {
        Ok(self
            .get_stored::<T>(id)
            .await?
            .filter(|stored| stored.sync_status != SyncStatus::Deleted)
            .map(|stored| stored.record))
    }

    /// A record with its sync metadata, tombstones included.
    pub async fn get_stored<T: Entity>(
        &self,
        id: &str,
    ) -> Result<Option<StoredRecord<T>>, SyncError> {
        let mut conn = self.pool.acquire().await?;
        fetch_in(&mut conn, T::ENTITY_TYPE, id)
            .await?
            .map(RecordRow::decode)
            .transpose()
    }

    /// Creates a record locally and queues it. Without an id, a local-origin
    /// id is assigned.
    pub async fn create<T: Entity>(
        &self,
        id: Option<String>,
        payload: T,
    ) -> Result<Record<T>, SyncError> {
        let record = Record::new(id.unwrap_or_else(new_local_id), payload);
        let data = serde_json::to_string(&record.payload)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO {} (id, data, sync_status, last_modified) VALUES (?, ?, ?, ?)",
            T::ENTITY_TYPE.table()
        ))
        .bind(&record.id)
        .bind(&data)
        .bind(SyncStatus::Created.as_str())
        .bind(to_millis(self.clock.now()))
        .execute(&mut *tx)
        .await?;

        let mutation = Mutation::Create {
            record: record.clone(),
        };
        self.queue.enqueue_in(&mut tx, T::into_payload(mutation)).await?;
        tx.commit().await?;

        tracing::debug!("Created {} '{}' locally", T::ENTITY_TYPE, record.id);
        Ok(record)
    }

    /// Merges `patch` into a live record and queues the change.
    pub async fn update<T: Entity>(
        &self,
        id: &str,
        patch: &T::Patch,
    ) -> Result<Record<T>, SyncError> {
        let mut tx = self.pool.begin().await?;
        let stored = live_in::<T>(&mut tx, id).await?;

        let record = Record::new(id, apply_patch(&stored.record.payload, patch)?);
        // A record the server has never seen stays Created.
        let status = match stored.sync_status {
            SyncStatus::Created => SyncStatus::Created,
            _ => SyncStatus::Updated,
        };
        upsert_in(
            &mut tx,
            T::ENTITY_TYPE,
            &record.id,
            &serde_json::to_string(&record.payload)?,
            status,
            self.clock.now(),
        )
        .await?;
        self.queue.enqueue_update_in(&mut tx, &record, patch).await?;
        tx.commit().await?;

        tracing::debug!("Updated {} '{}' locally", T::ENTITY_TYPE, id);
        Ok(record)
    }

    /// Deletes a live record: purges it if it never synced, otherwise
    /// tombstones it and queues the remote delete.
    pub async fn delete<T: Entity>(&self, id: &str) -> Result<DeleteOutcome, SyncError> {
        let entity_type = T::ENTITY_TYPE;
        let mut tx = self.pool.begin().await?;
        let stored = live_in::<T>(&mut tx, id).await?;

        let outcome = if is_local_id(id) && stored.sync_status == SyncStatus::Created {
            delete_row_in(&mut tx, entity_type, id).await?;
            self.queue
                .drop_for_record_in(&mut tx, entity_type, id)
                .await?;
            DeleteOutcome::Purged
        } else {
            upsert_in(
                &mut tx,
                entity_type,
                id,
                &serde_json::to_string(&stored.record.payload)?,
                SyncStatus::Deleted,
                self.clock.now(),
            )
            .await?;
            self.queue.enqueue_delete_in::<T>(&mut tx, id).await?;
            DeleteOutcome::Tombstoned
        };
        tx.commit().await?;

        tracing::debug!("Deleted {} '{}' locally ({:?})", entity_type, id, outcome);
        Ok(outcome)
    }

    /// Stores authoritative records as `Synced`, skipping any whose local copy
    /// carries unsynced edits. Returns the number written.
    pub async fn save_from_server<T: Entity>(
        &self,
        records: &[Record<T>],
    ) -> Result<usize, SyncError> {
        let entity_type = T::ENTITY_TYPE;
        let now = self.clock.now();
        let mut written = 0;

        let mut tx = self.pool.begin().await?;
        for record in records {
            let writable = match fetch_in(&mut tx, entity_type, &record.id).await? {
                None => true,
                Some(row) => row.status()? == SyncStatus::Synced,
            };
            if !writable {
                tracing::debug!(
                    "Keeping unsynced local copy of {} '{}'",
                    entity_type,
                    record.id
                );
                continue;
            }
            upsert_in(
                &mut tx,
                entity_type,
                &record.id,
                &serde_json::to_string(&record.payload)?,
                SyncStatus::Synced,
                now,
            )
            .await?;
            written += 1;
        }
        tx.commit().await?;

        Ok(written)
    }

    /// Removes a record and all of its queue entries.
    pub async fn purge<T: Entity>(&self, id: &str) -> Result<bool, SyncError> {
        let mut tx = self.pool.begin().await?;
        let removed = delete_row_in(&mut tx, T::ENTITY_TYPE, id).await?;
        self.queue
            .drop_for_record_in(&mut tx, T::ENTITY_TYPE, id)
            .await?;
        tx.commit().await?;
        Ok(removed)
    }

    /// Maps a reconciled local-origin id to its server id; other ids pass through.
    pub async fn resolve_id(&self, id: &str) -> Result<String, SyncError> {
        if !is_local_id(id) {
            return Ok(id.to_string());
        }
        let mut conn = self.pool.acquire().await?;
        resolve_id_in(&mut conn, id).await
    }

    /// Rewrites reconciled local-origin foreign keys in a payload.
    pub async fn resolve_references<T: Entity>(&self, payload: &mut T) -> Result<(), SyncError> {
        let mut conn = self.pool.acquire().await?;
        for reference in payload.references_mut() {
            if is_local_id(reference) {
                let resolved = resolve_id_in(&mut conn, reference.as_str()).await?;
                *reference = resolved;
            }
        }
        Ok(())
    }

    /// Rewrites reconciled local-origin foreign keys in a patch.
    pub async fn resolve_patch_references<T: Entity>(
        &self,
        patch: &mut T::Patch,
    ) -> Result<(), SyncError> {
        let mut conn = self.pool.acquire().await?;
        for reference in T::patch_references_mut(patch) {
            if is_local_id(reference) {
                let resolved = resolve_id_in(&mut conn, reference.as_str()).await?;
                *reference = resolved;
            }
        }
        Ok(())
    }

    /// Completes a replayed create or update: drops the queue entry and, if no
    /// other entries remain for the record, stores the server copy as `Synced`.
    pub(crate) async fn acknowledge<T: Entity>(
        &self,
        entry_id: &str,
        server: &Record<T>,
    ) -> Result<(), SyncError> {
        let entity_type = T::ENTITY_TYPE;
        let mut tx = self.pool.begin().await?;
        self.queue.remove_in(&mut tx, entry_id).await?;

        let remaining = self
            .queue
            .remaining_for_in(&mut tx, entity_type, &server.id)
            .await?;
        match fetch_in(&mut tx, entity_type, &server.id).await? {
            Some(row) if remaining == 0 => {
                let local = row.decode::<T>()?;
                if local.sync_status != SyncStatus::Deleted {
                    let merged = merge_server(&local.record.payload, &server.payload)?;
                    upsert_in(
                        &mut tx,
                        entity_type,
                        &server.id,
                        &serde_json::to_string(&merged)?,
                        SyncStatus::Synced,
                        self.clock.now(),
                    )
                    .await?;
                }
            }
            Some(_) => tracing::debug!(
                "{} '{}' still has {} pending entr(ies); leaving status",
                entity_type,
                server.id,
                remaining
            ),
            None => tracing::debug!("No local copy of {} '{}' to mark", entity_type, server.id),
        }

        tx.commit().await?;
        Ok(())
    }

    /// Completes a replayed delete: drops the queue entry and the tombstone.
    pub(crate) async fn confirm_delete<T: Entity>(
        &self,
        entry_id: &str,
        id: &str,
    ) -> Result<(), SyncError> {
        let entity_type = T::ENTITY_TYPE;
        let mut tx = self.pool.begin().await?;
        self.queue.remove_in(&mut tx, entry_id).await?;

        if self
            .queue
            .remaining_for_in(&mut tx, entity_type, id)
            .await?
            == 0
        {
            if let Some(row) = fetch_in(&mut tx, entity_type, id).await? {
                if row.status()? == SyncStatus::Deleted {
                    delete_row_in(&mut tx, entity_type, id).await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Replaces a local-origin record with its server counterpart in one
    /// transaction and records the id mapping.
    pub(crate) async fn reconcile<T: Entity>(
        &self,
        entry_id: &str,
        local_id: &str,
        server: Record<T>,
    ) -> Result<Record<T>, SyncError> {
        let entity_type = T::ENTITY_TYPE;
        let now = self.clock.now();

        let mut tx = self.pool.begin().await?;
        self.queue.remove_in(&mut tx, entry_id).await?;

        sqlx::query(
            "INSERT OR REPLACE INTO id_mappings (local_id, server_id, entity_type, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(local_id)
        .bind(&server.id)
        .bind(entity_type.as_str())
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await?;

        let Some(row) = fetch_in(&mut tx, entity_type, local_id).await? else {
            // Purged while its create was in flight; remove the orphan remotely.
            tracing::warn!(
                "{} '{}' was deleted before its create completed; queueing delete of '{}'",
                entity_type,
                local_id,
                server.id
            );
            let mutation = Mutation::<T>::Delete {
                id: server.id.clone(),
            };
            self.queue.enqueue_in(&mut tx, T::into_payload(mutation)).await?;
            tx.commit().await?;
            return Ok(server);
        };

        let local = row.decode::<T>()?;
        let merged = Record::new(
            server.id.clone(),
            merge_server(&local.record.payload, &server.payload)?,
        );

        delete_row_in(&mut tx, entity_type, local_id).await?;
        self.queue
            .rename_record_in(&mut tx, entity_type, local_id, &merged.id)
            .await?;

        let remaining = self
            .queue
            .remaining_for_in(&mut tx, entity_type, &merged.id)
            .await?;
        let status = match (remaining, local.sync_status) {
            (0, _) => SyncStatus::Synced,
            (_, SyncStatus::Deleted) => SyncStatus::Deleted,
            _ => SyncStatus::Updated,
        };
        upsert_in(
            &mut tx,
            entity_type,
            &merged.id,
            &serde_json::to_string(&merged.payload)?,
            status,
            now,
        )
        .await?;

        let rewritten = rewrite_references_in(&mut tx, local_id, &merged.id).await?;
        tx.commit().await?;

        tracing::info!(
            "Reconciled {} '{}' -> '{}' ({} reference(s) rewritten)",
            entity_type,
            local_id,
            merged.id,
            rewritten
        );
        Ok(merged)
    }
}

async fn fetch_in(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    id: &str,
) -> Result<Option<RecordRow>, SyncError> {
    let sql = format!(
        "SELECT id, data, sync_status, last_modified FROM {} WHERE id = ?",
        entity_type.table()
    );
    let row = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

/// Fetches a record that must exist and not be tombstoned.
async fn live_in<T: Entity>(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<StoredRecord<T>, SyncError> {
    let stored = fetch_in(conn, T::ENTITY_TYPE, id)
        .await?
        .map(RecordRow::decode::<T>)
        .transpose()?;
    match stored {
        Some(stored) if stored.sync_status != SyncStatus::Deleted => Ok(stored),
        _ => Err(SyncError::not_found(T::ENTITY_TYPE, id)),
    }
}

async fn upsert_in(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    id: &str,
    data: &str,
    status: SyncStatus,
    at: DateTime<Utc>,
) -> Result<(), SyncError> {
    let sql = format!(
        r#"
        INSERT INTO {} (id, data, sync_status, last_modified) VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            data = excluded.data,
            sync_status = excluded.sync_status,
            last_modified = excluded.last_modified
        "#,
        entity_type.table()
    );
    sqlx::query(&sql)
        .bind(id)
        .bind(data)
        .bind(status.as_str())
        .bind(to_millis(at))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn delete_row_in(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    id: &str,
) -> Result<bool, SyncError> {
    let sql = format!("DELETE FROM {} WHERE id = ?", entity_type.table());
    let result = sqlx::query(&sql).bind(id).execute(&mut *conn).await?;
    Ok(result.rows_affected() > 0)
}

async fn resolve_id_in(conn: &mut SqliteConnection, id: &str) -> Result<String, SyncError> {
    let mapped: Option<String> =
        sqlx::query_scalar("SELECT server_id FROM id_mappings WHERE local_id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(mapped.unwrap_or_else(|| id.to_string()))
}

/// Points every stored foreign key equal to `old_id` at `new_id`.
async fn rewrite_references_in(
    conn: &mut SqliteConnection,
    old_id: &str,
    new_id: &str,
) -> Result<u64, SyncError> {
    let mut rewritten = 0;
    for entity_type in EntityType::ALL {
        rewritten += match entity_type {
            EntityType::Account => rewrite_table_in::<Account>(conn, old_id, new_id).await?,
            EntityType::Contact => rewrite_table_in::<Contact>(conn, old_id, new_id).await?,
        };
    }
    Ok(rewritten)
}

async fn rewrite_table_in<T: Entity>(
    conn: &mut SqliteConnection,
    old_id: &str,
    new_id: &str,
) -> Result<u64, SyncError> {
    let table = T::ENTITY_TYPE.table();
    let sql = format!(
        "SELECT id, data, sync_status, last_modified FROM {} WHERE instr(data, ?) > 0",
        table
    );
    let rows: Vec<RecordRow> = sqlx::query_as(&sql)
        .bind(old_id)
        .fetch_all(&mut *conn)
        .await?;

    let update_sql = format!("UPDATE {} SET data = ? WHERE id = ?", table);
    let mut rewritten = 0;
    for row in rows {
        let mut payload: T = serde_json::from_str(&row.data)?;
        let mut changed = false;
        for reference in payload.references_mut() {
            if reference.as_str() == old_id {
                *reference = new_id.to_string();
                changed = true;
            }
        }
        if changed {
            sqlx::query(&update_sql)
                .bind(serde_json::to_string(&payload)?)
                .bind(&row.id)
                .execute(&mut *conn)
                .await?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}
