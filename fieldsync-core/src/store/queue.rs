//! Durable, time-ordered queue of pending mutations.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{from_millis, to_millis};
use crate::clock::Clock;
use crate::entity::{is_local_id, merge_patches, Entity, EntityType, Record};
use crate::error::SyncError;
use crate::models::{Account, Contact};

/// Kind of mutation carried by a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(format!("unknown operation kind '{}'", other)),
        }
    }
}

/// A mutation of one entity type, snapshotted at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", bound = "T: Entity")]
pub enum Mutation<T: Entity> {
    Create { record: Record<T> },
    Update { id: String, patch: T::Patch },
    Delete { id: String },
}

impl<T: Entity> Mutation<T> {
    pub fn kind(&self) -> OperationKind {
        match self {
            Mutation::Create { .. } => OperationKind::Create,
            Mutation::Update { .. } => OperationKind::Update,
            Mutation::Delete { .. } => OperationKind::Delete,
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            Mutation::Create { record } => &record.id,
            Mutation::Update { id, .. } | Mutation::Delete { id } => id,
        }
    }
}

/// Queue payload, tagged by entity type; the replay dispatcher matches on it
/// exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "mutation", rename_all = "snake_case")]
pub enum QueuePayload {
    Account(Mutation<Account>),
    Contact(Mutation<Contact>),
}

impl QueuePayload {
    pub fn entity_type(&self) -> EntityType {
        match self {
            QueuePayload::Account(_) => EntityType::Account,
            QueuePayload::Contact(_) => EntityType::Contact,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            QueuePayload::Account(m) => m.kind(),
            QueuePayload::Contact(m) => m.kind(),
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            QueuePayload::Account(m) => m.record_id(),
            QueuePayload::Contact(m) => m.record_id(),
        }
    }
}

/// One pending mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueOperation {
    pub id: String,
    pub seq: i64,
    pub payload: QueuePayload,
    pub timestamp: DateTime<Utc>,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Set once the entry hit the attempt cap or was set aside; excluded from
    /// replay until reset.
    pub exhausted: bool,
    pub last_error: Option<String>,
}

impl QueueOperation {
    pub fn entity_type(&self) -> EntityType {
        self.payload.entity_type()
    }

    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    pub fn record_id(&self) -> &str {
        self.payload.record_id()
    }
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: String,
    seq: i64,
    data: String,
    timestamp: i64,
    attempts: i64,
    last_attempt_at: Option<i64>,
    exhausted: bool,
    last_error: Option<String>,
}

impl QueueRow {
    fn into_operation(self) -> Result<QueueOperation, SyncError> {
        Ok(QueueOperation {
            id: self.id,
            seq: self.seq,
            payload: serde_json::from_str(&self.data)?,
            timestamp: from_millis(self.timestamp),
            attempts: u32::try_from(self.attempts).unwrap_or(0),
            last_attempt_at: self.last_attempt_at.map(from_millis),
            exhausted: self.exhausted,
            last_error: self.last_error,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, seq, data, timestamp, attempts, last_attempt_at, exhausted, last_error FROM sync_queue";

/// Append-only log of pending mutations, persisted next to the record tables.
#[derive(Clone, Debug)]
pub struct SyncQueue {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SyncQueue {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Appends an entry in its own transaction.
    pub async fn enqueue(&self, payload: QueuePayload) -> Result<QueueOperation, SyncError> {
        let mut tx = self.pool.begin().await?;
        let op = self.enqueue_in(&mut tx, payload).await?;
        tx.commit().await?;
        Ok(op)
    }

    pub async fn get(&self, id: &str) -> Result<Option<QueueOperation>, SyncError> {
        let mut conn = self.pool.acquire().await?;
        self.get_in(&mut conn, id).await
    }

    /// All entries in replay order.
    pub async fn list(&self) -> Result<Vec<QueueOperation>, SyncError> {
        let sql = format!("{} ORDER BY timestamp ASC, seq ASC", SELECT_COLUMNS);
        let rows: Vec<QueueRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(QueueRow::into_operation).collect()
    }

    /// Entries that hit the attempt cap or were set aside.
    pub async fn exhausted(&self) -> Result<Vec<QueueOperation>, SyncError> {
        let sql = format!(
            "{} WHERE exhausted = 1 ORDER BY timestamp ASC, seq ASC",
            SELECT_COLUMNS
        );
        let rows: Vec<QueueRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(QueueRow::into_operation).collect()
    }

    /// Number of pending entries, exhausted ones included.
    pub async fn len(&self) -> Result<usize, SyncError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub async fn is_empty(&self) -> Result<bool, SyncError> {
        Ok(self.len().await? == 0)
    }

    /// Bumps `attempts` and stamps `last_attempt_at`, returning the updated entry.
    pub async fn record_attempt(&self, id: &str) -> Result<Option<QueueOperation>, SyncError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE sync_queue SET attempts = attempts + 1, last_attempt_at = ? WHERE id = ?",
        )
        .bind(to_millis(self.clock.now()))
        .bind(id)
        .execute(&mut *tx)
        .await?;
        let op = self.get_in(&mut tx, id).await?;
        tx.commit().await?;
        Ok(op)
    }

    /// Records a failed attempt, flagging the entry once it reaches `max_attempts`.
    pub async fn record_failure(
        &self,
        id: &str,
        error: &str,
        max_attempts: u32,
    ) -> Result<(), SyncError> {
        sqlx::query(
            "UPDATE sync_queue SET last_error = ?, exhausted = (attempts >= ?) WHERE id = ?",
        )
        .bind(error)
        .bind(i64::from(max_attempts))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_exhausted(&self, id: &str) -> Result<(), SyncError> {
        sqlx::query("UPDATE sync_queue SET exhausted = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Takes an entry out of rotation without counting an attempt.
    pub async fn set_aside(&self, id: &str, reason: &str) -> Result<(), SyncError> {
        sqlx::query("UPDATE sync_queue SET exhausted = 1, last_error = ? WHERE id = ?")
            .bind(reason)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The queued create for `record_id`, if it has not replayed yet.
    pub async fn create_entry_for(
        &self,
        record_id: &str,
    ) -> Result<Option<QueueOperation>, SyncError> {
        let sql = format!(
            "{} WHERE record_id = ? AND kind = 'create' ORDER BY timestamp ASC, seq ASC LIMIT 1",
            SELECT_COLUMNS
        );
        let row: Option<QueueRow> = sqlx::query_as(&sql)
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(QueueRow::into_operation).transpose()
    }

    /// Manually clears an entry. Returns false if it did not exist.
    pub async fn remove(&self, id: &str) -> Result<bool, SyncError> {
        let mut conn = self.pool.acquire().await?;
        self.remove_in(&mut conn, id).await
    }

    /// Zeroes the attempt count so an exhausted entry rejoins replay.
    pub async fn reset(&self, id: &str) -> Result<bool, SyncError> {
        let result = sqlx::query(
            "UPDATE sync_queue SET attempts = 0, exhausted = 0, last_error = NULL WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(crate) async fn get_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<Option<QueueOperation>, SyncError> {
        let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
        let row: Option<QueueRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(QueueRow::into_operation).transpose()
    }

    pub(crate) async fn enqueue_in(
        &self,
        conn: &mut SqliteConnection,
        payload: QueuePayload,
    ) -> Result<QueueOperation, SyncError> {
        let seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) + 1 FROM sync_queue")
            .fetch_one(&mut *conn)
            .await?;

        let op = QueueOperation {
            id: Uuid::new_v4().to_string(),
            seq,
            payload,
            timestamp: self.clock.now(),
            attempts: 0,
            last_attempt_at: None,
            exhausted: false,
            last_error: None,
        };

        sqlx::query(
            r#"
            INSERT INTO sync_queue (id, seq, entity_type, kind, record_id, data, timestamp, attempts, exhausted)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0)
            "#,
        )
        .bind(&op.id)
        .bind(op.seq)
        .bind(op.entity_type().as_str())
        .bind(op.kind().as_str())
        .bind(op.record_id())
        .bind(serde_json::to_string(&op.payload)?)
        .bind(to_millis(op.timestamp))
        .execute(&mut *conn)
        .await?;

        tracing::debug!(
            "Queued {} {} '{}' as entry {}",
            op.kind(),
            op.entity_type(),
            op.record_id(),
            op.id
        );

        Ok(op)
    }

    /// Queues an update, folding it into the record's latest entry when that
    /// entry is a never-attempted create or update.
    pub(crate) async fn enqueue_update_in<T: Entity>(
        &self,
        conn: &mut SqliteConnection,
        record: &Record<T>,
        patch: &T::Patch,
    ) -> Result<QueueOperation, SyncError> {
        let mut latest = self
            .latest_foldable_in(conn, T::ENTITY_TYPE, &record.id)
            .await?;
        if let Some(entry) = &latest {
            if self
                .references_created_after_in::<T>(conn, patch, entry)
                .await?
            {
                tracing::debug!(
                    "Not folding update of {} '{}' into entry {}: it references a later create",
                    T::ENTITY_TYPE,
                    record.id,
                    entry.id
                );
                latest = None;
            }
        }

        if let Some(mut latest) = latest {
            let folded = match T::from_payload(latest.payload.clone()) {
                Some(Mutation::Create { .. }) => Some(Mutation::Create {
                    record: record.clone(),
                }),
                Some(Mutation::Update { id, patch: earlier }) => Some(Mutation::Update {
                    id,
                    patch: merge_patches::<T>(&earlier, patch)?,
                }),
                _ => None,
            };

            if let Some(mutation) = folded {
                latest.payload = T::into_payload(mutation);
                sqlx::query("UPDATE sync_queue SET data = ? WHERE id = ?")
                    .bind(serde_json::to_string(&latest.payload)?)
                    .bind(&latest.id)
                    .execute(&mut *conn)
                    .await?;
                tracing::debug!(
                    "Folded update of {} '{}' into entry {}",
                    T::ENTITY_TYPE,
                    record.id,
                    latest.id
                );
                return Ok(latest);
            }
        }

        let mutation = Mutation::Update {
            id: record.id.clone(),
            patch: patch.clone(),
        };
        self.enqueue_in(conn, T::into_payload(mutation)).await
    }

    /// Queues a delete, dropping never-attempted updates it supersedes.
    pub(crate) async fn enqueue_delete_in<T: Entity>(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<QueueOperation, SyncError> {
        let dropped = sqlx::query(
            r#"
            DELETE FROM sync_queue
            WHERE entity_type = ? AND record_id = ? AND kind = 'update'
              AND attempts = 0 AND exhausted = 0
            "#,
        )
        .bind(T::ENTITY_TYPE.as_str())
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if dropped > 0 {
            tracing::debug!(
                "Dropped {} pending update(s) superseded by delete of {} '{}'",
                dropped,
                T::ENTITY_TYPE,
                id
            );
        }

        let mutation = Mutation::<T>::Delete { id: id.to_string() };
        self.enqueue_in(conn, T::into_payload(mutation)).await
    }

    pub(crate) async fn remove_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<bool, SyncError> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Removes every entry for a record.
    pub(crate) async fn drop_for_record_in(
        &self,
        conn: &mut SqliteConnection,
        entity_type: EntityType,
        record_id: &str,
    ) -> Result<u64, SyncError> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE entity_type = ? AND record_id = ?")
            .bind(entity_type.as_str())
            .bind(record_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    pub(crate) async fn remaining_for_in(
        &self,
        conn: &mut SqliteConnection,
        entity_type: EntityType,
        record_id: &str,
    ) -> Result<i64, SyncError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_queue WHERE entity_type = ? AND record_id = ?",
        )
        .bind(entity_type.as_str())
        .bind(record_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count)
    }

    /// Points remaining entries for `old_id` at `new_id`. Their payloads keep
    /// the old id and resolve it through the id map at dispatch.
    pub(crate) async fn rename_record_in(
        &self,
        conn: &mut SqliteConnection,
        entity_type: EntityType,
        old_id: &str,
        new_id: &str,
    ) -> Result<u64, SyncError> {
        let result = sqlx::query(
            "UPDATE sync_queue SET record_id = ? WHERE entity_type = ? AND record_id = ?",
        )
        .bind(new_id)
        .bind(entity_type.as_str())
        .bind(old_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// True if the patch points at a local-origin record whose create entry
    /// replays after `entry`. Folding into `entry` would then send the
    /// reference before its target exists.
    async fn references_created_after_in<T: Entity>(
        &self,
        conn: &mut SqliteConnection,
        patch: &T::Patch,
        entry: &QueueOperation,
    ) -> Result<bool, SyncError> {
        let mut patch = patch.clone();
        let at = to_millis(entry.timestamp);
        for reference in T::patch_references_mut(&mut patch) {
            if !is_local_id(reference) {
                continue;
            }
            let later: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM sync_queue
                WHERE record_id = ? AND kind = 'create'
                  AND (timestamp > ? OR (timestamp = ? AND seq > ?))
                "#,
            )
            .bind(reference.as_str())
            .bind(at)
            .bind(at)
            .bind(entry.seq)
            .fetch_one(&mut *conn)
            .await?;
            if later > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn latest_foldable_in(
        &self,
        conn: &mut SqliteConnection,
        entity_type: EntityType,
        record_id: &str,
    ) -> Result<Option<QueueOperation>, SyncError> {
        let sql = format!(
            "{} WHERE entity_type = ? AND record_id = ? ORDER BY timestamp DESC, seq DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let row: Option<QueueRow> = sqlx::query_as(&sql)
            .bind(entity_type.as_str())
            .bind(record_id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row
            .map(QueueRow::into_operation)
            .transpose()?
            .filter(|op| op.attempts == 0 && !op.exhausted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{AccountPatch, Contact, ContactPatch};
    use crate::store::init_db;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    struct TestContext {
        queue: SyncQueue,
        clock: Arc<ManualClock>,
        _temp_dir: TempDir,
    }

    async fn setup_queue() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(&temp_dir.path().join("test.db")).await.unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
        ));
        TestContext {
            queue: SyncQueue::new(pool, clock.clone()),
            clock,
            _temp_dir: temp_dir,
        }
    }

    fn create_account(id: &str, name: &str) -> QueuePayload {
        QueuePayload::Account(Mutation::Create {
            record: Record::new(id, Account::new(name)),
        })
    }

    #[test]
    fn test_payload_is_tagged_by_entity_and_kind() {
        let payload = QueuePayload::Contact(Mutation::Delete { id: "c9".into() });
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["entity_type"], "contact");
        assert_eq!(value["mutation"]["kind"], "delete");
        assert_eq!(value["mutation"]["id"], "c9");

        let back: QueuePayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
        assert_eq!(back.kind(), OperationKind::Delete);
        assert_eq!(back.record_id(), "c9");
    }

    #[tokio::test]
    async fn test_enqueue_persists_snapshot() {
        let ctx = setup_queue().await;

        let op = ctx
            .queue
            .enqueue(create_account("local_a", "Acme"))
            .await
            .unwrap();
        assert_eq!(op.attempts, 0);
        assert_eq!(op.entity_type(), EntityType::Account);
        assert_eq!(op.kind(), OperationKind::Create);

        let fetched = ctx.queue.get(&op.id).await.unwrap().unwrap();
        assert_eq!(fetched, op);
        assert_eq!(ctx.queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_orders_by_timestamp_then_seq() {
        let ctx = setup_queue().await;
        let base = ctx.clock.now();

        ctx.clock.set(base + Duration::seconds(20));
        let late = ctx.queue.enqueue(create_account("a3", "Late")).await.unwrap();
        ctx.clock.set(base);
        let early = ctx.queue.enqueue(create_account("a1", "Early")).await.unwrap();
        let same_ms = ctx.queue.enqueue(create_account("a2", "Tie")).await.unwrap();

        let ids: Vec<String> = ctx
            .queue
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(ids, vec![early.id, same_ms.id, late.id]);
    }

    #[tokio::test]
    async fn test_record_attempt_and_failure_flag_exhaustion() {
        let ctx = setup_queue().await;
        let op = ctx.queue.enqueue(create_account("a1", "Acme")).await.unwrap();

        for expected in 1..=3u32 {
            let attempted = ctx.queue.record_attempt(&op.id).await.unwrap().unwrap();
            assert_eq!(attempted.attempts, expected);
            assert!(attempted.last_attempt_at.is_some());
            ctx.queue
                .record_failure(&op.id, "connection refused", 3)
                .await
                .unwrap();
        }

        let failed = ctx.queue.get(&op.id).await.unwrap().unwrap();
        assert!(failed.exhausted);
        assert_eq!(failed.last_error.as_deref(), Some("connection refused"));
        assert_eq!(ctx.queue.exhausted().await.unwrap().len(), 1);

        assert!(ctx.queue.reset(&op.id).await.unwrap());
        let reset = ctx.queue.get(&op.id).await.unwrap().unwrap();
        assert_eq!(reset.attempts, 0);
        assert!(!reset.exhausted);
        assert!(reset.last_error.is_none());
    }

    #[tokio::test]
    async fn test_update_folds_into_pending_update() {
        let ctx = setup_queue().await;
        let pool = ctx.queue.pool.clone();
        let record = Record::new("acc_1", Account::new("Acme"));

        let mut conn = pool.acquire().await.unwrap();
        let first = ctx
            .queue
            .enqueue_update_in(
                &mut conn,
                &record,
                &AccountPatch {
                    name: Some("Acme Corp".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let second = ctx
            .queue
            .enqueue_update_in(
                &mut conn,
                &record,
                &AccountPatch {
                    phone: Some("555-0100".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        drop(conn);

        assert_eq!(first.id, second.id);
        assert_eq!(ctx.queue.len().await.unwrap(), 1);
        match second.payload {
            QueuePayload::Account(Mutation::Update { patch, .. }) => {
                assert_eq!(patch.name.as_deref(), Some("Acme Corp"));
                assert_eq!(patch.phone.as_deref(), Some("555-0100"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_does_not_fold_into_attempted_entry() {
        let ctx = setup_queue().await;
        let op = ctx.queue.enqueue(create_account("local_a", "Acme")).await.unwrap();
        ctx.queue.record_attempt(&op.id).await.unwrap();

        let record = Record::new("local_a", Account::new("Acme Ltd"));
        let mut conn = ctx.queue.pool.acquire().await.unwrap();
        let update = ctx
            .queue
            .enqueue_update_in(&mut conn, &record, &AccountPatch::default())
            .await
            .unwrap();
        drop(conn);

        assert_ne!(update.id, op.id);
        assert_eq!(update.kind(), OperationKind::Update);
        assert_eq!(ctx.queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_update_does_not_fold_past_later_referenced_create() {
        let ctx = setup_queue().await;
        let contact = Record::new("local_c", Contact::new("Ada", "Lovelace"));
        let contact_create = ctx
            .queue
            .enqueue(QueuePayload::Contact(Mutation::Create {
                record: contact.clone(),
            }))
            .await
            .unwrap();
        ctx.clock.advance(Duration::seconds(1));
        ctx.queue.enqueue(create_account("local_a", "Acme")).await.unwrap();
        ctx.clock.advance(Duration::seconds(1));

        let patch = ContactPatch {
            account_id: Some("local_a".into()),
            ..Default::default()
        };
        let mut conn = ctx.queue.pool.acquire().await.unwrap();
        let update = ctx
            .queue
            .enqueue_update_in(&mut conn, &contact, &patch)
            .await
            .unwrap();
        drop(conn);

        assert_ne!(update.id, contact_create.id);
        assert_eq!(update.kind(), OperationKind::Update);
        let kinds: Vec<_> = ctx
            .queue
            .list()
            .await
            .unwrap()
            .iter()
            .map(|op| (op.entity_type(), op.kind()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (EntityType::Contact, OperationKind::Create),
                (EntityType::Account, OperationKind::Create),
                (EntityType::Contact, OperationKind::Update),
            ]
        );
    }

    #[tokio::test]
    async fn test_update_folds_when_referenced_create_is_earlier() {
        let ctx = setup_queue().await;
        ctx.queue.enqueue(create_account("local_a", "Acme")).await.unwrap();
        ctx.clock.advance(Duration::seconds(1));
        let contact = Record::new("local_c", Contact::new("Ada", "Lovelace"));
        let contact_create = ctx
            .queue
            .enqueue(QueuePayload::Contact(Mutation::Create {
                record: contact.clone(),
            }))
            .await
            .unwrap();

        let patch = ContactPatch {
            account_id: Some("local_a".into()),
            ..Default::default()
        };
        let mut conn = ctx.queue.pool.acquire().await.unwrap();
        let folded = ctx
            .queue
            .enqueue_update_in(&mut conn, &contact, &patch)
            .await
            .unwrap();
        drop(conn);

        assert_eq!(folded.id, contact_create.id);
        assert_eq!(ctx.queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_drops_pending_updates() {
        let ctx = setup_queue().await;
        let record = Record::new("acc_1", Account::new("Acme"));

        let mut conn = ctx.queue.pool.acquire().await.unwrap();
        ctx.queue
            .enqueue_update_in(&mut conn, &record, &AccountPatch::default())
            .await
            .unwrap();
        let delete = ctx
            .queue
            .enqueue_delete_in::<Account>(&mut conn, "acc_1")
            .await
            .unwrap();
        drop(conn);

        let ops = ctx.queue.list().await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].id, delete.id);
        assert_eq!(ops[0].kind(), OperationKind::Delete);
    }

    #[tokio::test]
    async fn test_remove_reports_missing_entries() {
        let ctx = setup_queue().await;
        let op = ctx.queue.enqueue(create_account("a1", "Acme")).await.unwrap();

        assert!(ctx.queue.remove(&op.id).await.unwrap());
        assert!(!ctx.queue.remove(&op.id).await.unwrap());
        assert!(ctx.queue.is_empty().await.unwrap());
    }
}
