//! Error types for the sync engine.

use thiserror::Error;

use crate::entity::EntityType;
use crate::gateway::GatewayError;

/// Errors surfaced by the local store, the queue and the facade.
///
/// Transport-level failures (`RemoteUnavailable`, `RemoteRejected`) are
/// downgraded to the local path by [`OfflineRepository`](crate::OfflineRepository);
/// callers of the facade only ever see `NotFound` or a local storage fault.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{entity_type} '{id}' not found")]
    NotFound { entity_type: EntityType, id: String },

    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Remote rejected the request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    #[error("Queue entry '{0}' exceeded its retry limit")]
    RetryExhausted(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub(crate) fn not_found(entity_type: EntityType, id: impl Into<String>) -> Self {
        SyncError::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// True for failures caused by the remote side or the transport.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteUnavailable(_) | SyncError::RemoteRejected { .. }
        )
    }
}

impl From<GatewayError> for SyncError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::NotFound {
                entity_type,
                id,
            } => SyncError::NotFound { entity_type, id },
            GatewayError::Unavailable(msg) => SyncError::RemoteUnavailable(msg),
            GatewayError::Rejected { status, message } => {
                SyncError::RemoteRejected { status, message }
            }
        }
    }
}
