//! Remote side of the engine.
//!
//! [`RemoteGateway`] is the only seam between the engine and the authoritative
//! store; [`HttpGateway`] is the REST implementation.

mod http;

pub use http::HttpGateway;

use async_trait::async_trait;
use thiserror::Error;

use crate::entity::{Entity, EntityType, Record};

/// Failures reported by a gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{entity_type} '{id}' not found on server")]
    NotFound { entity_type: EntityType, id: String },

    /// Transport failure, timeout or server-side fault; worth retrying.
    #[error("Server unavailable: {0}")]
    Unavailable(String),

    #[error("Server rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Typed CRUD against the authoritative store.
#[async_trait]
pub trait RemoteGateway: Send + Sync + 'static {
    async fn get_all<T: Entity>(&self) -> Result<Vec<Record<T>>, GatewayError>;

    async fn get_by_id<T: Entity>(&self, id: &str) -> Result<Record<T>, GatewayError>;

    /// Creates a record; the server assigns the id it returns.
    async fn create<T: Entity>(&self, payload: &T) -> Result<Record<T>, GatewayError>;

    async fn update<T: Entity>(&self, id: &str, patch: &T::Patch)
        -> Result<Record<T>, GatewayError>;

    async fn delete<T: Entity>(&self, id: &str) -> Result<(), GatewayError>;

    /// Cheap reachability check used by the connectivity probe.
    async fn ping(&self) -> bool;
}
