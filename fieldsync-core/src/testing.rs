//! In-memory gateway for engine tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::entity::{merge_json, Entity, EntityType, Record};
use crate::gateway::{GatewayError, RemoteGateway};

#[derive(Default)]
pub(crate) struct FakeGateway {
    records: Mutex<BTreeMap<(EntityType, String), Value>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicU64,
    offline: AtomicBool,
    failing: AtomicBool,
    delay_ms: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeGateway {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    /// Makes every write fail as if the server were down, while still
    /// answering pings.
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    pub(crate) fn seed<T: Entity>(&self, record: &Record<T>) {
        let value = serde_json::to_value(record).unwrap();
        self.records
            .lock()
            .unwrap()
            .insert((T::ENTITY_TYPE, record.id.clone()), value);
    }

    pub(crate) fn record<T: Entity>(&self, id: &str) -> Option<Record<T>> {
        self.records
            .lock()
            .unwrap()
            .get(&(T::ENTITY_TYPE, id.to_string()))
            .map(|value| serde_json::from_value(value.clone()).unwrap())
    }

    pub(crate) fn count<T: Entity>(&self) -> usize {
        self.records
            .lock()
            .unwrap()
            .keys()
            .filter(|(entity_type, _)| *entity_type == T::ENTITY_TYPE)
            .count()
    }

    /// Calls made so far, e.g. `create account` or `delete contact ct_2`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: String) -> Result<(), GatewayError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("offline".into()));
        }
        self.calls.lock().unwrap().push(call);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn get_all<T: Entity>(&self) -> Result<Vec<Record<T>>, GatewayError> {
        self.enter(format!("list {}", T::ENTITY_TYPE)).await?;
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|((entity_type, _), _)| *entity_type == T::ENTITY_TYPE)
            .map(|(_, value)| serde_json::from_value(value.clone()).unwrap())
            .collect())
    }

    async fn get_by_id<T: Entity>(&self, id: &str) -> Result<Record<T>, GatewayError> {
        self.enter(format!("get {} {}", T::ENTITY_TYPE, id)).await?;
        self.record::<T>(id).ok_or_else(|| GatewayError::NotFound {
            entity_type: T::ENTITY_TYPE,
            id: id.to_string(),
        })
    }

    async fn create<T: Entity>(&self, payload: &T) -> Result<Record<T>, GatewayError> {
        self.enter(format!("create {}", T::ENTITY_TYPE)).await?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = Record::new(format!("{}_{}", T::ENTITY_TYPE, n), payload.clone());
        self.seed(&record);
        Ok(record)
    }

    async fn update<T: Entity>(
        &self,
        id: &str,
        patch: &T::Patch,
    ) -> Result<Record<T>, GatewayError> {
        self.enter(format!("update {} {}", T::ENTITY_TYPE, id)).await?;
        let mut records = self.records.lock().unwrap();
        let existing = records
            .get_mut(&(T::ENTITY_TYPE, id.to_string()))
            .ok_or_else(|| GatewayError::NotFound {
                entity_type: T::ENTITY_TYPE,
                id: id.to_string(),
            })?;
        merge_json(existing, serde_json::to_value(patch).unwrap());
        Ok(serde_json::from_value(existing.clone()).unwrap())
    }

    async fn delete<T: Entity>(&self, id: &str) -> Result<(), GatewayError> {
        self.enter(format!("delete {} {}", T::ENTITY_TYPE, id)).await?;
        self.records
            .lock()
            .unwrap()
            .remove(&(T::ENTITY_TYPE, id.to_string()))
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound {
                entity_type: T::ENTITY_TYPE,
                id: id.to_string(),
            })
    }

    async fn ping(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}
