//! Online-first CRUD that degrades to the local store.
//!
//! Every call picks a path: online with a server id goes to the gateway and
//! mirrors the answer into the store; offline, local-origin ids, and any
//! gateway failure go through the store (and therefore the queue). Callers
//! only ever see clean records or `NotFound`.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::connectivity::ConnectivityMonitor;
use crate::entity::{is_local_id, Entity, Record, SyncStatus};
use crate::error::SyncError;
use crate::gateway::{GatewayError, RemoteGateway};
use crate::models::{Account, Contact};
use crate::store::LocalStore;

pub struct OfflineFacade<G: RemoteGateway> {
    store: LocalStore,
    gateway: Arc<G>,
    monitor: Arc<ConnectivityMonitor>,
}

impl<G: RemoteGateway> OfflineFacade<G> {
    pub fn new(store: LocalStore, gateway: Arc<G>, monitor: Arc<ConnectivityMonitor>) -> Self {
        Self {
            store,
            gateway,
            monitor,
        }
    }

    pub fn accounts(&self) -> OfflineRepository<Account, G> {
        self.repository()
    }

    pub fn contacts(&self) -> OfflineRepository<Contact, G> {
        self.repository()
    }

    pub fn repository<T: Entity>(&self) -> OfflineRepository<T, G> {
        OfflineRepository {
            store: self.store.clone(),
            gateway: Arc::clone(&self.gateway),
            monitor: Arc::clone(&self.monitor),
            _entity: PhantomData,
        }
    }
}

/// CRUD surface for one entity type.
pub struct OfflineRepository<T: Entity, G: RemoteGateway> {
    store: LocalStore,
    gateway: Arc<G>,
    monitor: Arc<ConnectivityMonitor>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, G: RemoteGateway> OfflineRepository<T, G> {
    /// Live records. When online, the server's list is cached first; the
    /// result always comes from the store so pending local creates show up.
    pub async fn get_all(&self) -> Result<Vec<Record<T>>, SyncError> {
        if self.monitor.is_online() {
            match self.gateway.get_all::<T>().await {
                Ok(records) => {
                    let written = self.store.save_from_server(&records).await?;
                    tracing::debug!("Cached {} {} record(s) from server", written, T::ENTITY_TYPE);
                }
                Err(e) => self.log_fallback("list", "", &e),
            }
        }
        self.store.get_all().await
    }

    /// A reconciled local id still finds its record under the server id.
    pub async fn get(&self, id: &str) -> Result<Option<Record<T>>, SyncError> {
        let id = self.store.resolve_id(id).await?;
        if self.monitor.is_online() && !is_local_id(&id) {
            match self.gateway.get_by_id::<T>(&id).await {
                Ok(record) => {
                    self.store.save_from_server(&[record]).await?;
                }
                Err(GatewayError::NotFound { .. }) => {
                    self.forget_if_synced(&id).await?;
                }
                Err(e) => self.log_fallback("get", &id, &e),
            }
        }
        self.store.get_by_id(&id).await
    }

    pub async fn create(&self, payload: T) -> Result<Record<T>, SyncError> {
        let mut payload = payload;
        self.store.resolve_references(&mut payload).await?;

        let has_local_refs = payload
            .references_mut()
            .iter()
            .any(|reference| is_local_id(reference));
        if self.monitor.is_online() && !has_local_refs {
            match self.gateway.create(&payload).await {
                Ok(record) => {
                    self.store.save_from_server(std::slice::from_ref(&record)).await?;
                    return Ok(record);
                }
                Err(e) => self.log_fallback("create", "", &e),
            }
        }
        self.store.create(None, payload).await
    }

    pub async fn update(&self, id: &str, patch: T::Patch) -> Result<Record<T>, SyncError> {
        let id = self.store.resolve_id(id).await?;
        let mut patch = patch;
        self.store.resolve_patch_references::<T>(&mut patch).await?;

        let has_local_refs = T::patch_references_mut(&mut patch)
            .iter()
            .any(|reference| is_local_id(reference));
        if self.remote_eligible(&id).await? && !has_local_refs {
            match self.gateway.update::<T>(&id, &patch).await {
                Ok(record) => {
                    self.store.save_from_server(std::slice::from_ref(&record)).await?;
                    return Ok(record);
                }
                Err(GatewayError::NotFound { .. }) => {
                    self.forget_if_synced(&id).await?;
                    return Err(SyncError::not_found(T::ENTITY_TYPE, id));
                }
                Err(e) => self.log_fallback("update", &id, &e),
            }
        }
        self.store.update::<T>(&id, &patch).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), SyncError> {
        let id = self.store.resolve_id(id).await?;
        if self.remote_eligible(&id).await? {
            match self.gateway.delete::<T>(&id).await {
                Ok(()) | Err(GatewayError::NotFound { .. }) => {
                    self.store.purge::<T>(&id).await?;
                    return Ok(());
                }
                Err(e) => self.log_fallback("delete", &id, &e),
            }
        }
        self.store.delete::<T>(&id).await.map(|_| ())
    }

    /// Online, a server id, and no unsynced local changes that a direct call
    /// would overtake.
    async fn remote_eligible(&self, id: &str) -> Result<bool, SyncError> {
        if !self.monitor.is_online() || is_local_id(id) {
            return Ok(false);
        }
        Ok(match self.store.get_stored::<T>(id).await? {
            Some(stored) => stored.sync_status == SyncStatus::Synced,
            None => true,
        })
    }

    /// Drops a cached copy the server no longer has, unless it carries local edits.
    async fn forget_if_synced(&self, id: &str) -> Result<(), SyncError> {
        if let Some(stored) = self.store.get_stored::<T>(id).await? {
            if stored.sync_status == SyncStatus::Synced {
                tracing::debug!("{} '{}' is gone on server; dropping cached copy", T::ENTITY_TYPE, id);
                self.store.purge::<T>(id).await?;
            }
        }
        Ok(())
    }

    fn log_fallback(&self, action: &str, id: &str, error: &GatewayError) {
        tracing::warn!(
            "Remote {} of {} '{}' failed, using local store: {}",
            action,
            T::ENTITY_TYPE,
            id,
            error
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::models::{AccountPatch, ContactPatch};
    use crate::store::{init_db, OperationKind};
    use crate::testing::FakeGateway;
    use tempfile::TempDir;

    struct TestContext {
        facade: OfflineFacade<FakeGateway>,
        store: LocalStore,
        gateway: Arc<FakeGateway>,
        monitor: Arc<ConnectivityMonitor>,
        _temp_dir: TempDir,
    }

    async fn setup(online: bool) -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(&temp_dir.path().join("test.db")).await.unwrap();
        let store = LocalStore::new(pool, Arc::new(SystemClock));
        let gateway = Arc::new(FakeGateway::new());
        let monitor = ConnectivityMonitor::new(online);
        TestContext {
            facade: OfflineFacade::new(store.clone(), Arc::clone(&gateway), Arc::clone(&monitor)),
            store,
            gateway,
            monitor,
            _temp_dir: temp_dir,
        }
    }

    #[tokio::test]
    async fn test_online_create_goes_to_server() {
        let ctx = setup(true).await;

        let created = ctx.facade.accounts().create(Account::new("Acme")).await.unwrap();
        assert_eq!(created.id, "account_1");

        let stored = ctx
            .store
            .get_stored::<Account>("account_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert!(ctx.store.queue().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_offline_create_is_queued() {
        let ctx = setup(false).await;

        let created = ctx.facade.accounts().create(Account::new("Acme")).await.unwrap();
        assert!(created.is_local());
        assert_eq!(ctx.facade.accounts().get_all().await.unwrap(), vec![created]);
        assert_eq!(ctx.store.queue().len().await.unwrap(), 1);
        assert!(ctx.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_gateway_failure_falls_back_to_local() {
        let ctx = setup(true).await;
        ctx.gateway.set_failing(true);

        let created = ctx.facade.accounts().create(Account::new("Acme")).await.unwrap();
        assert!(created.is_local());

        let ops = ctx.store.queue().list().await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind(), OperationKind::Create);
    }

    #[tokio::test]
    async fn test_local_ids_never_reach_the_gateway() {
        let ctx = setup(false).await;
        let account = ctx.facade.accounts().create(Account::new("Acme")).await.unwrap();
        ctx.monitor.set_online(true);

        let contact = ctx
            .facade
            .contacts()
            .create(Contact::new("Ada", "Lovelace").with_account(&account.id))
            .await
            .unwrap();
        assert!(contact.is_local());

        ctx.facade
            .accounts()
            .update(
                &account.id,
                AccountPatch {
                    industry: Some("Looms".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        ctx.facade
            .contacts()
            .update(
                "contact_99",
                ContactPatch {
                    account_id: Some(account.id.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(ctx.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_get_all_reads_through() {
        let ctx = setup(false).await;
        let pending = ctx.facade.accounts().create(Account::new("Pending")).await.unwrap();
        ctx.gateway.seed(&Record::new("acc_1", Account::new("Remote one")));
        ctx.gateway.seed(&Record::new("acc_2", Account::new("Remote two")));
        ctx.monitor.set_online(true);

        let all = ctx.facade.accounts().get_all().await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.contains(&pending));

        let cached = ctx.store.get_stored::<Account>("acc_2").await.unwrap().unwrap();
        assert_eq!(cached.sync_status, SyncStatus::Synced);

        // Still available once the server goes away.
        ctx.monitor.set_online(false);
        assert_eq!(ctx.facade.accounts().get_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_get_drops_copies_deleted_on_server() {
        let ctx = setup(true).await;
        ctx.store
            .save_from_server(&[Record::new("acc_1", Account::new("Stale"))])
            .await
            .unwrap();

        assert!(ctx.facade.accounts().get("acc_1").await.unwrap().is_none());
        assert!(ctx.store.get_stored::<Account>("acc_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_follows_reconciled_local_id() {
        let ctx = setup(false).await;
        let local = ctx.facade.accounts().create(Account::new("Acme")).await.unwrap();
        let entry = ctx.store.queue().list().await.unwrap().remove(0);
        let server = Record::new("acc_1", Account::new("Acme"));
        ctx.gateway.seed(&server);
        ctx.store.reconcile(&entry.id, &local.id, server.clone()).await.unwrap();

        // The store only knows the server id; the facade maps the old one.
        assert!(ctx.store.get_by_id::<Account>(&local.id).await.unwrap().is_none());
        assert_eq!(ctx.facade.accounts().get(&local.id).await.unwrap(), Some(server.clone()));

        ctx.monitor.set_online(true);
        assert_eq!(ctx.facade.accounts().get(&local.id).await.unwrap(), Some(server));
        assert_eq!(ctx.gateway.calls(), vec!["get account acc_1"]);
    }

    #[tokio::test]
    async fn test_delete_online_and_offline() {
        let ctx = setup(true).await;
        for id in ["acc_1", "acc_2"] {
            let record = Record::new(id, Account::new(id));
            ctx.gateway.seed(&record);
            ctx.store.save_from_server(&[record]).await.unwrap();
        }

        ctx.facade.accounts().delete("acc_1").await.unwrap();
        assert!(ctx.gateway.record::<Account>("acc_1").is_none());
        assert!(ctx.store.get_stored::<Account>("acc_1").await.unwrap().is_none());

        ctx.monitor.set_online(false);
        ctx.facade.accounts().delete("acc_2").await.unwrap();
        assert!(ctx.facade.accounts().get("acc_2").await.unwrap().is_none());
        let ops = ctx.store.queue().list().await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind(), OperationKind::Delete);

        assert!(matches!(
            ctx.facade.accounts().delete("acc_404").await,
            Err(SyncError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_with_pending_changes_stays_queued() {
        let ctx = setup(false).await;
        let record = Record::new("acc_1", Account::new("Acme"));
        ctx.gateway.seed(&record);
        ctx.store.save_from_server(&[record]).await.unwrap();

        ctx.facade
            .accounts()
            .update(
                "acc_1",
                AccountPatch {
                    name: Some("Offline edit".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        ctx.monitor.set_online(true);
        let updated = ctx
            .facade
            .accounts()
            .update(
                "acc_1",
                AccountPatch {
                    phone: Some("555-0100".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.payload.name, "Offline edit");
        assert!(ctx.gateway.calls().is_empty());
        assert_eq!(ctx.store.queue().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_online_update_goes_to_server() {
        let ctx = setup(true).await;
        let record = Record::new("acc_1", Account::new("Acme"));
        ctx.gateway.seed(&record);
        ctx.store.save_from_server(&[record]).await.unwrap();

        let updated = ctx
            .facade
            .accounts()
            .update(
                "acc_1",
                AccountPatch {
                    website: Some("https://acme.example".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.payload.website.as_deref(), Some("https://acme.example"));
        assert_eq!(ctx.gateway.calls(), vec!["update account acc_1"]);
        assert!(ctx.store.queue().is_empty().await.unwrap());
    }
}
