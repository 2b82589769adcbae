//! In-process store backend
//!
//! Implements every store capability on top of locked maps so the router
//! can run without external databases. Transactions stage their writes and
//! apply them atomically on commit; dropping an uncommitted transaction
//! discards it. A fault switch makes every write fail, which lets callers
//! exercise rollback and isolation paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::{
    CatalogStore, CatalogTransaction, Connector, LogStore, LogTransaction, StoreBackend,
    TenantStore, Transaction,
};
use crate::catalog::{ShardDescriptor, ShardId, Technology};
use crate::error::{Error, Result};
use crate::record::{LogRecord, PageRequest};
use crate::tenant::{Tenant, TenantId};

#[derive(Debug, Default)]
struct MemoryState {
    tenants: RwLock<HashMap<TenantId, Tenant>>,
    logs: RwLock<HashMap<Uuid, LogRecord>>,
    catalog: RwLock<BTreeMap<ShardId, ShardDescriptor>>,
    failing: AtomicBool,
    lookups_failing: AtomicBool,
    tenant_reads: AtomicUsize,
    catalog_writes: AtomicUsize,
    stores_built: AtomicUsize,
}

impl MemoryState {
    fn check_writable(&self, label: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::transient(label, "backend rejected write"));
        }
        Ok(())
    }
}

/// In-process backend for one shard
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    technology: Technology,
    label: String,
    state: Arc<MemoryState>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new(technology: Technology, label: impl Into<String>) -> Self {
        Self {
            technology,
            label: label.into(),
            state: Arc::new(MemoryState::default()),
        }
    }

    /// Make every subsequent write fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Make tenant lookups by ID fail (or succeed again)
    pub fn set_lookups_failing(&self, failing: bool) {
        self.state.lookups_failing.store(failing, Ordering::SeqCst);
    }

    /// Number of tenant lookups served so far
    pub fn tenant_reads(&self) -> usize {
        self.state.tenant_reads.load(Ordering::SeqCst)
    }

    /// Number of catalog descriptors written so far
    pub fn catalog_writes(&self) -> usize {
        self.state.catalog_writes.load(Ordering::SeqCst)
    }

    /// Number of entity stores constructed from this backend
    pub fn stores_built(&self) -> usize {
        self.state.stores_built.load(Ordering::SeqCst)
    }

    /// Snapshot of the stored catalog
    pub fn catalog_snapshot(&self) -> Vec<ShardDescriptor> {
        self.state.catalog.read().values().cloned().collect()
    }

    /// Snapshot of all stored logs
    pub fn log_snapshot(&self) -> Vec<LogRecord> {
        self.state.logs.read().values().cloned().collect()
    }

    /// Insert a record bypassing routing, e.g. to backfill historical data
    pub fn insert_log_raw(&self, record: LogRecord) {
        self.state.logs.write().insert(record.id, record);
    }

    /// Insert a tenant bypassing placement
    pub fn insert_tenant_raw(&self, tenant: Tenant) {
        self.state.tenants.write().insert(tenant.id, tenant);
    }

    /// Insert a descriptor bypassing the fault switch and write counter
    pub fn insert_descriptor_raw(&self, descriptor: ShardDescriptor) {
        self.state.catalog.write().insert(descriptor.id, descriptor);
    }

    fn store(&self) -> MemoryStore {
        self.state.stores_built.fetch_add(1, Ordering::SeqCst);
        MemoryStore {
            label: self.label.clone(),
            state: self.state.clone(),
        }
    }
}

impl StoreBackend for MemoryBackend {
    fn technology(&self) -> Technology {
        self.technology
    }

    fn tenant_store(&self) -> Result<Arc<dyn TenantStore>> {
        Ok(Arc::new(self.store()))
    }

    fn log_store(&self) -> Result<Arc<dyn LogStore>> {
        Ok(Arc::new(self.store()))
    }

    fn catalog_store(&self) -> Result<Arc<dyn CatalogStore>> {
        Ok(Arc::new(self.store()))
    }
}

/// Entity store view over a [`MemoryBackend`]
#[derive(Debug, Clone)]
struct MemoryStore {
    label: String,
    state: Arc<MemoryState>,
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn insert(&self, tenant: Tenant) -> Result<()> {
        self.state.check_writable(&self.label)?;
        let mut tenants = self.state.tenants.write();
        if tenants.contains_key(&tenant.id) {
            return Err(Error::validation(format!("Tenant {} already exists", tenant.id)));
        }
        tenants.insert(tenant.id, tenant);
        Ok(())
    }

    async fn get(&self, id: TenantId) -> Result<Option<Tenant>> {
        if self.state.lookups_failing.load(Ordering::SeqCst) {
            return Err(Error::transient(&self.label, "tenant lookup failed"));
        }
        self.state.tenant_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.tenants.read().get(&id).cloned())
    }

    async fn update(&self, tenant: Tenant) -> Result<bool> {
        self.state.check_writable(&self.label)?;
        let mut tenants = self.state.tenants.write();
        match tenants.get_mut(&tenant.id) {
            Some(existing) => {
                *existing = tenant;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: TenantId) -> Result<bool> {
        self.state.check_writable(&self.label)?;
        Ok(self.state.tenants.write().remove(&id).is_some())
    }

    async fn list(&self) -> Result<Vec<Tenant>> {
        Ok(self.state.tenants.read().values().cloned().collect())
    }

    async fn list_by_owner(&self, owner: Uuid) -> Result<Vec<Tenant>> {
        Ok(self
            .state
            .tenants
            .read()
            .values()
            .filter(|t| t.owner == owner)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.state.tenants.read().len())
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn insert(&self, record: LogRecord) -> Result<()> {
        self.state.check_writable(&self.label)?;
        self.state.logs.write().insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<LogRecord>> {
        Ok(self.state.logs.read().get(&id).cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        self.state.check_writable(&self.label)?;
        Ok(self.state.logs.write().remove(&id).is_some())
    }

    async fn exists_older_than(&self, tenant: TenantId, cutoff: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .state
            .logs
            .read()
            .values()
            .any(|r| r.tenant_id == tenant && r.received_at < cutoff))
    }

    async fn page(&self, tenant: TenantId, page: &PageRequest) -> Result<Vec<LogRecord>> {
        page.validate()?;
        let records: Vec<LogRecord> = self
            .state
            .logs
            .read()
            .values()
            .filter(|r| r.tenant_id == tenant)
            .cloned()
            .collect();
        Ok(page.apply(records))
    }

    async fn count(&self, tenant: TenantId) -> Result<usize> {
        Ok(self.state.logs.read().values().filter(|r| r.tenant_id == tenant).count())
    }

    async fn begin(&self, tenant: TenantId) -> Result<Box<dyn LogTransaction>> {
        Ok(Box::new(MemoryLogTransaction {
            store: self.clone(),
            tenant,
            deletes: HashSet::new(),
        }))
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn list(&self) -> Result<Vec<ShardDescriptor>> {
        Ok(self.state.catalog.read().values().cloned().collect())
    }

    async fn get(&self, id: ShardId) -> Result<Option<ShardDescriptor>> {
        Ok(self.state.catalog.read().get(&id).cloned())
    }

    async fn insert(&self, descriptor: ShardDescriptor) -> Result<()> {
        self.state.check_writable(&self.label)?;
        self.state.catalog.write().insert(descriptor.id, descriptor);
        self.state.catalog_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, descriptor: ShardDescriptor) -> Result<bool> {
        self.state.check_writable(&self.label)?;
        let mut catalog = self.state.catalog.write();
        match catalog.get_mut(&descriptor.id) {
            Some(existing) => {
                *existing = descriptor;
                self.state.catalog_writes.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: ShardId) -> Result<bool> {
        self.state.check_writable(&self.label)?;
        Ok(self.state.catalog.write().remove(&id).is_some())
    }

    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>> {
        Ok(Box::new(MemoryCatalogTransaction {
            store: self.clone(),
            inserts: Vec::new(),
        }))
    }
}

struct MemoryLogTransaction {
    store: MemoryStore,
    tenant: TenantId,
    deletes: HashSet<Uuid>,
}

#[async_trait]
impl Transaction for MemoryLogTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.store.state.check_writable(&self.store.label)?;
        let mut logs = self.store.state.logs.write();
        for id in &self.deletes {
            if logs.get(id).map_or(false, |r| r.tenant_id == self.tenant) {
                logs.remove(id);
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl LogTransaction for MemoryLogTransaction {
    async fn select_older_than(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
        Ok(self
            .store
            .state
            .logs
            .read()
            .values()
            .filter(|r| r.tenant_id == self.tenant && r.received_at < cutoff)
            .map(|r| r.id)
            .collect())
    }

    async fn delete(&mut self, ids: &[Uuid]) -> Result<usize> {
        let before = self.deletes.len();
        self.deletes.extend(ids.iter().copied());
        Ok(self.deletes.len() - before)
    }
}

struct MemoryCatalogTransaction {
    store: MemoryStore,
    inserts: Vec<ShardDescriptor>,
}

#[async_trait]
impl Transaction for MemoryCatalogTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let Self { store, inserts } = *self;
        store.state.check_writable(&store.label)?;
        let mut catalog = store.state.catalog.write();
        for descriptor in inserts {
            catalog.insert(descriptor.id, descriptor);
            store.state.catalog_writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl CatalogTransaction for MemoryCatalogTransaction {
    async fn insert(&mut self, descriptor: ShardDescriptor) -> Result<()> {
        self.inserts.push(descriptor);
        Ok(())
    }
}

/// Connector handing out [`MemoryBackend`]s keyed by connection string.
///
/// Two descriptors with the same connection string share one backend.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    backends: DashMap<String, Arc<MemoryBackend>>,
    unreachable: Mutex<HashSet<String>>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    /// Create a connector with no backends
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the backend for a connection string
    pub fn backend(&self, technology: Technology, connection: &str) -> Arc<MemoryBackend> {
        self.backends
            .entry(connection.to_string())
            .or_insert_with(|| Arc::new(MemoryBackend::new(technology, connection)))
            .clone()
    }

    /// Make connection attempts to `connection` fail
    pub fn set_unreachable(&self, connection: &str, unreachable: bool) {
        let mut set = self.unreachable.lock();
        if unreachable {
            set.insert(connection.to_string());
        } else {
            set.remove(connection);
        }
    }

    /// Number of successful connects
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn open(&self, technology: Technology, connection: &str) -> Result<Arc<dyn StoreBackend>> {
        if self.unreachable.lock().contains(connection) {
            return Err(Error::transient(connection, "connection refused"));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.backend(technology, connection))
    }
}

impl Connector for MemoryConnector {
    fn mssql(&self, connection: &str) -> Result<Arc<dyn StoreBackend>> {
        self.open(Technology::MsSql, connection)
    }

    fn mysql(&self, connection: &str, _version: Option<&str>) -> Result<Arc<dyn StoreBackend>> {
        self.open(Technology::MySql, connection)
    }

    fn mongodb(&self, connection: &str) -> Result<Arc<dyn StoreBackend>> {
        self.open(Technology::MongoDb, connection)
    }
}
