//! Per-shard store capabilities
//!
//! Each shard exposes three entity stores (tenants, logs and the shard
//! catalog). Drivers for a storage technology implement [`StoreBackend`] and
//! are produced by a [`Connector`], which the shard handle calls exactly once
//! with the technology named by the shard's descriptor.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::catalog::{ShardDescriptor, ShardId, Technology};
use crate::error::Result;
use crate::record::{LogRecord, PageRequest};
use crate::tenant::{Tenant, TenantId};

pub use memory::{MemoryBackend, MemoryConnector};

/// A shard-local unit of work
#[async_trait]
pub trait Transaction: Send {
    /// Make the staged changes visible
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard the staged changes
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Transaction over the shard catalog
#[async_trait]
pub trait CatalogTransaction: Transaction {
    async fn insert(&mut self, descriptor: ShardDescriptor) -> Result<()>;
}

/// Transaction over one tenant's logs
#[async_trait]
pub trait LogTransaction: Transaction {
    /// IDs of this tenant's logs received strictly before `cutoff`
    async fn select_older_than(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>>;

    /// Stage deletion of the given logs; returns how many were staged
    async fn delete(&mut self, ids: &[Uuid]) -> Result<usize>;
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn insert(&self, tenant: Tenant) -> Result<()>;

    async fn get(&self, id: TenantId) -> Result<Option<Tenant>>;

    async fn update(&self, tenant: Tenant) -> Result<bool>;

    async fn delete(&self, id: TenantId) -> Result<bool>;

    async fn list(&self) -> Result<Vec<Tenant>>;

    async fn list_by_owner(&self, owner: Uuid) -> Result<Vec<Tenant>>;

    async fn count(&self) -> Result<usize>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn insert(&self, record: LogRecord) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<LogRecord>>;

    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Whether the tenant has any log received strictly before `cutoff`
    async fn exists_older_than(&self, tenant: TenantId, cutoff: DateTime<Utc>) -> Result<bool>;

    async fn page(&self, tenant: TenantId, page: &PageRequest) -> Result<Vec<LogRecord>>;

    async fn count(&self, tenant: TenantId) -> Result<usize>;

    /// Begin a transaction scoped to one tenant's logs
    async fn begin(&self, tenant: TenantId) -> Result<Box<dyn LogTransaction>>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ShardDescriptor>>;

    async fn get(&self, id: ShardId) -> Result<Option<ShardDescriptor>>;

    async fn insert(&self, descriptor: ShardDescriptor) -> Result<()>;

    async fn update(&self, descriptor: ShardDescriptor) -> Result<bool>;

    async fn delete(&self, id: ShardId) -> Result<bool>;

    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>>;
}

/// A connected storage backend able to build its entity stores
pub trait StoreBackend: Send + Sync {
    fn technology(&self) -> Technology;

    fn tenant_store(&self) -> Result<Arc<dyn TenantStore>>;

    fn log_store(&self) -> Result<Arc<dyn LogStore>>;

    fn catalog_store(&self) -> Result<Arc<dyn CatalogStore>>;
}

/// Opens storage backends, one entry point per supported technology
pub trait Connector: Send + Sync {
    fn mssql(&self, connection: &str) -> Result<Arc<dyn StoreBackend>>;

    fn mysql(&self, connection: &str, version: Option<&str>) -> Result<Arc<dyn StoreBackend>>;

    fn mongodb(&self, connection: &str) -> Result<Arc<dyn StoreBackend>>;
}
