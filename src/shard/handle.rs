use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::catalog::{ShardDescriptor, ShardId, Technology};
use crate::error::Result;
use crate::store::{CatalogStore, Connector, LogStore, StoreBackend, TenantStore};

/// A live binding to one shard's storage.
///
/// The technology is dispatched once, when the handle is connected. The
/// entity stores are built lazily on first use and at most once each, even
/// under concurrent first access. `seed` and `active` are snapshots of the
/// descriptor taken at construction time.
pub struct ShardHandle {
    descriptor: ShardDescriptor,
    technology: Technology,
    backend: Arc<dyn StoreBackend>,
    tenants: OnceCell<Arc<dyn TenantStore>>,
    logs: OnceCell<Arc<dyn LogStore>>,
    catalog: OnceCell<Arc<dyn CatalogStore>>,
}

impl ShardHandle {
    /// Bind a descriptor to its storage backend
    pub fn connect(descriptor: &ShardDescriptor, connector: &dyn Connector) -> Result<Self> {
        let technology = descriptor.technology()?;

        let backend = match technology {
            Technology::MsSql => connector.mssql(&descriptor.connection)?,
            Technology::MySql => connector.mysql(&descriptor.connection, descriptor.version.as_deref())?,
            Technology::MongoDb => connector.mongodb(&descriptor.connection)?,
        };

        debug!(shard = %descriptor.id, %technology, seed = descriptor.seed, "Connected shard");

        Ok(Self {
            descriptor: descriptor.clone(),
            technology,
            backend,
            tenants: OnceCell::new(),
            logs: OnceCell::new(),
            catalog: OnceCell::new(),
        })
    }

    /// Shard ID
    pub fn id(&self) -> ShardId {
        self.descriptor.id
    }

    pub fn technology(&self) -> Technology {
        self.technology
    }

    /// Whether this is the seed shard
    pub fn is_seed(&self) -> bool {
        self.descriptor.seed
    }

    /// Whether the shard was active when the handle was built
    pub fn is_active(&self) -> bool {
        self.descriptor.active
    }

    /// Whether the shard may receive new tenants
    pub fn is_eligible(&self) -> bool {
        self.descriptor.is_eligible()
    }

    /// The descriptor this handle was built from
    pub fn descriptor(&self) -> &ShardDescriptor {
        &self.descriptor
    }

    pub fn tenant_store(&self) -> Result<Arc<dyn TenantStore>> {
        self.tenants
            .get_or_try_init(|| self.backend.tenant_store())
            .map(Arc::clone)
    }

    pub fn log_store(&self) -> Result<Arc<dyn LogStore>> {
        self.logs.get_or_try_init(|| self.backend.log_store()).map(Arc::clone)
    }

    pub fn catalog_store(&self) -> Result<Arc<dyn CatalogStore>> {
        self.catalog
            .get_or_try_init(|| self.backend.catalog_store())
            .map(Arc::clone)
    }
}

impl fmt::Debug for ShardHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardHandle")
            .field("id", &self.descriptor.id)
            .field("technology", &self.technology)
            .field("seed", &self.descriptor.seed)
            .field("active", &self.descriptor.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryConnector;
    use std::thread;

    #[test]
    fn test_connect_dispatches_by_technology() {
        let connector = MemoryConnector::new();
        for tech in Technology::ALL {
            let descriptor = ShardDescriptor::new(tech.name(), format!("Server={}", tech));
            let handle = ShardHandle::connect(&descriptor, &connector).unwrap();
            assert_eq!(handle.technology(), tech);
            assert_eq!(handle.id(), descriptor.id);
        }
        assert_eq!(connector.connects(), 3);
    }

    #[test]
    fn test_connect_rejects_unknown_technology() {
        let connector = MemoryConnector::new();
        let descriptor = ShardDescriptor::new("cassandra", "Server=x");
        let err = ShardHandle::connect(&descriptor, &connector).unwrap_err();
        assert!(matches!(err, crate::Error::UnsupportedTechnology(_)));
        assert_eq!(connector.connects(), 0);
    }

    #[test]
    fn test_stores_built_once_under_concurrency() {
        let connector = MemoryConnector::new();
        let descriptor = ShardDescriptor::new("mysql", "Server=lazy");
        let backend = connector.backend(Technology::MySql, "Server=lazy");
        let handle = Arc::new(ShardHandle::connect(&descriptor, &connector).unwrap());

        assert_eq!(backend.stores_built(), 0);

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || {
                    handle.tenant_store().unwrap();
                    handle.log_store().unwrap();
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(backend.stores_built(), 2);
        let a = handle.tenant_store().unwrap();
        let b = handle.tenant_store().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_flags_are_snapshots() {
        let connector = MemoryConnector::new();
        let mut descriptor = ShardDescriptor::new("mongodb", "mongodb://snap");
        let handle = ShardHandle::connect(&descriptor, &connector).unwrap();

        descriptor.active = false;
        assert!(handle.is_active());
        assert!(handle.is_eligible());
    }
}
