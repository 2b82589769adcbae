use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use super::{ShardHandle, ShardStats, ShardSummary};
use crate::catalog::{ShardDescriptor, ShardId};
use crate::error::{Error, Result};
use crate::metrics::MetricsCollector;
use crate::store::Connector;
use crate::tenant::TenantId;

/// Outcome of one catalog sync run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Number of shards examined
    pub shards: usize,
    /// Size of the catalog union
    pub descriptors: usize,
    /// Descriptors inserted, per shard that was missing any
    pub inserted: BTreeMap<ShardId, usize>,
    /// Shards discovered in the union and registered locally
    pub adopted: Vec<ShardId>,
    /// Shards whose catalog could not be read or written
    pub failures: Vec<(ShardId, String)>,
}

impl SyncReport {
    /// Total number of descriptors inserted across shards
    pub fn total_inserted(&self) -> usize {
        self.inserted.values().sum()
    }

    /// Whether every shard was synced
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Registry of live shard handles.
///
/// Owns one handle per known shard and the tenant resolution cache. Both
/// maps are safe for concurrent use; handle creation for a given shard ID
/// happens at most once.
pub struct ShardRegistry {
    seed_id: ShardId,
    connector: Arc<dyn Connector>,
    handles: DashMap<ShardId, Arc<ShardHandle>>,
    tenant_cache: DashMap<TenantId, ShardId>,
    metrics: Arc<MetricsCollector>,
}

impl ShardRegistry {
    /// Connect the seed shard, read its catalog and connect every other
    /// non-seed shard listed there.
    ///
    /// Failing to reach the seed is fatal. A catalog entry that cannot be
    /// connected is skipped with a warning.
    pub async fn bootstrap(
        seed: ShardDescriptor,
        connector: Arc<dyn Connector>,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self> {
        let seed_handle = Arc::new(ShardHandle::connect(&seed, connector.as_ref())?);
        let descriptors = seed_handle.catalog_store()?.list().await?;

        let registry = Self {
            seed_id: seed.id,
            connector,
            handles: DashMap::new(),
            tenant_cache: DashMap::new(),
            metrics,
        };
        registry.handles.insert(seed.id, seed_handle);

        for descriptor in descriptors.iter().filter(|d| !d.seed && d.id != seed.id) {
            if let Err(e) = registry.register(descriptor) {
                warn!(shard = %descriptor.id, error = %e, "Skipping shard from catalog");
            }
        }

        info!(seed = %seed.id, shards = registry.handles.len(), "Shard registry bootstrapped");
        Ok(registry)
    }

    /// ID of the seed shard
    pub fn seed_id(&self) -> ShardId {
        self.seed_id
    }

    /// The seed shard's handle
    pub fn seed(&self) -> Result<Arc<ShardHandle>> {
        self.handle(self.seed_id)
            .ok_or_else(|| Error::not_found(format!("seed shard {}", self.seed_id)))
    }

    /// Get the handle for a descriptor, connecting it if it is not known yet
    pub fn register(&self, descriptor: &ShardDescriptor) -> Result<Arc<ShardHandle>> {
        match self.handles.entry(descriptor.id) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let handle = Arc::new(ShardHandle::connect(descriptor, self.connector.as_ref())?);
                entry.insert(handle.clone());
                debug!(shard = %descriptor.id, "Registered shard");
                Ok(handle)
            }
        }
    }

    /// Replace the handle for a descriptor, picking up changed flags
    pub fn reload(&self, descriptor: &ShardDescriptor) -> Result<Arc<ShardHandle>> {
        let handle = Arc::new(ShardHandle::connect(descriptor, self.connector.as_ref())?);
        self.handles.insert(descriptor.id, handle.clone());
        Ok(handle)
    }

    /// Forget a shard and any tenant resolutions pointing at it
    pub fn remove(&self, id: ShardId) -> Option<Arc<ShardHandle>> {
        self.tenant_cache.retain(|_, shard| *shard != id);
        self.handles.remove(&id).map(|(_, handle)| handle)
    }

    pub fn handle(&self, id: ShardId) -> Option<Arc<ShardHandle>> {
        self.handles.get(&id).map(|entry| entry.value().clone())
    }

    /// All handles, ordered by shard ID
    pub fn handles(&self) -> Vec<Arc<ShardHandle>> {
        let mut handles: Vec<_> = self.handles.iter().map(|entry| entry.value().clone()).collect();
        handles.sort_by_key(|handle| handle.id());
        handles
    }

    /// Number of registered shards
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Find the shard that owns a tenant.
    ///
    /// Positive results are cached; misses are not, so a tenant created
    /// after a failed lookup is found on the next call. A tenant present on
    /// more than one shard is an error.
    ///
    /// An uncached lookup needs every shard to answer: if any shard's tenant
    /// store fails, that error is returned instead of a partial answer, since
    /// a partial scan could miss a duplicate or report a live tenant as
    /// unknown. Callers that retry (the ingestion consumer requeues) see the
    /// tenant resolve once the shard recovers; a shard that stays down makes
    /// uncached tenants dead-letter after the retry limit.
    pub async fn resolve_tenant_shard(&self, tenant: TenantId) -> Result<Arc<ShardHandle>> {
        let cached = self.tenant_cache.get(&tenant).map(|entry| *entry.value());
        if let Some(shard_id) = cached {
            if let Some(handle) = self.handle(shard_id) {
                self.metrics.increment_cache_hits();
                return Ok(handle);
            }
            self.tenant_cache.remove(&tenant);
        }
        self.metrics.increment_cache_misses();

        let handles = self.handles();
        let lookups = handles.iter().map(|handle| async move {
            let found = handle.tenant_store()?.get(tenant).await?;
            Ok::<_, Error>(found.map(|_| handle.clone()))
        });

        let mut owners = Vec::new();
        for result in join_all(lookups).await {
            if let Some(handle) = result? {
                owners.push(handle);
            }
        }

        match owners.len() {
            0 => Err(Error::not_found(format!("tenant {}", tenant))),
            1 => {
                let owner = owners.remove(0);
                self.tenant_cache.insert(tenant, owner.id());
                debug!(%tenant, shard = %owner.id(), "Resolved tenant");
                Ok(owner)
            }
            _ => {
                let shards: Vec<String> = owners.iter().map(|h| h.id().to_string()).collect();
                error!(%tenant, ?shards, "Tenant exists on more than one shard");
                Err(Error::DuplicateTenant {
                    tenant: tenant.to_string(),
                    shards,
                })
            }
        }
    }

    /// Drop a cached tenant resolution
    pub fn invalidate_tenant(&self, tenant: TenantId) {
        self.tenant_cache.remove(&tenant);
    }

    /// Number of cached tenant resolutions
    pub fn cached_tenants(&self) -> usize {
        self.tenant_cache.len()
    }

    /// Pick the active, non-seed shard with the fewest tenants.
    ///
    /// Ties go to the lowest shard ID. Shards whose tenant count cannot be
    /// read are skipped.
    pub async fn select_placement_shard(&self) -> Result<Arc<ShardHandle>> {
        let eligible: Vec<_> = self.handles().into_iter().filter(|h| h.is_eligible()).collect();

        let counts = join_all(eligible.iter().map(|handle| async move {
            handle.tenant_store()?.count().await
        }))
        .await;

        let mut best: Option<(usize, Arc<ShardHandle>)> = None;
        for (handle, count) in eligible.into_iter().zip(counts) {
            let count = match count {
                Ok(count) => count,
                Err(e) => {
                    warn!(shard = %handle.id(), error = %e, "Skipping shard for placement");
                    continue;
                }
            };
            // Handles are sorted by ID, so strict comparison keeps the lowest ID on ties
            if best.as_ref().map_or(true, |(fewest, _)| count < *fewest) {
                best = Some((count, handle));
            }
        }

        best.map(|(_, handle)| handle).ok_or(Error::NoShardAvailable)
    }

    /// Make every shard's catalog contain the union of all catalogs.
    ///
    /// The union is computed before any write; when two shards hold
    /// different descriptors under one ID, the copy on the lowest shard ID
    /// wins. Each shard receives its missing descriptors in one transaction.
    /// A shard that fails is reported and left for the next run without
    /// affecting the others.
    pub async fn sync_shard_catalog(&self) -> SyncReport {
        let handles = self.handles();
        let mut report = SyncReport {
            shards: handles.len(),
            ..Default::default()
        };

        let listings = join_all(handles.iter().map(|handle| async move {
            handle.catalog_store()?.list().await
        }))
        .await;

        let mut union: BTreeMap<ShardId, ShardDescriptor> = BTreeMap::new();
        let mut present: Vec<(Arc<ShardHandle>, HashSet<ShardId>)> = Vec::new();
        for (handle, listing) in handles.iter().zip(listings) {
            match listing {
                Ok(descriptors) => {
                    let ids = descriptors.iter().map(|d| d.id).collect();
                    for descriptor in descriptors {
                        union.entry(descriptor.id).or_insert(descriptor);
                    }
                    present.push((handle.clone(), ids));
                }
                Err(e) => {
                    warn!(shard = %handle.id(), error = %e, "Failed to read shard catalog");
                    self.metrics.increment_sync_failures();
                    report.failures.push((handle.id(), e.to_string()));
                }
            }
        }
        report.descriptors = union.len();

        let writes = present.iter().map(|(handle, ids)| {
            let missing: Vec<ShardDescriptor> = union
                .values()
                .filter(|d| !ids.contains(&d.id))
                .cloned()
                .collect();
            async move {
                let count = missing.len();
                if count == 0 {
                    return (handle.id(), Ok(0));
                }
                (handle.id(), write_missing(handle, missing).await.map(|_| count))
            }
        });

        for (shard, result) in join_all(writes).await {
            match result {
                Ok(0) => {}
                Ok(count) => {
                    debug!(%shard, count, "Replicated catalog entries");
                    self.metrics.add_catalog_inserts(count);
                    report.inserted.insert(shard, count);
                }
                Err(e) => {
                    warn!(%shard, error = %e, "Failed to replicate catalog");
                    self.metrics.increment_sync_failures();
                    report.failures.push((shard, e.to_string()));
                }
            }
        }

        for descriptor in union.values().filter(|d| !d.seed) {
            if self.handles.contains_key(&descriptor.id) {
                continue;
            }
            match self.register(descriptor) {
                Ok(_) => report.adopted.push(descriptor.id),
                Err(e) => warn!(shard = %descriptor.id, error = %e, "Failed to connect discovered shard"),
            }
        }

        info!(
            shards = report.shards,
            descriptors = report.descriptors,
            inserted = report.total_inserted(),
            failures = report.failures.len(),
            "Shard catalog sync complete"
        );
        report
    }

    /// Gather per-shard tenant counts
    pub async fn stats(&self) -> ShardStats {
        let handles = self.handles();
        let counts = join_all(handles.iter().map(|handle| async move {
            match handle.tenant_store() {
                Ok(store) => store.count().await.ok(),
                Err(_) => None,
            }
        }))
        .await;

        let mut stats = ShardStats::new();
        stats.cached_tenants = self.tenant_cache.len();
        for (handle, tenants) in handles.iter().zip(counts) {
            stats.add(ShardSummary {
                id: handle.id(),
                technology: handle.technology(),
                seed: handle.is_seed(),
                active: handle.is_active(),
                tenants,
            });
        }
        stats
    }
}

async fn write_missing(handle: &ShardHandle, missing: Vec<ShardDescriptor>) -> Result<()> {
    let mut tx = handle.catalog_store()?.begin().await?;
    for descriptor in missing {
        if let Err(e) = tx.insert(descriptor).await {
            if let Err(rollback) = tx.rollback().await {
                warn!(shard = %handle.id(), error = %rollback, "Catalog rollback failed");
            }
            return Err(e);
        }
    }
    tx.commit().await
}
