//! Administrative operations
//!
//! Shard and tenant management plus paged log listing, on top of the shard
//! registry. Catalog changes are written to every shard; tenant changes go
//! to the owning shard only.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{NewShard, ShardDescriptor, ShardEdit, ShardId};
use crate::error::{Error, Result};
use crate::queue::{MessageQueue, QueueTopology, DEFAULT_QUEUE_NAME};
use crate::record::{LogRecord, LogSubmission, PageRequest};
use crate::shard::{ShardHandle, ShardRegistry, ShardStats};
use crate::tenant::{NewTenant, Tenant, TenantId, TenantUpdate};

/// One page of a tenant's logs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPage {
    pub records: Vec<LogRecord>,
    /// Total number of the tenant's logs
    pub total: usize,
    pub page: usize,
    pub size: usize,
}

/// Administrative facade over a shard registry
pub struct Admin {
    registry: Arc<ShardRegistry>,
    default_retention: Duration,
    queue: Option<Arc<dyn MessageQueue>>,
    topology: QueueTopology,
    declared: OnceCell<()>,
}

impl Admin {
    /// Create a facade; new tenants get `default_retention`
    pub fn new(registry: Arc<ShardRegistry>, default_retention: Duration) -> Self {
        Self {
            registry,
            default_retention,
            queue: None,
            topology: QueueTopology::for_queue(DEFAULT_QUEUE_NAME),
            declared: OnceCell::new(),
        }
    }

    /// Publish submitted logs to `queue` using `topology`
    pub fn with_queue(mut self, queue: Arc<dyn MessageQueue>, topology: QueueTopology) -> Self {
        self.queue = Some(queue);
        self.topology = topology;
        self.declared = OnceCell::new();
        self
    }

    pub fn registry(&self) -> &Arc<ShardRegistry> {
        &self.registry
    }

    // Shards

    /// Register a new shard.
    ///
    /// The technology is validated and the connection info normalised. The
    /// shard is connected, its descriptor written to its own catalog and
    /// the catalog is then synced so every shard learns about it.
    pub async fn add_shard(&self, request: &NewShard) -> Result<ShardDescriptor> {
        let descriptor = ShardDescriptor::from_request(request)?;
        let handle = self.registry.register(&descriptor)?;
        handle.catalog_store()?.insert(descriptor.clone()).await?;

        let report = self.registry.sync_shard_catalog().await;
        if !report.is_clean() {
            warn!(shard = %descriptor.id, failures = report.failures.len(), "New shard not yet replicated everywhere");
        }

        info!(shard = %descriptor.id, technology = %descriptor.technology, "Added shard");
        Ok(descriptor)
    }

    /// Change a shard's flags on every shard's catalog
    pub async fn edit_shard(&self, id: ShardId, edit: &ShardEdit) -> Result<ShardDescriptor> {
        let mut descriptor = self.find_descriptor(id).await?;
        descriptor.apply(edit);

        let results = join_all(self.registry.handles().iter().map(|handle| {
            let descriptor = descriptor.clone();
            async move { (handle.id(), update_descriptor(handle, descriptor).await) }
        }))
        .await;
        first_failure(results)?;

        self.registry.reload(&descriptor)?;
        info!(shard = %id, active = descriptor.active, "Edited shard");
        Ok(descriptor)
    }

    /// Remove a shard from every catalog. The seed and shards still
    /// holding tenants cannot be deleted.
    pub async fn delete_shard(&self, id: ShardId) -> Result<()> {
        if id == self.registry.seed_id() {
            return Err(Error::validation("The seed shard cannot be deleted"));
        }
        if let Some(handle) = self.registry.handle(id) {
            let tenants = handle.tenant_store()?.count().await?;
            if tenants > 0 {
                return Err(Error::validation(format!(
                    "Shard {} still holds {} tenants",
                    id, tenants
                )));
            }
        }

        let results = join_all(self.registry.handles().iter().map(|handle| async move {
            let deleted = async { handle.catalog_store()?.delete(id).await }.await;
            (handle.id(), deleted.map(|_| ()))
        }))
        .await;
        first_failure(results)?;

        self.registry.remove(id);
        info!(shard = %id, "Deleted shard");
        Ok(())
    }

    /// All shard descriptors, as recorded in the seed catalog
    pub async fn list_shards(&self) -> Result<Vec<ShardDescriptor>> {
        let mut descriptors = self.registry.seed()?.catalog_store()?.list().await?;
        descriptors.sort_by_key(|d| d.id);
        Ok(descriptors)
    }

    pub async fn stats(&self) -> ShardStats {
        self.registry.stats().await
    }

    async fn find_descriptor(&self, id: ShardId) -> Result<ShardDescriptor> {
        if let Some(found) = self.registry.seed()?.catalog_store()?.get(id).await? {
            return Ok(found);
        }
        self.registry
            .handle(id)
            .map(|handle| handle.descriptor().clone())
            .ok_or_else(|| Error::not_found(format!("shard {}", id)))
    }

    // Tenants

    /// Register a tenant on the least loaded shard.
    ///
    /// New tenants are active, accept every severity and keep logs for the
    /// default retention period.
    pub async fn create_tenant(&self, request: &NewTenant) -> Result<Tenant> {
        if request.name.trim().is_empty() {
            return Err(Error::validation("Tenant name must not be empty"));
        }
        let tenant = Tenant::new(request.name.trim(), request.owner, self.default_retention);
        self.place_tenant(tenant).await
    }

    /// Place a fully specified tenant, rejecting IDs that already exist on
    /// any shard
    pub async fn place_tenant(&self, tenant: Tenant) -> Result<Tenant> {
        match self.registry.resolve_tenant_shard(tenant.id).await {
            Ok(existing) => {
                return Err(Error::DuplicateTenant {
                    tenant: tenant.id.to_string(),
                    shards: vec![existing.id().to_string()],
                })
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let shard = self.registry.select_placement_shard().await?;
        shard.tenant_store()?.insert(tenant.clone()).await?;

        info!(tenant = %tenant.id, shard = %shard.id(), "Created tenant");
        Ok(tenant)
    }

    pub async fn get_tenant(&self, id: TenantId) -> Result<Tenant> {
        let shard = self.registry.resolve_tenant_shard(id).await?;
        shard
            .tenant_store()?
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("tenant {}", id)))
    }

    /// Apply a partial update to a tenant owned by `owner`
    pub async fn edit_tenant(&self, id: TenantId, owner: Uuid, update: &TenantUpdate) -> Result<Tenant> {
        let (shard, mut tenant) = self.owned_tenant(id, owner).await?;
        tenant.apply(update);

        if !shard.tenant_store()?.update(tenant.clone()).await? {
            return Err(Error::not_found(format!("tenant {}", id)));
        }
        info!(tenant = %id, "Edited tenant");
        Ok(tenant)
    }

    /// Delete a tenant owned by `owner` together with its logs
    pub async fn delete_tenant(&self, id: TenantId, owner: Uuid) -> Result<()> {
        let (shard, _) = self.owned_tenant(id, owner).await?;

        let logs = shard.log_store()?;
        let mut tx = logs.begin(id).await?;
        let staged = async {
            let ids = tx.select_older_than(DateTime::<Utc>::MAX_UTC).await?;
            tx.delete(&ids).await
        }
        .await;
        let purged = match staged {
            Ok(purged) => {
                tx.commit().await?;
                purged
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(tenant = %id, error = %rollback, "Log purge rollback failed");
                }
                return Err(e);
            }
        };

        shard.tenant_store()?.delete(id).await?;
        self.registry.invalidate_tenant(id);
        info!(tenant = %id, purged, "Deleted tenant");
        Ok(())
    }

    /// Every tenant owned by `owner`, across all shards, ordered by name
    pub async fn list_tenants(&self, owner: Uuid) -> Result<Vec<Tenant>> {
        let handles = self.registry.handles();
        let listings = join_all(handles.iter().map(|handle| async move {
            handle.tenant_store()?.list_by_owner(owner).await
        }))
        .await;

        let mut tenants = Vec::new();
        for listing in listings {
            tenants.extend(listing?);
        }
        tenants.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(tenants)
    }

    async fn owned_tenant(&self, id: TenantId, owner: Uuid) -> Result<(Arc<ShardHandle>, Tenant)> {
        let shard = self.registry.resolve_tenant_shard(id).await?;
        match shard.tenant_store()?.get(id).await? {
            Some(tenant) if tenant.owner == owner => Ok((shard, tenant)),
            _ => Err(Error::not_found(format!("tenant {}", id))),
        }
    }

    // Logs

    /// Enqueue a submission for ingestion.
    ///
    /// The ingestion queue and its dead-letter topology are declared before
    /// the first publish. Routing happens later, in the consumer.
    pub async fn submit_log(&self, submission: &LogSubmission) -> Result<()> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| Error::config("No message queue configured for log submission"))?;

        self.declared
            .get_or_try_init(|| queue.declare(&self.topology))
            .await?;

        queue.publish(&self.topology.queue, submission.encode()?).await?;
        debug!(tenant = %submission.tenant_id, queue = %self.topology.queue, "Submitted log");
        Ok(())
    }

    /// One page of a tenant's logs
    pub async fn list_logs(&self, tenant: TenantId, page: &PageRequest) -> Result<LogPage> {
        page.validate()?;
        let shard = self.registry.resolve_tenant_shard(tenant).await?;
        let logs = shard.log_store()?;

        let records = logs.page(tenant, page).await?;
        let total = logs.count(tenant).await?;

        Ok(LogPage {
            records,
            total,
            page: page.page,
            size: page.size,
        })
    }

    /// Like [`list_logs`](Self::list_logs), with the sort field given by name
    pub async fn list_logs_sorted_by(
        &self,
        tenant: TenantId,
        page: usize,
        size: usize,
        sort_by: Option<&str>,
        descending: bool,
    ) -> Result<LogPage> {
        let request = PageRequest::parse(page, size, sort_by, descending)?;
        self.list_logs(tenant, &request).await
    }
}

async fn update_descriptor(handle: &ShardHandle, descriptor: ShardDescriptor) -> Result<()> {
    let catalog = handle.catalog_store()?;
    if !catalog.update(descriptor.clone()).await? {
        catalog.insert(descriptor).await?;
    }
    Ok(())
}

fn first_failure(results: Vec<(ShardId, Result<()>)>) -> Result<()> {
    let mut failure = None;
    for (shard, result) in results {
        if let Err(e) = result {
            warn!(%shard, error = %e, "Catalog change failed on shard");
            failure.get_or_insert(e);
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
