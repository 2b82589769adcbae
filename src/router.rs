//! Log routing
//!
//! Takes a decoded submission, finds the shard that owns its tenant, applies
//! the tenant's acceptance policy and persists the record on that shard.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::catalog::ShardId;
use crate::error::Result;
use crate::metrics::{DropReason, MetricsCollector};
use crate::record::{LogRecord, LogSubmission};
use crate::shard::ShardRegistry;
use crate::tenant::TenantId;

/// What happened to a routed submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Persisted on `shard` as `record`
    Stored { shard: ShardId, record: Uuid },
    /// Silently discarded
    Dropped(DropReason),
}

impl RouteOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }
}

/// Routes log submissions to the shard that owns their tenant
pub struct LogRouter {
    registry: Arc<ShardRegistry>,
    metrics: Arc<MetricsCollector>,
}

impl LogRouter {
    /// Create a router over a registry
    pub fn new(registry: Arc<ShardRegistry>, metrics: Arc<MetricsCollector>) -> Self {
        Self { registry, metrics }
    }

    /// Route one submission.
    ///
    /// Unknown tenants, inactive shards, inactive tenants and disabled
    /// severities are dropped without error. Storage failures are returned
    /// so the caller can retry the delivery. The stored record carries the
    /// server receive time; the client timestamp is discarded.
    pub async fn route_log(&self, submission: LogSubmission) -> Result<RouteOutcome> {
        let tenant_id = submission.tenant_id;

        let shard = match self.registry.resolve_tenant_shard(tenant_id).await {
            Ok(shard) => shard,
            Err(e) if e.is_not_found() => return Ok(self.dropped(tenant_id, DropReason::UnknownTenant)),
            Err(e) => return Err(e),
        };

        if !shard.is_active() {
            return Ok(self.dropped(tenant_id, DropReason::InactiveShard));
        }

        let tenant = match shard.tenant_store()?.get(tenant_id).await? {
            Some(tenant) => tenant,
            None => {
                // Deleted since it was cached
                self.registry.invalidate_tenant(tenant_id);
                return Ok(self.dropped(tenant_id, DropReason::UnknownTenant));
            }
        };

        if !tenant.active {
            return Ok(self.dropped(tenant_id, DropReason::InactiveTenant));
        }
        if !tenant.accepts(&submission.severity) {
            return Ok(self.dropped(tenant_id, DropReason::SeverityDisabled));
        }

        let record = LogRecord::accept(submission, Utc::now());
        let id = record.id;
        shard.log_store()?.insert(record).await?;

        self.metrics.increment_routed();
        trace!(tenant = %tenant_id, shard = %shard.id(), record = %id, "Stored log");

        Ok(RouteOutcome::Stored {
            shard: shard.id(),
            record: id,
        })
    }

    fn dropped(&self, tenant: TenantId, reason: DropReason) -> RouteOutcome {
        debug!(%tenant, reason = reason.name(), "Dropped log");
        self.metrics.record_drop(reason);
        RouteOutcome::Dropped(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ShardDescriptor, Technology};
    use crate::store::{MemoryBackend, MemoryConnector};
    use crate::tenant::{Severity, Tenant};
    use std::time::Duration;

    async fn setup(active: bool) -> (LogRouter, Arc<MemoryBackend>, Arc<MetricsCollector>) {
        let connector = Arc::new(MemoryConnector::new());
        let seed = ShardDescriptor::seed(Uuid::new_v4(), "mssql", "Server=seed");
        let shard = ShardDescriptor::new("mysql", "Server=logs").with_active(active);
        connector
            .backend(Technology::MsSql, "Server=seed")
            .insert_descriptor_raw(shard);

        let metrics = Arc::new(MetricsCollector::new());
        let registry = ShardRegistry::bootstrap(seed, connector.clone(), metrics.clone())
            .await
            .unwrap();
        let router = LogRouter::new(Arc::new(registry), metrics.clone());
        (router, connector.backend(Technology::MySql, "Server=logs"), metrics)
    }

    fn tenant() -> Tenant {
        Tenant::new("app", Uuid::new_v4(), Duration::from_secs(86_400))
    }

    #[tokio::test]
    async fn test_routes_to_owning_shard() {
        let (router, backend, metrics) = setup(true).await;
        let t = tenant();
        backend.insert_tenant_raw(t.clone());

        let before = Utc::now();
        let client_time = before - chrono::Duration::days(10);
        let outcome = router
            .route_log(LogSubmission::new(t.id, "info", "hello").with_timestamp(client_time))
            .await
            .unwrap();
        assert!(outcome.is_stored());

        let logs = backend.log_snapshot();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "hello");
        assert!(logs[0].received_at >= before);
        assert_eq!(metrics.get_routed(), 1);
    }

    #[tokio::test]
    async fn test_drops_unknown_tenant() {
        let (router, backend, metrics) = setup(true).await;
        let outcome = router
            .route_log(LogSubmission::new(Uuid::new_v4(), "error", "lost"))
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::UnknownTenant));
        assert!(backend.log_snapshot().is_empty());
        assert_eq!(metrics.get_dropped(DropReason::UnknownTenant), 1);
    }

    #[tokio::test]
    async fn test_drops_on_inactive_shard() {
        let (router, backend, _) = setup(false).await;
        let t = tenant();
        backend.insert_tenant_raw(t.clone());

        let outcome = router.route_log(LogSubmission::new(t.id, "info", "x")).await.unwrap();
        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::InactiveShard));
        assert!(backend.log_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_applies_tenant_policy() {
        let (router, backend, _) = setup(true).await;
        let inactive = tenant().with_active(false);
        let quiet = tenant().with_severity(Severity::Error, false);
        backend.insert_tenant_raw(inactive.clone());
        backend.insert_tenant_raw(quiet.clone());

        let outcome = router.route_log(LogSubmission::new(inactive.id, "info", "x")).await.unwrap();
        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::InactiveTenant));

        let outcome = router.route_log(LogSubmission::new(quiet.id, "Error", "x")).await.unwrap();
        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::SeverityDisabled));

        let outcome = router.route_log(LogSubmission::new(quiet.id, "debug", "x")).await.unwrap();
        assert!(outcome.is_stored());
        assert_eq!(backend.log_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_each_disabled_severity_is_dropped() {
        let all = [
            (Severity::Info, "INFO"),
            (Severity::Warning, "Warning"),
            (Severity::Error, "eRRoR"),
            (Severity::Critical, "Critical"),
        ];

        for (disabled, _) in all {
            let (router, backend, metrics) = setup(true).await;
            let t = tenant().with_severity(disabled, false);
            backend.insert_tenant_raw(t.clone());

            for (severity, raw) in all {
                let outcome = router.route_log(LogSubmission::new(t.id, raw, raw)).await.unwrap();
                if severity == disabled {
                    assert_eq!(
                        outcome,
                        RouteOutcome::Dropped(DropReason::SeverityDisabled),
                        "{} should be dropped",
                        raw
                    );
                } else {
                    assert!(outcome.is_stored(), "{} should be stored", raw);
                }
            }

            let mut stored: Vec<_> = backend.log_snapshot().into_iter().map(|r| r.message).collect();
            stored.sort();
            let mut expected: Vec<_> = all
                .iter()
                .filter(|(severity, _)| *severity != disabled)
                .map(|(_, raw)| raw.to_string())
                .collect();
            expected.sort();
            assert_eq!(stored, expected);
            assert_eq!(metrics.get_dropped(DropReason::SeverityDisabled), 1);
        }
    }

    #[tokio::test]
    async fn test_storage_failure_is_an_error() {
        let (router, backend, _) = setup(true).await;
        let t = tenant();
        backend.insert_tenant_raw(t.clone());
        backend.set_failing(true);

        let err = router.route_log(LogSubmission::new(t.id, "info", "x")).await.unwrap_err();
        assert!(err.is_transient());
    }
}
