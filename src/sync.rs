//! Periodic catalog replication

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::shard::{ShardRegistry, SyncReport};

/// Runs [`ShardRegistry::sync_shard_catalog`] on a fixed interval
pub struct CatalogSyncWorker {
    registry: Arc<ShardRegistry>,
    interval: Duration,
}

impl CatalogSyncWorker {
    pub fn new(registry: Arc<ShardRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Run one sync
    pub async fn run_once(&self) -> SyncReport {
        self.registry.sync_shard_catalog().await
    }

    /// Sync immediately, then every interval until cancelled. Runs never
    /// overlap; a run that overruns the interval delays the next one.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.run_once().await;
            if report.total_inserted() > 0 || !report.is_clean() {
                debug!(?report, "Catalog sync report");
            }
        }

        info!("Catalog sync worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ShardDescriptor, Technology};
    use crate::metrics::MetricsCollector;
    use crate::store::MemoryConnector;
    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sync() {
        let connector = Arc::new(MemoryConnector::new());
        let seed = ShardDescriptor::seed(Uuid::new_v4(), "mssql", "Server=seed");
        let shard = ShardDescriptor::new("mysql", "Server=a");
        connector
            .backend(Technology::MsSql, "Server=seed")
            .insert_descriptor_raw(shard.clone());

        let metrics = Arc::new(MetricsCollector::new());
        let registry = Arc::new(
            ShardRegistry::bootstrap(seed, connector.clone(), metrics.clone())
                .await
                .unwrap(),
        );

        let worker = Arc::new(CatalogSyncWorker::new(registry, Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        let task = {
            let worker = worker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        let a = connector.backend(Technology::MySql, "Server=a");
        assert_eq!(a.catalog_snapshot().len(), 1);

        // A descriptor appearing later is picked up on the next tick
        let late = ShardDescriptor::new("mongodb", "mongodb://late");
        a.insert_descriptor_raw(late.clone());
        tokio::time::sleep(Duration::from_secs(60)).await;

        let seed_catalog = connector.backend(Technology::MsSql, "Server=seed").catalog_snapshot();
        assert!(seed_catalog.iter().any(|d| d.id == late.id));
        assert_eq!(metrics.get_catalog_inserts(), 2);

        cancel.cancel();
        task.await.unwrap();
    }
}
