//! Service assembly
//!
//! [`RouterService`] wires a configuration, a storage connector and a queue
//! client into a running router: the shard registry is bootstrapped from
//! the seed, then the ingestion consumer, the retention sweeper and the
//! catalog sync worker are spawned under one cancellation token.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::admin::Admin;
use crate::config::RouterConfig;
use crate::consumer::IngestionConsumer;
use crate::error::{Error, Result};
use crate::metrics::MetricsCollector;
use crate::queue::MessageQueue;
use crate::retention::RetentionSweeper;
use crate::router::LogRouter;
use crate::shard::ShardRegistry;
use crate::store::Connector;
use crate::sync::CatalogSyncWorker;

/// A running router and its background workers
pub struct RouterService {
    config: RouterConfig,
    registry: Arc<ShardRegistry>,
    router: Arc<LogRouter>,
    admin: Admin,
    metrics: Arc<MetricsCollector>,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl RouterService {
    /// Bootstrap the registry and start the background workers.
    ///
    /// Fails if the configuration is invalid, the seed shard cannot be
    /// reached or the queue topology cannot be declared. Must be called
    /// from within a tokio runtime.
    pub async fn start(
        config: RouterConfig,
        connector: Arc<dyn Connector>,
        queue: Arc<dyn MessageQueue>,
    ) -> Result<Self> {
        config.validate()?;
        let seed = config.seed_descriptor()?;
        let schedule = config.retention_schedule()?;

        let metrics = Arc::new(MetricsCollector::new());
        let registry = Arc::new(ShardRegistry::bootstrap(seed, connector, metrics.clone()).await?);
        let router = Arc::new(LogRouter::new(registry.clone(), metrics.clone()));

        let consumer = Arc::new(IngestionConsumer::from_config(
            &config,
            queue.clone(),
            router.clone(),
            metrics.clone(),
        ));
        consumer.declare().await?;

        let sweeper = Arc::new(
            RetentionSweeper::new(registry.clone(), schedule, metrics.clone())
                .with_run_on_start(config.retention_run_on_start),
        );
        let sync = Arc::new(CatalogSyncWorker::new(
            registry.clone(),
            config.catalog_sync_interval(),
        ));

        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(3);

        {
            let cancel = cancel.clone();
            tasks.push((
                "consumer",
                tokio::spawn(async move {
                    if let Err(e) = consumer.run(cancel).await {
                        error!(error = %e, "Ingestion consumer exited with an error");
                    }
                }),
            ));
        }
        {
            let cancel = cancel.clone();
            tasks.push(("retention", tokio::spawn(async move { sweeper.run(cancel).await })));
        }
        {
            let cancel = cancel.clone();
            tasks.push(("catalog-sync", tokio::spawn(async move { sync.run(cancel).await })));
        }

        info!(
            seed = %registry.seed_id(),
            shards = registry.len(),
            queue = %config.queue_name,
            "Router service started"
        );

        let admin = Admin::new(registry.clone(), config.default_retention())
            .with_queue(queue, config.topology());
        Ok(Self {
            config,
            registry,
            router,
            admin,
            metrics,
            cancel,
            tasks,
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ShardRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<LogRouter> {
        &self.router
    }

    pub fn admin(&self) -> &Admin {
        &self.admin
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Token cancelled on shutdown; clone it to tie other work to the service
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop all workers and wait for them to finish.
    ///
    /// In-flight deliveries are settled before the consumer exits.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();

        let mut panicked = Vec::new();
        for (name, task) in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                error!(worker = name, error = %e, "Worker task failed");
                panicked.push(name);
            }
        }

        if self.config.collect_metrics {
            info!("{}", self.metrics.report());
        }
        info!("Router service stopped");

        if panicked.is_empty() {
            Ok(())
        } else {
            Err(Error::other(format!("Workers failed: {}", panicked.join(", "))))
        }
    }
}

impl Drop for RouterService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
