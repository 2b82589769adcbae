use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use cocoon_router::queue::{DEAD_LETTER_QUEUE, DEFAULT_QUEUE_NAME};
use cocoon_router::{
    DailySchedule, LogRecord, LogSubmission, MemoryBackend, MemoryBroker, MemoryConnector,
    MessageQueue, MetricsCollector, NewShard, NewTenant, PageRequest, RetentionSweeper,
    RouterConfig, RouterService, SeedConfig, ShardDescriptor, ShardRegistry, Technology,
    TenantUpdate,
};

const SEED: &str = "Server=seed;Database=catalog";
const LOGS: &str = "Server=logs;Database=telemetry";

struct Harness {
    connector: Arc<MemoryConnector>,
    broker: Arc<MemoryBroker>,
    service: RouterService,
}

impl Harness {
    async fn start(retry_limit: u32) -> anyhow::Result<Self> {
        let connector = Arc::new(MemoryConnector::new());
        connector
            .backend(Technology::MsSql, SEED)
            .insert_descriptor_raw(ShardDescriptor::new("mysql", LOGS));
        let broker = Arc::new(MemoryBroker::new());

        let config = RouterConfig::new()
            .with_seed(SeedConfig::new(Uuid::new_v4(), "mssql", SEED))
            .with_retry_limit(retry_limit)
            .with_consumer_concurrency(4)
            .with_retention_run_on_start(false);

        let service = RouterService::start(config, connector.clone(), broker.clone()).await?;
        Ok(Self {
            connector,
            broker,
            service,
        })
    }

    fn logs(&self) -> Arc<MemoryBackend> {
        self.connector.backend(Technology::MySql, LOGS)
    }

    async fn publish(&self, submission: &LogSubmission) -> anyhow::Result<()> {
        self.broker.publish(DEFAULT_QUEUE_NAME, submission.encode()?).await?;
        Ok(())
    }
}

/// Poll until `check` holds or a second has passed
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

#[test_log::test(tokio::test)]
async fn test_published_logs_are_stored_on_owning_shard() -> anyhow::Result<()> {
    let harness = Harness::start(3).await?;
    let owner = Uuid::new_v4();
    let tenant = harness
        .service
        .admin()
        .create_tenant(&NewTenant {
            name: "checkout".into(),
            owner,
        })
        .await?;

    for i in 0..5 {
        harness
            .service
            .admin()
            .submit_log(&LogSubmission::new(tenant.id, "info", format!("event {}", i)))
            .await?;
    }

    let logs = harness.logs();
    assert!(eventually(|| logs.log_snapshot().len() == 5).await);
    assert!(eventually(|| harness.broker.unacked() == 0).await);

    let page = harness
        .service
        .admin()
        .list_logs(tenant.id, &PageRequest::default())
        .await?;
    assert_eq!(page.total, 5);
    assert_eq!(page.records.len(), 5);
    assert!(page.records.iter().all(|r| r.tenant_id == tenant.id));

    // Nothing lands on the seed
    let seed = harness.connector.backend(Technology::MsSql, SEED);
    assert!(seed.log_snapshot().is_empty());

    assert_eq!(harness.service.metrics().get_routed(), 5);
    harness.service.shutdown().await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_severity_gating() -> anyhow::Result<()> {
    let harness = Harness::start(3).await?;
    let admin = harness.service.admin();
    let owner = Uuid::new_v4();
    let tenant = admin
        .create_tenant(&NewTenant {
            name: "billing".into(),
            owner,
        })
        .await?;

    admin
        .edit_tenant(
            tenant.id,
            owner,
            &TenantUpdate {
                warning_enabled: Some(false),
                critical_enabled: Some(false),
                ..Default::default()
            },
        )
        .await?;

    for severity in ["info", "warning", "error", "critical", "debug"] {
        harness
            .publish(&LogSubmission::new(tenant.id, severity, severity))
            .await?;
    }

    let metrics = harness.service.metrics().clone();
    assert!(eventually(|| metrics.get_acked() == 5).await);

    let mut stored: Vec<_> = harness
        .logs()
        .log_snapshot()
        .into_iter()
        .map(|r| r.severity)
        .collect();
    stored.sort();
    assert_eq!(stored, vec!["debug", "error", "info"]);
    assert_eq!(metrics.get_dropped_total(), 2);

    harness.service.shutdown().await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_unknown_and_inactive_tenants_are_dropped() -> anyhow::Result<()> {
    let harness = Harness::start(3).await?;
    let admin = harness.service.admin();
    let owner = Uuid::new_v4();
    let tenant = admin
        .create_tenant(&NewTenant {
            name: "paused".into(),
            owner,
        })
        .await?;
    admin
        .edit_tenant(
            tenant.id,
            owner,
            &TenantUpdate {
                active: Some(false),
                ..Default::default()
            },
        )
        .await?;

    harness.publish(&LogSubmission::new(tenant.id, "error", "ignored")).await?;
    harness
        .publish(&LogSubmission::new(Uuid::new_v4(), "error", "stranger"))
        .await?;

    let metrics = harness.service.metrics().clone();
    assert!(eventually(|| metrics.get_acked() == 2).await);
    assert!(harness.logs().log_snapshot().is_empty());
    assert!(harness.broker.peek(DEAD_LETTER_QUEUE).is_empty());

    harness.service.shutdown().await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_poison_message_is_dead_lettered_after_retry_limit() -> anyhow::Result<()> {
    let harness = Harness::start(2).await?;
    harness
        .broker
        .publish(DEFAULT_QUEUE_NAME, b"{\"message\": 42}".to_vec())
        .await?;

    let broker = harness.broker.clone();
    assert!(eventually(|| broker.peek(DEAD_LETTER_QUEUE).len() == 1).await);
    assert_eq!(broker.ready(DEFAULT_QUEUE_NAME), 0);

    let metrics = harness.service.metrics();
    assert_eq!(metrics.get_requeued(), 1);
    assert_eq!(metrics.get_dead_lettered(), 1);
    assert_eq!(metrics.get_acked(), 0);

    harness.service.shutdown().await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_storage_outage_recovers_without_loss() -> anyhow::Result<()> {
    let harness = Harness::start(u32::MAX).await?;
    let tenant = harness
        .service
        .admin()
        .create_tenant(&NewTenant {
            name: "flaky".into(),
            owner: Uuid::new_v4(),
        })
        .await?;

    let logs = harness.logs();
    logs.set_failing(true);
    harness.publish(&LogSubmission::new(tenant.id, "error", "kept")).await?;

    let metrics = harness.service.metrics().clone();
    assert!(eventually(|| metrics.get_requeued() > 0).await);
    logs.set_failing(false);

    assert!(eventually(|| logs.log_snapshot().len() == 1).await);
    assert!(harness.broker.peek(DEAD_LETTER_QUEUE).is_empty());

    harness.service.shutdown().await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_added_shard_is_replicated_to_every_catalog() -> anyhow::Result<()> {
    let harness = Harness::start(3).await?;
    let admin = harness.service.admin();

    let added = admin
        .add_shard(&NewShard {
            technology: "mongodb".into(),
            connection: "mongodb://archive:27017/logs".into(),
            seed: false,
            version: None,
        })
        .await?;

    for (technology, connection) in [
        (Technology::MsSql, SEED),
        (Technology::MySql, LOGS),
        (Technology::MongoDb, "mongodb://archive:27017/logs"),
    ] {
        let catalog = harness.connector.backend(technology, connection).catalog_snapshot();
        assert!(
            catalog.iter().any(|d| d.id == added.id),
            "{} is missing the new shard",
            connection
        );
    }

    // The seed catalog lists every shard but the seed itself
    let listed = admin.list_shards().await?;
    assert_eq!(listed.len(), 2);
    assert_eq!(harness.service.registry().len(), 3);

    harness.service.shutdown().await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_retention_sweep_keeps_boundary_records() -> anyhow::Result<()> {
    let connector = Arc::new(MemoryConnector::new());
    connector
        .backend(Technology::MsSql, SEED)
        .insert_descriptor_raw(ShardDescriptor::new("mysql", LOGS));
    let metrics = Arc::new(MetricsCollector::new());
    let registry = Arc::new(
        ShardRegistry::bootstrap(
            ShardDescriptor::seed(Uuid::new_v4(), "mssql", SEED),
            connector.clone(),
            metrics.clone(),
        )
        .await?,
    );

    let logs = connector.backend(Technology::MySql, LOGS);
    let tenant = cocoon_router::Tenant::new("api", Uuid::new_v4(), Duration::from_secs(2 * 86_400));
    logs.insert_tenant_raw(tenant.clone());

    let now = Utc::now();
    let cutoff = now - ChronoDuration::days(2);
    for (age, message) in [
        (cutoff - ChronoDuration::milliseconds(1), "expired"),
        (cutoff, "boundary"),
        (now, "fresh"),
    ] {
        logs.insert_log_raw(LogRecord::accept(
            LogSubmission::new(tenant.id, "info", message),
            age,
        ));
    }

    let sweeper = RetentionSweeper::new(registry, DailySchedule::midnight(), metrics.clone());
    let report = sweeper.sweep(now).await;
    assert_eq!(report.deleted, 1);
    assert!(report.failures.is_empty());

    let mut left: Vec<_> = logs.log_snapshot().into_iter().map(|r| r.message).collect();
    left.sort();
    assert_eq!(left, vec!["boundary", "fresh"]);
    assert_eq!(metrics.get_swept_logs(), 1);
    Ok(())
}
