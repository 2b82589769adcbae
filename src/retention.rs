//! Daily retention sweep
//!
//! Once a day, at a fixed UTC time, every tenant on every shard has the logs
//! older than its retention period deleted. Each tenant is swept in its own
//! transaction; a failure rolls back that tenant only and the sweep moves
//! on.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::ShardId;
use crate::error::{Error, Result};
use crate::metrics::MetricsCollector;
use crate::shard::{ShardHandle, ShardRegistry};
use crate::tenant::{Tenant, TenantId};

/// A fixed time of day, in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    time: NaiveTime,
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self::midnight()
    }
}

impl DailySchedule {
    /// Create a schedule firing at `hour:minute` UTC
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(|time| Self { time })
            .ok_or_else(|| Error::config(format!("Invalid time of day {:02}:{:02}", hour, minute)))
    }

    /// Schedule firing at 00:00 UTC
    pub fn midnight() -> Self {
        Self { time: NaiveTime::MIN }
    }

    /// The first firing strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = Utc.from_utc_datetime(&now.date_naive().and_time(self.time));
        if today > now {
            today
        } else {
            today + ChronoDuration::days(1)
        }
    }

    /// How long to wait from `now` until the next firing
    pub fn delay_from(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.next_after(now) - now).to_std().unwrap_or_default()
    }
}

/// A shard or tenant the sweep could not finish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepFailure {
    pub shard: ShardId,
    /// `None` if the shard's tenants could not be listed
    pub tenant: Option<TenantId>,
    pub error: String,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Number of shards visited
    pub shards: usize,
    /// Number of tenants swept successfully
    pub tenants: usize,
    /// Number of logs deleted
    pub deleted: usize,
    /// Shards and tenants that failed
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.shards += other.shards;
        self.tenants += other.tenants;
        self.deleted += other.deleted;
        self.failures.extend(other.failures);
    }
}

/// Deletes logs past their tenant's retention period
pub struct RetentionSweeper {
    registry: Arc<ShardRegistry>,
    schedule: DailySchedule,
    run_on_start: bool,
    metrics: Arc<MetricsCollector>,
}

impl RetentionSweeper {
    /// Create a sweeper firing on `schedule`
    pub fn new(
        registry: Arc<ShardRegistry>,
        schedule: DailySchedule,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            registry,
            schedule,
            run_on_start: false,
            metrics,
        }
    }

    /// Also sweep once as soon as [`run`](Self::run) starts
    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    pub fn schedule(&self) -> DailySchedule {
        self.schedule
    }

    /// Sweep every shard as of `now`. Shards are swept concurrently.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        self.sweep_until(now, &CancellationToken::new()).await
    }

    async fn sweep_until(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> SweepReport {
        let start = Instant::now();
        let handles = self.registry.handles();

        let results = join_all(
            handles
                .iter()
                .map(|shard| self.sweep_shard(shard, now, cancel)),
        )
        .await;

        let mut report = SweepReport::default();
        for result in results {
            report.merge(result);
        }

        self.metrics.add_swept_logs(report.deleted);
        self.metrics.record_sweep_duration(start.elapsed());
        report
    }

    async fn sweep_shard(
        &self,
        shard: &ShardHandle,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> SweepReport {
        let mut report = SweepReport {
            shards: 1,
            ..Default::default()
        };

        let tenants = match list_tenants(shard).await {
            Ok(tenants) => tenants,
            Err(e) => {
                warn!(shard = %shard.id(), error = %e, "Failed to list tenants for retention");
                self.metrics.increment_sweep_failures();
                report.failures.push(SweepFailure {
                    shard: shard.id(),
                    tenant: None,
                    error: e.to_string(),
                });
                return report;
            }
        };

        for tenant in tenants {
            // Stop between tenants; a tenant already in progress finishes
            if cancel.is_cancelled() {
                break;
            }
            match self.sweep_tenant(shard, &tenant, now).await {
                Ok(deleted) => {
                    report.tenants += 1;
                    report.deleted += deleted;
                }
                Err(e) => {
                    warn!(shard = %shard.id(), tenant = %tenant.id, error = %e, "Retention sweep failed");
                    self.metrics.increment_sweep_failures();
                    report.failures.push(SweepFailure {
                        shard: shard.id(),
                        tenant: Some(tenant.id),
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    /// Delete one tenant's logs received strictly before
    /// `now - tenant.retention`. Returns the number deleted.
    pub async fn sweep_tenant(
        &self,
        shard: &ShardHandle,
        tenant: &Tenant,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let retention = ChronoDuration::from_std(tenant.retention)
            .map_err(|e| Error::validation(format!("Retention out of range: {}", e)))?;
        let cutoff = match now.checked_sub_signed(retention) {
            Some(cutoff) => cutoff,
            None => return Ok(0),
        };

        let logs = shard.log_store()?;
        if !logs.exists_older_than(tenant.id, cutoff).await? {
            return Ok(0);
        }

        let mut tx = logs.begin(tenant.id).await?;
        let staged = async {
            let ids = tx.select_older_than(cutoff).await?;
            tx.delete(&ids).await
        }
        .await;

        match staged {
            Ok(deleted) => {
                tx.commit().await?;
                debug!(shard = %shard.id(), tenant = %tenant.id, deleted, %cutoff, "Swept tenant logs");
                Ok(deleted)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(tenant = %tenant.id, error = %rollback, "Retention rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Sweep once a day until cancelled.
    ///
    /// Cancellation interrupts the wait immediately. A sweep in progress
    /// stops before its next tenant.
    pub async fn run(&self, cancel: CancellationToken) {
        if self.run_on_start {
            self.run_once(&cancel).await;
        }

        loop {
            let delay = self.schedule.delay_from(Utc::now());
            debug!(delay_secs = delay.as_secs(), "Next retention sweep scheduled");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            self.run_once(&cancel).await;
        }

        info!("Retention sweeper stopped");
    }

    async fn run_once(&self, cancel: &CancellationToken) {
        let report = self.sweep_until(Utc::now(), cancel).await;
        info!(
            shards = report.shards,
            tenants = report.tenants,
            deleted = report.deleted,
            failures = report.failures.len(),
            "Retention sweep complete"
        );
    }
}

async fn list_tenants(shard: &ShardHandle) -> Result<Vec<Tenant>> {
    shard.tenant_store()?.list().await
}
