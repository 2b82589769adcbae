use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use parking_lot::Mutex;

/// Why the router dropped an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No shard owns the tenant
    UnknownTenant,
    /// The owning shard is inactive
    InactiveShard,
    /// The tenant is inactive
    InactiveTenant,
    /// The tenant disabled this severity
    SeverityDisabled,
}

impl DropReason {
    /// Get the name of the drop reason
    pub fn name(&self) -> &'static str {
        match self {
            Self::UnknownTenant => "unknown_tenant",
            Self::InactiveShard => "inactive_shard",
            Self::InactiveTenant => "inactive_tenant",
            Self::SeverityDisabled => "severity_disabled",
        }
    }
}

/// Operational metrics collector for the router
#[derive(Debug)]
pub struct MetricsCollector {
    // Routing
    /// Number of events persisted
    routed: AtomicUsize,
    /// Dropped events, by reason
    dropped_unknown_tenant: AtomicUsize,
    dropped_inactive_shard: AtomicUsize,
    dropped_inactive_tenant: AtomicUsize,
    dropped_severity: AtomicUsize,

    // Resolution cache
    /// Number of cache hits
    cache_hits: AtomicUsize,
    /// Number of cache misses
    cache_misses: AtomicUsize,

    // Ingestion
    /// Deliveries positively acknowledged
    acked: AtomicUsize,
    /// Deliveries negatively acknowledged with requeue
    requeued: AtomicUsize,
    /// Deliveries rejected to the dead-letter queue
    dead_lettered: AtomicUsize,

    // Background work
    /// Descriptors inserted by catalog sync
    catalog_inserts: AtomicUsize,
    /// Per-shard sync failures
    sync_failures: AtomicUsize,
    /// Logs removed by the retention sweep
    swept_logs: AtomicUsize,
    /// Per-tenant sweep failures
    sweep_failures: AtomicUsize,
    /// Duration of the last completed sweep
    last_sweep_duration: Mutex<Duration>,

    // Internal state
    /// Start time of the metrics collector
    start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            routed: AtomicUsize::new(0),
            dropped_unknown_tenant: AtomicUsize::new(0),
            dropped_inactive_shard: AtomicUsize::new(0),
            dropped_inactive_tenant: AtomicUsize::new(0),
            dropped_severity: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            cache_misses: AtomicUsize::new(0),
            acked: AtomicUsize::new(0),
            requeued: AtomicUsize::new(0),
            dead_lettered: AtomicUsize::new(0),
            catalog_inserts: AtomicUsize::new(0),
            sync_failures: AtomicUsize::new(0),
            swept_logs: AtomicUsize::new(0),
            sweep_failures: AtomicUsize::new(0),
            last_sweep_duration: Mutex::new(Duration::from_secs(0)),
            start_time: Instant::now(),
        }
    }

    // Routing

    /// Increment persisted events
    pub fn increment_routed(&self) {
        self.routed.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::increment_counter!("cocoon_router_logs_routed_total");
    }

    /// Record a dropped event
    pub fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::UnknownTenant => &self.dropped_unknown_tenant,
            DropReason::InactiveShard => &self.dropped_inactive_shard,
            DropReason::InactiveTenant => &self.dropped_inactive_tenant,
            DropReason::SeverityDisabled => &self.dropped_severity,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::increment_counter!("cocoon_router_logs_dropped_total", "reason" => reason.name());
    }

    // Cache

    /// Increment cache hits
    pub fn increment_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment cache misses
    pub fn increment_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    // Ingestion

    /// Increment acknowledged deliveries
    pub fn increment_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::increment_counter!("cocoon_router_deliveries_acked_total");
    }

    /// Increment requeued deliveries
    pub fn increment_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::increment_counter!("cocoon_router_deliveries_requeued_total");
    }

    /// Increment dead-lettered deliveries
    pub fn increment_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::increment_counter!("cocoon_router_deliveries_dead_lettered_total");
    }

    // Background work

    /// Add descriptors inserted by catalog sync
    pub fn add_catalog_inserts(&self, count: usize) {
        self.catalog_inserts.fetch_add(count, Ordering::Relaxed);
    }

    /// Increment per-shard sync failures
    pub fn increment_sync_failures(&self) {
        self.sync_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Add logs removed by the retention sweep
    pub fn add_swept_logs(&self, count: usize) {
        self.swept_logs.fetch_add(count, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::counter!("cocoon_router_logs_swept_total", count as u64);
    }

    /// Increment per-tenant sweep failures
    pub fn increment_sweep_failures(&self) {
        self.sweep_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the duration of a completed sweep
    pub fn record_sweep_duration(&self, duration: Duration) {
        *self.last_sweep_duration.lock() = duration;
    }

    // Getters

    /// Get number of persisted events
    pub fn get_routed(&self) -> usize {
        self.routed.load(Ordering::Relaxed)
    }

    /// Get number of dropped events for a reason
    pub fn get_dropped(&self, reason: DropReason) -> usize {
        match reason {
            DropReason::UnknownTenant => self.dropped_unknown_tenant.load(Ordering::Relaxed),
            DropReason::InactiveShard => self.dropped_inactive_shard.load(Ordering::Relaxed),
            DropReason::InactiveTenant => self.dropped_inactive_tenant.load(Ordering::Relaxed),
            DropReason::SeverityDisabled => self.dropped_severity.load(Ordering::Relaxed),
        }
    }

    /// Get total number of dropped events
    pub fn get_dropped_total(&self) -> usize {
        [
            DropReason::UnknownTenant,
            DropReason::InactiveShard,
            DropReason::InactiveTenant,
            DropReason::SeverityDisabled,
        ]
        .iter()
        .map(|r| self.get_dropped(*r))
        .sum()
    }

    /// Get number of cache hits
    pub fn get_cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Get number of cache misses
    pub fn get_cache_misses(&self) -> usize {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Get number of acknowledged deliveries
    pub fn get_acked(&self) -> usize {
        self.acked.load(Ordering::Relaxed)
    }

    /// Get number of requeued deliveries
    pub fn get_requeued(&self) -> usize {
        self.requeued.load(Ordering::Relaxed)
    }

    /// Get number of dead-lettered deliveries
    pub fn get_dead_lettered(&self) -> usize {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    /// Get number of descriptors inserted by catalog sync
    pub fn get_catalog_inserts(&self) -> usize {
        self.catalog_inserts.load(Ordering::Relaxed)
    }

    /// Get number of per-shard sync failures
    pub fn get_sync_failures(&self) -> usize {
        self.sync_failures.load(Ordering::Relaxed)
    }

    /// Get number of logs removed by the retention sweep
    pub fn get_swept_logs(&self) -> usize {
        self.swept_logs.load(Ordering::Relaxed)
    }

    /// Get number of per-tenant sweep failures
    pub fn get_sweep_failures(&self) -> usize {
        self.sweep_failures.load(Ordering::Relaxed)
    }

    /// Get duration of the last completed sweep
    pub fn get_last_sweep_duration(&self) -> Duration {
        *self.last_sweep_duration.lock()
    }

    /// Get cache hit rate (0.0 - 1.0)
    pub fn get_cache_hit_rate(&self) -> f64 {
        let hits = self.get_cache_hits();
        let misses = self.get_cache_misses();

        if hits + misses == 0 {
            return 0.0;
        }

        hits as f64 / (hits + misses) as f64
    }

    /// Get uptime of the collector
    pub fn get_uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Create a human-readable report of metrics
    pub fn report(&self) -> String {
        let mut result = String::new();

        result.push_str("=== Router Metrics ===\n\n");

        result.push_str(&format!("Uptime: {:.1}s\n", self.get_uptime().as_secs_f64()));

        result.push_str("\nRouting:\n");
        result.push_str(&format!("  Routed: {}\n", self.get_routed()));
        result.push_str(&format!("  Dropped: {}\n", self.get_dropped_total()));
        result.push_str(&format!("  Cache Hit Rate: {:.2}%\n", self.get_cache_hit_rate() * 100.0));

        result.push_str("\nIngestion:\n");
        result.push_str(&format!("  Acked: {}\n", self.get_acked()));
        result.push_str(&format!("  Requeued: {}\n", self.get_requeued()));
        result.push_str(&format!("  Dead-lettered: {}\n", self.get_dead_lettered()));

        result.push_str("\nMaintenance:\n");
        result.push_str(&format!("  Catalog Inserts: {}\n", self.get_catalog_inserts()));
        result.push_str(&format!("  Sync Failures: {}\n", self.get_sync_failures()));
        result.push_str(&format!("  Swept Logs: {}\n", self.get_swept_logs()));
        result.push_str(&format!("  Sweep Failures: {}\n", self.get_sweep_failures()));

        result
    }
}
