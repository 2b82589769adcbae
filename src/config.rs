//! Configuration for Cocoon Router
//!
//! This module provides configuration options for the router service: the
//! seed shard, the ingestion queue and the background maintenance schedule.

#[cfg(feature = "toml")]
use std::path::Path;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::catalog::{ShardDescriptor, Technology};
use crate::connection;
use crate::error::{Result, Error};
use crate::queue::{QueueTopology, DEFAULT_QUEUE_NAME};
use crate::retention::DailySchedule;

/// Connection settings for the seed shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedConfig {
    /// Seed shard ID
    pub id: Uuid,
    /// Technology tag
    pub technology: String,
    /// Plain or base64-encoded connection info
    pub connection: String,
    /// Optional server version hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl SeedConfig {
    /// Create seed settings
    pub fn new(id: Uuid, technology: impl Into<String>, connection: impl Into<String>) -> Self {
        Self {
            id,
            technology: technology.into(),
            connection: connection.into(),
            version: None,
        }
    }

    /// Build the seed descriptor, validating the technology and
    /// normalising the connection info
    pub fn descriptor(&self) -> Result<ShardDescriptor> {
        let technology = Technology::from_str(&self.technology)?;
        let connection = connection::normalize(technology, &self.connection)?;
        let mut descriptor = ShardDescriptor::seed(self.id, technology.name(), connection);
        descriptor.version = self.version.clone();
        Ok(descriptor)
    }
}

/// Configuration options for the router
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct RouterConfig {
    // Seed shard
    /// Where the shard catalog is bootstrapped from
    pub seed: Option<SeedConfig>,

    // Ingestion
    /// Name of the durable ingestion queue
    pub queue_name: String,
    /// Deliveries of a failing message before it is dead-lettered
    pub retry_limit: u32,
    /// Maximum deliveries processed concurrently
    pub consumer_concurrency: usize,

    // Retention policy
    /// Hour of day (UTC) the retention sweep runs
    pub retention_hour: u32,
    /// Minute of the hour the retention sweep runs
    pub retention_minute: u32,
    /// Whether to sweep once immediately at startup
    pub retention_run_on_start: bool,
    /// Retention period given to new tenants, in days
    pub default_retention_days: u32,

    // Catalog replication
    /// Seconds between catalog sync runs
    pub catalog_sync_interval_secs: u64,

    // Additional settings
    /// Log a metrics report on shutdown
    pub collect_metrics: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            seed: None,

            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            retry_limit: 3,
            consumer_concurrency: 8,

            retention_hour: 0,
            retention_minute: 0,
            retention_run_on_start: true,
            default_retention_days: 7,

            catalog_sync_interval_secs: 300,

            collect_metrics: true,
        }
    }
}

impl RouterConfig {
    /// Create a new router configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the seed shard
    pub fn with_seed(mut self, seed: SeedConfig) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the ingestion queue name
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Set the delivery retry limit
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Set the consumer concurrency
    pub fn with_consumer_concurrency(mut self, concurrency: usize) -> Self {
        self.consumer_concurrency = concurrency;
        self
    }

    /// Set the daily retention sweep time (UTC)
    pub fn with_retention_time(mut self, hour: u32, minute: u32) -> Self {
        self.retention_hour = hour;
        self.retention_minute = minute;
        self
    }

    /// Set whether to sweep once at startup
    pub fn with_retention_run_on_start(mut self, run: bool) -> Self {
        self.retention_run_on_start = run;
        self
    }

    /// Set the retention period for new tenants
    pub fn with_default_retention_days(mut self, days: u32) -> Self {
        self.default_retention_days = days;
        self
    }

    /// Set the catalog sync interval
    pub fn with_catalog_sync_interval_secs(mut self, secs: u64) -> Self {
        self.catalog_sync_interval_secs = secs;
        self
    }

    /// Set whether to collect metrics
    pub fn with_collect_metrics(mut self, collect: bool) -> Self {
        self.collect_metrics = collect;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(ref seed) = self.seed {
            seed.descriptor()
                .map_err(|e| Error::config(format!("Invalid seed shard: {}", e)))?;
        }

        if self.queue_name.trim().is_empty() {
            return Err(Error::config("Queue name must not be empty"));
        }

        if self.retry_limit < 1 {
            return Err(Error::config("Retry limit must be at least 1"));
        }

        if self.consumer_concurrency < 1 {
            return Err(Error::config("Consumer concurrency must be at least 1"));
        }

        if self.retention_hour > 23 || self.retention_minute > 59 {
            return Err(Error::config("Retention time must be a valid time of day"));
        }

        if self.default_retention_days < 1 {
            return Err(Error::config("Default retention days must be at least 1"));
        }

        if self.catalog_sync_interval_secs < 1 {
            return Err(Error::config("Catalog sync interval must be at least 1 second"));
        }

        Ok(())
    }

    /// Get the seed descriptor
    pub fn seed_descriptor(&self) -> Result<ShardDescriptor> {
        self.seed
            .as_ref()
            .ok_or_else(|| Error::config("No seed shard configured"))?
            .descriptor()
    }

    /// Get the ingestion queue topology
    pub fn topology(&self) -> QueueTopology {
        QueueTopology::for_queue(self.queue_name.clone())
    }

    /// Get the retention sweep schedule
    pub fn retention_schedule(&self) -> Result<DailySchedule> {
        DailySchedule::new(self.retention_hour, self.retention_minute)
    }

    /// Get the default tenant retention as a Duration
    pub fn default_retention(&self) -> Duration {
        Duration::from_secs(self.default_retention_days as u64 * 24 * 60 * 60)
    }

    /// Get the catalog sync interval as a Duration
    pub fn catalog_sync_interval(&self) -> Duration {
        Duration::from_secs(self.catalog_sync_interval_secs)
    }

    /// Create a human-readable string representation of the configuration
    pub fn to_string_pretty(&self) -> String {
        let mut result = String::new();

        result.push_str("=== Cocoon Router Configuration ===\n\n");

        result.push_str("Seed Shard:\n");
        match self.seed {
            Some(ref seed) => {
                result.push_str(&format!("  ID: {}\n", seed.id));
                result.push_str(&format!("  Technology: {}\n", seed.technology));
            }
            None => result.push_str("  (not configured)\n"),
        }

        result.push_str("\nIngestion:\n");
        result.push_str(&format!("  Queue: {}\n", self.queue_name));
        result.push_str(&format!("  Retry Limit: {}\n", self.retry_limit));
        result.push_str(&format!("  Concurrency: {}\n", self.consumer_concurrency));

        result.push_str("\nRetention Policy:\n");
        result.push_str(&format!(
            "  Daily Sweep: {:02}:{:02} UTC\n",
            self.retention_hour, self.retention_minute
        ));
        result.push_str(&format!("  Run On Start: {}\n", self.retention_run_on_start));
        result.push_str(&format!("  Default Retention Days: {}\n", self.default_retention_days));

        result.push_str("\nCatalog Sync:\n");
        result.push_str(&format!("  Interval: {}s\n", self.catalog_sync_interval_secs));

        result.push_str("\nAdditional Settings:\n");
        result.push_str(&format!("  Collect Metrics: {}\n", self.collect_metrics));

        result
    }

    /// Load configuration from a TOML file
    #[cfg(feature = "toml")]
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        use std::fs::read_to_string;
        use toml::from_str;

        let content = read_to_string(path)?;
        let config: Self = from_str(&content)
            .map_err(|e| Error::config(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    #[cfg(feature = "toml")]
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::fs::write;
        use toml::to_string_pretty;

        let content = to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize to TOML: {}", e)))?;

        write(path, content)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RouterConfig::default();

        assert!(config.seed.is_none());
        assert_eq!(config.queue_name, "cocoon.logs");
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.consumer_concurrency, 8);
        assert_eq!((config.retention_hour, config.retention_minute), (0, 0));
        assert_eq!(config.default_retention_days, 7);
        assert_eq!(config.default_retention(), Duration::from_secs(7 * 86_400));
        assert_eq!(config.catalog_sync_interval(), Duration::from_secs(300));

        assert!(config.validate().is_ok());
        assert!(config.seed_descriptor().is_err());
    }

    #[test]
    fn test_config_builder() {
        let seed_id = Uuid::new_v4();
        let config = RouterConfig::new()
            .with_seed(SeedConfig::new(seed_id, "MsSql", "Server=seed;Database=catalog"))
            .with_queue_name("logs.ingest")
            .with_retry_limit(5)
            .with_retention_time(3, 30)
            .with_catalog_sync_interval_secs(60);

        assert!(config.validate().is_ok());
        assert_eq!(config.topology().queue, "logs.ingest");

        let seed = config.seed_descriptor().unwrap();
        assert_eq!(seed.id, seed_id);
        assert_eq!(seed.technology, "mssql");
        assert!(seed.seed);
        assert!(!seed.is_eligible());
    }

    #[test]
    fn test_config_validation() {
        let invalid_configs = vec![
            RouterConfig::new().with_queue_name("  "),
            RouterConfig::new().with_retry_limit(0),
            RouterConfig::new().with_consumer_concurrency(0),
            RouterConfig::new().with_retention_time(24, 0),
            RouterConfig::new().with_retention_time(0, 60),
            RouterConfig::new().with_default_retention_days(0),
            RouterConfig::new().with_catalog_sync_interval_secs(0),
            RouterConfig::new().with_seed(SeedConfig::new(Uuid::new_v4(), "oracle", "x")),
            RouterConfig::new().with_seed(SeedConfig::new(Uuid::new_v4(), "mysql", "")),
        ];

        for config in invalid_configs {
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_deserialize_partial() {
        let config: RouterConfig = serde_json::from_str(r#"{"retry_limit": 10}"#).unwrap();
        assert_eq!(config.retry_limit, 10);
        assert_eq!(config.queue_name, "cocoon.logs");
    }

    #[test]
    fn test_to_string_pretty() {
        let pretty = RouterConfig::default().to_string_pretty();
        assert!(pretty.contains("Queue: cocoon.logs"));
        assert!(pretty.contains("Daily Sweep: 00:00 UTC"));
        assert!(pretty.contains("(not configured)"));
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.toml");

        let config = RouterConfig::new()
            .with_seed(SeedConfig::new(Uuid::new_v4(), "mongodb", "mongodb://seed"))
            .with_retry_limit(4);
        config.to_toml_file(&path).unwrap();

        let loaded = RouterConfig::from_toml_file(&path).unwrap();
        assert_eq!(loaded.retry_limit, 4);
        assert_eq!(loaded.seed, config.seed);
    }
}
