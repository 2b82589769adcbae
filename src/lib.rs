//! # Cocoon Router
//!
//! A multi-tenant telemetry log router. Log submissions are consumed from a
//! durable queue, resolved to the shard that owns their tenant, filtered by
//! the tenant's severity settings and stored on that shard. Shards are
//! discovered from a seed shard's catalog, the catalog is kept replicated
//! across every shard, and logs older than each tenant's retention period
//! are swept once a day.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cocoon_router::{MemoryBroker, MemoryConnector, RouterConfig, RouterService, SeedConfig};
//! use uuid::Uuid;
//!
//! # async fn run() -> cocoon_router::Result<()> {
//! let config = RouterConfig::new()
//!     .with_seed(SeedConfig::new(Uuid::new_v4(), "mssql", "Server=catalog;Database=logs"));
//!
//! let service = RouterService::start(
//!     config,
//!     Arc::new(MemoryConnector::new()),
//!     Arc::new(MemoryBroker::new()),
//! )
//! .await?;
//!
//! // ... serve until asked to stop
//! service.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod record;
pub mod retention;
pub mod router;
pub mod service;
pub mod shard;
pub mod store;
pub mod sync;
pub mod tenant;

pub use admin::{Admin, LogPage};
pub use catalog::{NewShard, ShardDescriptor, ShardEdit, ShardId, Technology};
pub use config::{RouterConfig, SeedConfig};
pub use consumer::{Disposition, IngestionConsumer};
pub use error::{Error, Result};
pub use metrics::{DropReason, MetricsCollector};
pub use queue::{Delivery, MemoryBroker, MessageQueue, QueueTopology};
pub use record::{LogRecord, LogSubmission, PageRequest, Telemetry};
pub use retention::{DailySchedule, RetentionSweeper, SweepReport};
pub use router::{LogRouter, RouteOutcome};
pub use service::RouterService;
pub use shard::{ShardHandle, ShardRegistry, ShardStats, SyncReport};
pub use store::{Connector, MemoryBackend, MemoryConnector, StoreBackend};
pub use sync::CatalogSyncWorker;
pub use tenant::{NewTenant, Severity, Tenant, TenantId, TenantUpdate};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
