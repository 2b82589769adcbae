//! Shard handles and the shard registry
//!
//! Each storage backend the router writes to is a shard. The registry holds
//! one [`ShardHandle`] per known shard, resolves tenants to the shard that
//! owns them, picks placement shards for new tenants and keeps the shard
//! catalog replicated across every shard.

mod handle;
mod registry;
mod stats;

pub use handle::ShardHandle;
pub use registry::{ShardRegistry, SyncReport};
pub use stats::{ShardStats, ShardSummary};

pub use crate::catalog::ShardId;
