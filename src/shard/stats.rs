//! Shard statistics
//!
//! Point-in-time counts across the registry, gathered on demand for admin
//! reporting.

use crate::catalog::{ShardId, Technology};

/// Counts for a single shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSummary {
    /// Shard ID
    pub id: ShardId,
    /// Storage technology
    pub technology: Technology,
    /// Seed flag
    pub seed: bool,
    /// Active flag snapshot
    pub active: bool,
    /// Number of tenants placed on the shard; `None` if the count failed
    pub tenants: Option<usize>,
}

/// Statistics about the registry's shards
#[derive(Debug, Clone, Default)]
pub struct ShardStats {
    /// Number of shards
    pub shard_count: usize,
    /// Number of active shards
    pub active_shards: usize,
    /// Number of inactive shards
    pub inactive_shards: usize,
    /// Number of shards eligible for placement
    pub eligible_shards: usize,
    /// Total number of tenants across shards that could be counted
    pub total_tenants: usize,
    /// Number of cached tenant resolutions
    pub cached_tenants: usize,
    /// Per-shard details, ordered by shard ID
    pub shards: Vec<ShardSummary>,
}

impl ShardStats {
    /// Create new empty shard stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one shard into the totals
    pub fn add(&mut self, summary: ShardSummary) {
        self.shard_count += 1;
        if summary.active {
            self.active_shards += 1;
        } else {
            self.inactive_shards += 1;
        }
        if summary.active && !summary.seed {
            self.eligible_shards += 1;
        }
        self.total_tenants += summary.tenants.unwrap_or(0);
        self.shards.push(summary);
    }

    /// Calculate the average number of tenants per eligible shard
    pub fn avg_tenants_per_shard(&self) -> f64 {
        if self.eligible_shards == 0 {
            return 0.0;
        }

        self.total_tenants as f64 / self.eligible_shards as f64
    }

    /// Check if there are any shards
    pub fn has_shards(&self) -> bool {
        self.shard_count > 0
    }

    /// Create a human-readable report of statistics
    pub fn report(&self) -> String {
        let mut result = String::new();

        result.push_str("=== Shard Statistics ===\n\n");

        result.push_str(&format!("Total Shards: {}\n", self.shard_count));
        result.push_str(&format!("  - Active: {}\n", self.active_shards));
        result.push_str(&format!("  - Inactive: {}\n", self.inactive_shards));
        result.push_str(&format!("  - Eligible: {}\n", self.eligible_shards));

        result.push_str(&format!("Total Tenants: {}\n", self.total_tenants));
        result.push_str(&format!("Cached Resolutions: {}\n", self.cached_tenants));

        if self.has_shards() {
            result.push_str(&format!(
                "Avg. Tenants per Shard: {:.2}\n",
                self.avg_tenants_per_shard()
            ));
        }

        for shard in &self.shards {
            let tenants = shard
                .tenants
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string());
            result.push_str(&format!(
                "  {} [{}]{}{} tenants={}\n",
                shard.id,
                shard.technology,
                if shard.seed { " seed" } else { "" },
                if shard.active { "" } else { " inactive" },
                tenants
            ));
        }

        result
    }
}
