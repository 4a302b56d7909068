//! Shard allocation
//!
//! Decides how many shards exist and which of them this node runs.

use crate::cluster::Assignment;
use crate::error::ManagerError;
use async_trait::async_trait;
use tracing::info;

/// Guild load Discord allows per shard before a new shard becomes mandatory
pub const MAX_GUILDS_PER_SHARD: u32 = 2500;

/// Guild load Discord's recommendation is based on
const RECOMMENDATION_BASIS: u32 = 1000;

/// Source of Discord's shard recommendation (`GET /gateway/bot`)
#[async_trait]
pub trait ShardCountSource: Send + Sync {
    /// Raw shard count recommended by the platform
    async fn recommended_shards(&self) -> Result<u32, ManagerError>;
}

#[async_trait]
impl ShardCountSource for twilight_http::Client {
    async fn recommended_shards(&self) -> Result<u32, ManagerError> {
        let info = self
            .gateway()
            .authed()
            .await
            .map_err(|e| ManagerError::ShardCountUnavailable(Box::new(e)))?
            .model()
            .await
            .map_err(|e| ManagerError::ShardCountUnavailable(Box::new(e)))?;

        Ok(info.shards)
    }
}

/// Rescale a platform recommendation to a target guild load per shard
///
/// Never returns less than one shard.
pub fn scale_shard_count(recommended: u32, guilds_per_shard: u32) -> u32 {
    let guilds = u64::from(recommended) * u64::from(RECOMMENDATION_BASIS);
    let per_shard = u64::from(guilds_per_shard.max(1));
    let scaled = guilds.div_ceil(per_shard);
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}

/// Shards owned by this node, out of the global shard space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardAllocation {
    shard_list: Vec<u32>,
    total_shards: u32,
}

impl ShardAllocation {
    /// Build an allocation, sorting and deduplicating `shard_list`
    pub fn new(
        shard_list: impl IntoIterator<Item = u32>,
        total_shards: u32,
    ) -> Result<Self, ManagerError> {
        if total_shards == 0 {
            return Err(ManagerError::EmptyShardSpace);
        }

        let mut shard_list: Vec<u32> = shard_list.into_iter().collect();
        shard_list.sort_unstable();
        shard_list.dedup();

        if let Some(&shard_id) = shard_list.iter().find(|&&id| id >= total_shards) {
            return Err(ManagerError::ShardOutOfRange {
                shard_id,
                total_shards,
            });
        }

        Ok(Self {
            shard_list,
            total_shards,
        })
    }

    /// Every shard `0..total_shards`
    pub fn full(total_shards: u32) -> Result<Self, ManagerError> {
        Self::new(0..total_shards, total_shards)
    }

    pub fn shard_list(&self) -> &[u32] {
        &self.shard_list
    }

    pub fn total_shards(&self) -> u32 {
        self.total_shards
    }

    pub fn is_empty(&self) -> bool {
        self.shard_list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.shard_list.len()
    }
}

/// Standalone mode: this node runs every recommended shard
pub async fn resolve_standalone(
    source: &dyn ShardCountSource,
    servers_per_shard: u32,
) -> Result<ShardAllocation, ManagerError> {
    let recommended = source.recommended_shards().await?;
    let count = scale_shard_count(recommended, servers_per_shard);

    info!(recommended, servers_per_shard, count, "Resolved standalone shard count");

    ShardAllocation::full(count)
}

/// Clustered mode: the coordinator picks our shards, the platform bounds the total
///
/// A stale coordinator may propose fewer shards than Discord requires, so the
/// total is raised to the platform minimum when needed.
pub async fn resolve_clustered(
    source: &dyn ShardCountSource,
    assignment: Assignment,
) -> Result<ShardAllocation, ManagerError> {
    let recommended = source.recommended_shards().await?;
    let required = scale_shard_count(recommended, MAX_GUILDS_PER_SHARD);
    let total_shards = required.max(assignment.total_shards);

    info!(
        proposed = assignment.total_shards,
        required,
        total_shards,
        assigned = assignment.shard_list.len(),
        "Resolved clustered shard allocation"
    );

    ShardAllocation::new(assignment.shard_list, total_shards)
}
