//! Server count job
//!
//! Counts distinct guilds across the fleet and publishes the total.

use super::Job;
use crate::broadcast::Broadcaster;
use crate::error::ManagerError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

pub struct UpdateServerCountJob {
    broadcaster: Broadcaster,
    interval: Duration,
    last_count: AtomicUsize,
}

impl UpdateServerCountJob {
    pub const NAME: &'static str = "update-server-count";

    pub fn new(broadcaster: Broadcaster, interval: Duration) -> Self {
        Self {
            broadcaster,
            interval,
            last_count: AtomicUsize::new(0),
        }
    }

    /// Count published by the latest successful run
    pub fn last_count(&self) -> usize {
        self.last_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Job for UpdateServerCountJob {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn run_on_start(&self) -> bool {
        true
    }

    async fn run(&self) -> Result<(), ManagerError> {
        let aggregate = self
            .broadcaster
            .gather("guild_ids", |link| async move { link.guild_ids().await })
            .await;

        let stats = aggregate.stats();
        if stats.total > 0 && stats.succeeded == 0 {
            return Err(ManagerError::JobFailed {
                job: Self::NAME.to_string(),
                reason: format!("no shard answered out of {}", stats.total),
            });
        }

        let count = aggregate.union().len();
        self.last_count.store(count, Ordering::Relaxed);
        self.broadcaster.fleet().metrics().set_guilds(count);

        info!(
            servers = count,
            shards_answered = stats.succeeded,
            shards_total = stats.total,
            "Updated server count"
        );
        Ok(())
    }
}
