//! Fan-out over the worker fleet
//!
//! Every call reaches all workers concurrently and waits for all of them to
//! settle. One worker failing never aborts the others; failures become
//! per-worker error entries instead.

use crate::error::ManagerError;
use crate::shard::{Presence, ShardHealth, WorkerFleet, WorkerLink};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;
use tracing::{debug, warn};
use twilight_model::id::{marker::ChannelMarker, Id};

/// Result of one worker call
#[derive(Debug)]
pub struct WorkerOutcome<T> {
    pub shard_id: u32,
    pub result: Result<T, ManagerError>,
}

/// Counts derived from an aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Per-worker outcomes ordered by shard id
#[derive(Debug)]
pub struct Aggregate<T> {
    outcomes: Vec<WorkerOutcome<T>>,
}

impl<T> Aggregate<T> {
    pub fn new(mut outcomes: Vec<WorkerOutcome<T>>) -> Self {
        outcomes.sort_by_key(|o| o.shard_id);
        Self { outcomes }
    }

    pub fn outcomes(&self) -> &[WorkerOutcome<T>] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<WorkerOutcome<T>> {
        self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn stats(&self) -> AggregateStats {
        let succeeded = self.outcomes.iter().filter(|o| o.result.is_ok()).count();
        AggregateStats {
            total: self.outcomes.len(),
            succeeded,
            failed: self.outcomes.len() - succeeded,
        }
    }

    /// Successful values, dropping failed workers
    pub fn values(self) -> impl Iterator<Item = T> {
        self.outcomes.into_iter().filter_map(|o| o.result.ok())
    }
}

impl<T: Eq + Hash> Aggregate<Vec<T>> {
    /// Flatten all successful results and deduplicate
    pub fn union(self) -> Vec<T> {
        self.values()
            .flatten()
            .collect::<HashSet<T>>()
            .into_iter()
            .collect()
    }
}

/// Fan-out executor over the fleet
#[derive(Debug, Clone)]
pub struct Broadcaster {
    fleet: WorkerFleet,
}

impl Broadcaster {
    pub fn new(fleet: WorkerFleet) -> Self {
        Self { fleet }
    }

    pub fn fleet(&self) -> &WorkerFleet {
        &self.fleet
    }

    /// Run `op` against every worker and wait for all results
    pub async fn gather<T, F, Fut>(&self, command: &'static str, op: F) -> Aggregate<T>
    where
        F: Fn(WorkerLink) -> Fut,
        Fut: Future<Output = Result<T, ManagerError>>,
    {
        let calls = self.fleet.links().into_iter().map(|link| {
            let shard_id = link.shard_id();
            let call = op(link);
            async move {
                WorkerOutcome {
                    shard_id,
                    result: call.await,
                }
            }
        });

        let aggregate = Aggregate::new(join_all(calls).await);

        for outcome in aggregate.outcomes() {
            if let Err(e) = &outcome.result {
                warn!(shard_id = outcome.shard_id, command, error = %e, "Worker call failed");
                self.fleet.metrics().record_call_failure(outcome.shard_id, command);
            }
        }

        let stats = aggregate.stats();
        debug!(command, total = stats.total, failed = stats.failed, "Fleet call settled");

        aggregate
    }

    /// Send `op` to every worker without waiting for delivery
    ///
    /// Returns the number of workers targeted. Delivery failures are logged only.
    pub fn dispatch<F, Fut>(&self, command: &'static str, op: F) -> usize
    where
        F: Fn(WorkerLink) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ManagerError>> + Send + 'static,
    {
        let targeted = self.fleet.shard_count();
        let broadcaster = self.clone();

        tokio::spawn(async move {
            broadcaster.gather(command, op).await;
        });

        targeted
    }

    /// Distinct guild ids served by the fleet (set-union)
    pub async fn guild_ids(&self) -> Vec<String> {
        self.gather("guild_ids", |link| async move { link.guild_ids().await })
            .await
            .union()
            .into_iter()
            .map(|id| id.to_string())
            .collect()
    }

    /// One health entry per worker, ordered by shard id
    pub async fn health_report(&self) -> Vec<ShardHealth> {
        let probes = self
            .fleet
            .shard_ids()
            .into_iter()
            .map(|shard_id| self.fleet.query_health(shard_id));
        join_all(probes).await
    }

    /// Apply a presence to every worker (best-effort)
    pub fn set_presence(&self, presence: Presence) -> usize {
        self.dispatch("set_presence", move |link| {
            let presence = presence.clone();
            async move { link.set_presence(presence).await }
        })
    }

    /// Post a notification in `channel_id` from whichever worker owns it (best-effort)
    pub fn announce(&self, channel_id: Id<ChannelMarker>, content: String) -> usize {
        self.dispatch("announce", move |link| {
            let content = content.clone();
            async move { link.announce(channel_id, content).await.map(|_| ()) }
        })
    }
}
