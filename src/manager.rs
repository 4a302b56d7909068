//! Startup orchestration
//!
//! Resolves the shard allocation (alone or through the coordinator), starts
//! the fleet and the scheduler, and hands out the pieces the control API needs.

use crate::api::ApiState;
use crate::broadcast::Broadcaster;
use crate::cluster::{CoordinationSession, Coordinator, LoggedIn, NodeInfo};
use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::jobs::{Job, JobScheduler, UpdateServerCountJob};
use crate::metrics::ManagerMetrics;
use crate::shard::allocation::{resolve_clustered, resolve_standalone};
use crate::shard::{ShardAllocation, ShardCountSource, WorkerFleet, WorkerLauncher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// External systems the manager drives
pub struct Collaborators<'a> {
    pub shard_source: &'a dyn ShardCountSource,
    /// Present in clustered mode only
    pub coordinator: Option<&'a dyn Coordinator>,
    pub launcher: &'a dyn WorkerLauncher,
}

/// Startup parameters
#[derive(Debug, Clone)]
pub struct StartupOptions {
    pub node: NodeInfo,
    pub servers_per_shard: u32,
    pub call_timeout: Duration,
    pub server_count_interval: Duration,
}

impl StartupOptions {
    pub fn from_config(config: &ManagerConfig, node_id: String) -> Self {
        let (shard_count, callback_url) = config
            .cluster
            .as_ref()
            .map(|c| (c.shard_capacity, c.callback_url.clone()))
            .unwrap_or_default();

        Self {
            node: NodeInfo {
                node_id,
                shard_count,
                callback_url,
            },
            servers_per_shard: config.servers_per_shard,
            call_timeout: config.worker_call_timeout,
            server_count_interval: config.server_count_interval,
        }
    }
}

/// A started node
pub struct ShardManager<'a> {
    node_id: String,
    allocation: ShardAllocation,
    fleet: WorkerFleet,
    broadcaster: Broadcaster,
    scheduler: Option<JobScheduler>,
    tasks: Vec<JoinHandle<()>>,
    session: Option<LoggedIn<'a>>,
}

impl<'a> ShardManager<'a> {
    /// Bring the node up
    ///
    /// Returns `Ok(None)` when this node owns no shard: nothing is launched and
    /// the caller should exit cleanly. Register and login failures abort
    /// startup before any worker exists.
    pub async fn start(
        collaborators: Collaborators<'a>,
        options: &StartupOptions,
        metrics: Arc<ManagerMetrics>,
    ) -> Result<Option<Self>, ManagerError> {
        let (allocation, session) = match collaborators.coordinator {
            Some(coordinator) => {
                let registered = CoordinationSession::new(coordinator, options.node.clone())
                    .register()
                    .await?;
                let (assignment, session) = registered.login().await?;
                let allocation = resolve_clustered(collaborators.shard_source, assignment).await?;
                (allocation, Some(session))
            }
            None => {
                let allocation =
                    resolve_standalone(collaborators.shard_source, options.servers_per_shard)
                        .await?;
                (allocation, None)
            }
        };

        if allocation.is_empty() {
            warn!(
                node_id = %options.node.node_id,
                total_shards = allocation.total_shards(),
                "No shards assigned to this node, nothing to start"
            );
            return Ok(None);
        }

        let fleet = WorkerFleet::new(
            allocation.total_shards(),
            options.call_timeout,
            Arc::clone(&metrics),
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        fleet
            .spawn_all(&allocation, collaborators.launcher, events_tx)
            .await;
        let mut tasks = vec![fleet.observe(events_rx)];

        let broadcaster = Broadcaster::new(fleet.clone());

        // Server count is owned by the coordinator when clustered
        let scheduler = if session.is_none() {
            let job = UpdateServerCountJob::new(broadcaster.clone(), options.server_count_interval);
            let scheduler = JobScheduler::new(vec![Arc::new(job) as Arc<dyn Job>], metrics);
            tasks.extend(scheduler.start());
            Some(scheduler)
        } else {
            None
        };

        info!(
            node_id = %options.node.node_id,
            shards = allocation.len(),
            total_shards = allocation.total_shards(),
            clustered = session.is_some(),
            "Shard manager started"
        );

        Ok(Some(Self {
            node_id: options.node.node_id.clone(),
            allocation,
            fleet,
            broadcaster,
            scheduler,
            tasks,
            session,
        }))
    }

    /// Tell the coordinator this node is fully up; no-op when standalone
    pub async fn signal_ready(&mut self) {
        if let Some(session) = self.session.take() {
            session.ready().await;
        }
    }

    /// State for the control API router
    pub fn api_state(&self, config: &ManagerConfig, metrics: Arc<ManagerMetrics>) -> ApiState {
        ApiState {
            broadcaster: self.broadcaster.clone(),
            scheduler: self.scheduler.clone(),
            metrics,
            secret: Arc::from(config.api_secret.as_str()),
            build_notifications: Arc::new(config.build_notifications.clone()),
            node_id: Arc::from(self.node_id.as_str()),
        }
    }

    pub fn allocation(&self) -> &ShardAllocation {
        &self.allocation
    }

    pub fn fleet(&self) -> &WorkerFleet {
        &self.fleet
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn scheduler(&self) -> Option<&JobScheduler> {
        self.scheduler.as_ref()
    }

    /// Stop the scheduler timers and the lifecycle observer
    pub fn shutdown(self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown();
        }
        for task in &self.tasks {
            task.abort();
        }
        info!(node_id = %self.node_id, "Shard manager stopped");
    }
}
