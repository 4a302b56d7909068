//! Worker fleet
//!
//! One handle per owned shard id. Handles are updated only from lifecycle
//! events delivered over a channel; the fleet never respawns workers itself.

use crate::error::ManagerError;
use crate::metrics::ManagerMetrics;
use crate::shard::allocation::ShardAllocation;
use crate::shard::link::WorkerLink;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Lifecycle signal emitted by a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEventKind {
    Created,
    Ready,
    Errored(String),
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEvent {
    pub shard_id: u32,
    pub kind: WorkerEventKind,
}

impl WorkerEvent {
    pub fn new(shard_id: u32, kind: WorkerEventKind) -> Self {
        Self { shard_id, kind }
    }
}

/// Creates the worker for a shard (gateway collaborator)
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Start the worker for `shard_id` and return its command link
    ///
    /// The worker reports its lifecycle on `events`.
    async fn launch(
        &self,
        shard_id: u32,
        total_shards: u32,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<WorkerLink, ManagerError>;
}

/// State of a single worker
#[derive(Debug)]
pub struct WorkerHandle {
    pub shard_id: u32,
    /// Set once the worker reported ready; never cleared for this handle
    pub ready: bool,
    pub last_error: Option<String>,
    pub terminated: bool,
    pub created_at: Instant,
    link: WorkerLink,
}

impl WorkerHandle {
    fn new(shard_id: u32, link: WorkerLink) -> Self {
        Self {
            shard_id,
            ready: false,
            last_error: None,
            terminated: false,
            created_at: Instant::now(),
            link,
        }
    }
}

/// Health of one shard as seen by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardHealth {
    pub id: u32,
    pub ready: bool,
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
}

/// Shared fleet state
#[derive(Debug, Clone)]
pub struct WorkerFleet {
    inner: Arc<FleetInner>,
}

#[derive(Debug)]
struct FleetInner {
    handles: DashMap<u32, WorkerHandle>,
    total_shards: u32,
    call_timeout: Duration,
    started_at: Instant,
    metrics: Arc<ManagerMetrics>,
}

impl WorkerFleet {
    /// Create an empty fleet
    pub fn new(total_shards: u32, call_timeout: Duration, metrics: Arc<ManagerMetrics>) -> Self {
        Self {
            inner: Arc::new(FleetInner {
                handles: DashMap::new(),
                total_shards,
                call_timeout,
                started_at: Instant::now(),
                metrics,
            }),
        }
    }

    /// Launch one worker per assigned shard
    ///
    /// A failed launch still leaves a handle behind, marked with the error and
    /// holding a detached link, so the shard keeps its place in every report.
    pub async fn spawn_all(
        &self,
        allocation: &ShardAllocation,
        launcher: &dyn WorkerLauncher,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) {
        info!(
            shard_count = allocation.len(),
            total_shards = allocation.total_shards(),
            "Spawning worker fleet"
        );

        for &shard_id in allocation.shard_list() {
            match launcher
                .launch(shard_id, allocation.total_shards(), events.clone())
                .await
            {
                Ok(link) => {
                    let link = link.with_timeout(self.inner.call_timeout);
                    self.inner.handles.insert(shard_id, WorkerHandle::new(shard_id, link));
                }
                Err(e) => {
                    error!(shard_id, error = %e, "Failed to launch worker");
                    self.inner.metrics.record_error(&e);
                    let mut handle = WorkerHandle::new(
                        shard_id,
                        WorkerLink::detached(shard_id, self.inner.call_timeout),
                    );
                    handle.last_error = Some(e.to_string());
                    self.inner.handles.insert(shard_id, handle);
                }
            }
        }
    }

    /// Install a fresh handle for a respawned worker
    pub fn replace(&self, shard_id: u32, link: WorkerLink) {
        let link = link.with_timeout(self.inner.call_timeout);
        self.inner.handles.insert(shard_id, WorkerHandle::new(shard_id, link));
        info!(shard_id, "Worker handle replaced");
    }

    /// Consume lifecycle events until every sender is dropped
    pub fn observe(&self, mut events: mpsc::UnboundedReceiver<WorkerEvent>) -> JoinHandle<()> {
        let fleet = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                fleet.apply(event);
            }
        })
    }

    /// Apply one lifecycle event
    pub fn apply(&self, event: WorkerEvent) {
        let shard_id = event.shard_id;
        let metrics = &self.inner.metrics;

        {
            let Some(mut handle) = self.inner.handles.get_mut(&shard_id) else {
                warn!(shard_id, "Lifecycle event for unknown shard");
                return;
            };

            match event.kind {
                WorkerEventKind::Created => {
                    info!(shard_id, "Worker created");
                    metrics.record_lifecycle(shard_id, "created");
                }
                WorkerEventKind::Ready => {
                    handle.ready = true;
                    info!(shard_id, "Worker ready");
                    metrics.record_lifecycle(shard_id, "ready");
                }
                WorkerEventKind::Errored(reason) => {
                    error!(shard_id, error = %reason, "Worker error");
                    handle.last_error = Some(reason);
                    metrics.record_lifecycle(shard_id, "errored");
                }
                WorkerEventKind::Terminated => {
                    handle.terminated = true;
                    warn!(shard_id, "Worker terminated");
                    metrics.record_lifecycle(shard_id, "terminated");
                }
            }
        }

        metrics.set_workers_ready(self.ready_workers());
    }

    /// Probe one shard; failures are reported in the result, never returned
    pub async fn query_health(&self, shard_id: u32) -> ShardHealth {
        let Some((ready, link)) = self
            .inner
            .handles
            .get(&shard_id)
            .map(|h| (h.ready, h.link.clone()))
        else {
            return ShardHealth {
                id: shard_id,
                ready: false,
                error: true,
                uptime_secs: None,
            };
        };

        match link.uptime().await {
            Ok(uptime) => ShardHealth {
                id: shard_id,
                ready,
                error: false,
                uptime_secs: Some(uptime.as_secs()),
            },
            Err(e) => {
                error!(shard_id, error = %e, "Failed to fetch shard info");
                self.inner.metrics.record_call_failure(shard_id, "uptime");
                ShardHealth {
                    id: shard_id,
                    ready,
                    error: true,
                    uptime_secs: None,
                }
            }
        }
    }

    /// Command links of every worker, ordered by shard id
    pub fn links(&self) -> Vec<WorkerLink> {
        let mut links: Vec<WorkerLink> =
            self.inner.handles.iter().map(|h| h.link.clone()).collect();
        links.sort_by_key(WorkerLink::shard_id);
        links
    }

    /// Owned shard ids in ascending order
    pub fn shard_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.inner.handles.iter().map(|h| *h.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_ready(&self, shard_id: u32) -> bool {
        self.inner.handles.get(&shard_id).is_some_and(|h| h.ready)
    }

    pub fn last_error(&self, shard_id: u32) -> Option<String> {
        self.inner
            .handles
            .get(&shard_id)
            .and_then(|h| h.last_error.clone())
    }

    pub fn is_terminated(&self, shard_id: u32) -> bool {
        self.inner.handles.get(&shard_id).is_some_and(|h| h.terminated)
    }

    /// Get count of ready workers
    pub fn ready_workers(&self) -> usize {
        self.inner.handles.iter().filter(|h| h.ready).count()
    }

    /// Get total worker count on this node
    pub fn shard_count(&self) -> usize {
        self.inner.handles.len()
    }

    /// Get total shards across the cluster
    pub fn total_shards(&self) -> u32 {
        self.inner.total_shards
    }

    /// Time since the fleet was created
    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    pub fn call_timeout(&self) -> Duration {
        self.inner.call_timeout
    }

    pub fn metrics(&self) -> &Arc<ManagerMetrics> {
        &self.inner.metrics
    }
}
