//! In-process fakes for integration tests
//!
//! Fake workers speak the real `WorkerCommand` protocol over real links, so
//! everything above the gateway runs unmodified.

#![allow(dead_code)]

use async_trait::async_trait;
use shard_manager::api::ApiState;
use shard_manager::broadcast::Broadcaster;
use shard_manager::cluster::{Assignment, Coordinator, NodeInfo};
use shard_manager::config::BuildNotificationConfig;
use shard_manager::metrics::ManagerMetrics;
use shard_manager::shard::{
    Presence, ShardAllocation, ShardCountSource, WorkerCommand, WorkerEvent, WorkerEventKind,
    WorkerFleet, WorkerLauncher, WorkerLink,
};
use shard_manager::ManagerError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use twilight_model::id::{marker::ChannelMarker, Id};

pub const SECRET: &str = "test-secret";
pub const CALL_TIMEOUT: Duration = Duration::from_millis(100);

/// How a fake worker behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Answers every command
    Healthy,
    /// Accepts commands and never answers
    Hanging,
    /// Launch itself fails
    FailLaunch,
}

/// Channel owned by a healthy shard
pub fn channel_of(shard_id: u32) -> Id<ChannelMarker> {
    Id::new(100 + u64::from(shard_id))
}

/// Guilds served by a healthy shard: `{shard_id + 1, shard_id + 2}`
pub fn guilds_of(shard_id: u32) -> Vec<u64> {
    vec![u64::from(shard_id) + 1, u64::from(shard_id) + 2]
}

#[derive(Default)]
pub struct FakeLauncher {
    behaviors: HashMap<u32, Behavior>,
    pub launches: AtomicUsize,
    pub seen_total: Mutex<Option<u32>>,
    pub presences: Arc<Mutex<Vec<(u32, Presence)>>>,
    pub announcements: Arc<Mutex<Vec<(u32, Id<ChannelMarker>, String)>>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, shard_id: u32, behavior: Behavior) -> Self {
        self.behaviors.insert(shard_id, behavior);
        self
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn presences(&self) -> Vec<(u32, Presence)> {
        self.presences.lock().unwrap().clone()
    }

    pub fn announcements(&self) -> Vec<(u32, Id<ChannelMarker>, String)> {
        self.announcements.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerLauncher for FakeLauncher {
    async fn launch(
        &self,
        shard_id: u32,
        total_shards: u32,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<WorkerLink, ManagerError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        *self.seen_total.lock().unwrap() = Some(total_shards);

        let behavior = self
            .behaviors
            .get(&shard_id)
            .copied()
            .unwrap_or(Behavior::Healthy);

        if behavior == Behavior::FailLaunch {
            return Err(ManagerError::WorkerLaunch {
                shard_id,
                source: "gateway refused the connection".into(),
            });
        }

        let (link, mut rx) = WorkerLink::channel(shard_id, CALL_TIMEOUT);
        let _ = events.send(WorkerEvent::new(shard_id, WorkerEventKind::Created));

        match behavior {
            Behavior::Hanging => {
                tokio::spawn(async move {
                    let mut held = Vec::new();
                    while let Some(command) = rx.recv().await {
                        held.push(command);
                    }
                });
            }
            _ => {
                let _ = events.send(WorkerEvent::new(shard_id, WorkerEventKind::Ready));
                let presences = Arc::clone(&self.presences);
                let announcements = Arc::clone(&self.announcements);
                tokio::spawn(async move {
                    while let Some(command) = rx.recv().await {
                        match command {
                            WorkerCommand::GuildIds { reply } => {
                                let _ = reply.send(
                                    guilds_of(shard_id).into_iter().map(Id::new).collect(),
                                );
                            }
                            WorkerCommand::Uptime { reply } => {
                                let _ = reply.send(Duration::from_secs(u64::from(shard_id) * 10));
                            }
                            WorkerCommand::SetPresence { presence, reply } => {
                                presences.lock().unwrap().push((shard_id, presence));
                                let _ = reply.send(Ok(()));
                            }
                            WorkerCommand::Announce {
                                channel_id,
                                content,
                                reply,
                            } => {
                                let owned = channel_id == channel_of(shard_id);
                                if owned {
                                    announcements
                                        .lock()
                                        .unwrap()
                                        .push((shard_id, channel_id, content));
                                }
                                let _ = reply.send(Ok(owned));
                            }
                        }
                    }
                });
            }
        }

        Ok(link)
    }
}

/// Platform recommendation fixed at construction
pub struct FixedSource(pub u32);

#[async_trait]
impl ShardCountSource for FixedSource {
    async fn recommended_shards(&self) -> Result<u32, ManagerError> {
        Ok(self.0)
    }
}

/// Coordinator that records every step
pub struct FakeCoordinator {
    pub assignment: Assignment,
    pub fail_step: Option<&'static str>,
    pub calls: Mutex<Vec<&'static str>>,
    pub registered: Mutex<Option<NodeInfo>>,
}

impl FakeCoordinator {
    pub fn new(shard_list: Vec<u32>, total_shards: u32) -> Self {
        Self {
            assignment: Assignment {
                shard_list,
                total_shards,
            },
            fail_step: None,
            calls: Mutex::new(Vec::new()),
            registered: Mutex::new(None),
        }
    }

    pub fn failing_at(mut self, step: &'static str) -> Self {
        self.fail_step = Some(step);
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn step(&self, step: &'static str) -> Result<(), ManagerError> {
        self.calls.lock().unwrap().push(step);
        if self.fail_step == Some(step) {
            return Err(ManagerError::Coordination {
                step,
                source: "no responders".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Coordinator for FakeCoordinator {
    async fn register(&self, node: &NodeInfo) -> Result<(), ManagerError> {
        self.step("register")?;
        *self.registered.lock().unwrap() = Some(node.clone());
        Ok(())
    }

    async fn login(&self, _node_id: &str) -> Result<Assignment, ManagerError> {
        self.step("login")?;
        Ok(self.assignment.clone())
    }

    async fn ready(&self, _node_id: &str) -> Result<(), ManagerError> {
        self.step("ready")
    }
}

/// Fleet of `shards` workers launched through `launcher`, lifecycle applied
pub async fn fleet(launcher: &FakeLauncher, shards: u32) -> WorkerFleet {
    let fleet = WorkerFleet::new(shards, CALL_TIMEOUT, Arc::new(ManagerMetrics::disabled()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    fleet
        .spawn_all(&ShardAllocation::full(shards).unwrap(), launcher, tx)
        .await;
    while let Ok(event) = rx.try_recv() {
        fleet.apply(event);
    }
    fleet
}

pub fn api_state(fleet: WorkerFleet, notifications: BuildNotificationConfig) -> ApiState {
    ApiState {
        broadcaster: Broadcaster::new(fleet),
        scheduler: None,
        metrics: Arc::new(ManagerMetrics::disabled()),
        secret: Arc::from(SECRET),
        build_notifications: Arc::new(notifications),
        node_id: Arc::from("node-test"),
    }
}

/// Poll `check` until it holds or a second passes
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
