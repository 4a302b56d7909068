//! Coordinator protocol
//!
//! register → login → ready. The session types make it impossible to log in
//! before registering or to signal readiness before receiving an assignment.

use crate::error::ManagerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// What this node announces to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub node_id: String,
    /// Shards this node is willing to host (0 = coordinator decides)
    pub shard_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

/// Shard assignment proposed by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub shard_list: Vec<u32>,
    pub total_shards: u32,
}

/// Transport to the external coordinator
#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn register(&self, node: &NodeInfo) -> Result<(), ManagerError>;
    async fn login(&self, node_id: &str) -> Result<Assignment, ManagerError>;
    async fn ready(&self, node_id: &str) -> Result<(), ManagerError>;
}

/// Entry point of the protocol
pub struct CoordinationSession<'a> {
    coordinator: &'a dyn Coordinator,
    node: NodeInfo,
}

/// Node announced, no topology yet
pub struct Registered<'a> {
    coordinator: &'a dyn Coordinator,
    node: NodeInfo,
}

/// Assignment received, fleet may be started
pub struct LoggedIn<'a> {
    coordinator: &'a dyn Coordinator,
    node: NodeInfo,
}

impl<'a> CoordinationSession<'a> {
    pub fn new(coordinator: &'a dyn Coordinator, node: NodeInfo) -> Self {
        Self { coordinator, node }
    }

    /// Announce presence before any topology decision
    pub async fn register(self) -> Result<Registered<'a>, ManagerError> {
        self.coordinator.register(&self.node).await?;
        info!(node_id = %self.node.node_id, "Registered with coordinator");
        Ok(Registered {
            coordinator: self.coordinator,
            node: self.node,
        })
    }
}

impl<'a> Registered<'a> {
    /// Request this node's shard assignment
    pub async fn login(self) -> Result<(Assignment, LoggedIn<'a>), ManagerError> {
        let assignment = self.coordinator.login(&self.node.node_id).await?;
        info!(
            node_id = %self.node.node_id,
            shards = assignment.shard_list.len(),
            total_shards = assignment.total_shards,
            "Received shard assignment"
        );
        Ok((
            assignment,
            LoggedIn {
                coordinator: self.coordinator,
                node: self.node,
            },
        ))
    }
}

impl LoggedIn<'_> {
    /// Signal full startup; failure is logged since the fleet is already live
    pub async fn ready(self) {
        match self.coordinator.ready(&self.node.node_id).await {
            Ok(()) => info!(node_id = %self.node.node_id, "Signalled ready to coordinator"),
            Err(e) => warn!(
                node_id = %self.node.node_id,
                error = %e,
                "Failed to signal ready to coordinator"
            ),
        }
    }

    pub fn node(&self) -> &NodeInfo {
        &self.node
    }
}
