//! NATS coordinator transport
//!
//! Each protocol step is a request/reply exchange on
//! `{prefix}.register`, `{prefix}.login` and `{prefix}.ready`.

use super::coordinator::{Assignment, Coordinator, NodeInfo};
use crate::error::ManagerError;
use async_nats::Client;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Subject suffixes for protocol steps
pub mod subjects {
    pub const REGISTER: &str = "register";
    pub const LOGIN: &str = "login";
    pub const READY: &str = "ready";
}

/// Coordinator acknowledgement
#[derive(Debug, Deserialize)]
struct Ack {
    #[serde(default = "default_ok")]
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

fn default_ok() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeRef<'a> {
    node_id: &'a str,
}

/// Coordinator reached over NATS request/reply
pub struct NatsCoordinator {
    client: Client,
    prefix: String,
}

impl NatsCoordinator {
    /// Connect to NATS server
    pub async fn connect(servers: &str, prefix: &str) -> Result<Self, ManagerError> {
        info!(servers, "Connecting to NATS");

        let client = async_nats::connect(servers)
            .await
            .map_err(|e| ManagerError::Coordination {
                step: "connect",
                source: Box::new(e),
            })?;

        info!(prefix, "Connected to coordinator bus");

        Ok(Self {
            client,
            prefix: prefix.to_string(),
        })
    }

    fn subject(&self, step: &str) -> String {
        format!("{}.{}", self.prefix, step)
    }

    async fn request<B, R>(&self, step: &'static str, body: &B) -> Result<R, ManagerError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let subject = self.subject(step);
        let payload = serde_json::to_vec(body).map_err(|e| ManagerError::Coordination {
            step,
            source: Box::new(e),
        })?;

        debug!(subject = %subject, "Sending coordinator request");

        let reply = self
            .client
            .request(subject, payload.into())
            .await
            .map_err(|e| ManagerError::Coordination {
                step,
                source: Box::new(e),
            })?;

        serde_json::from_slice(&reply.payload).map_err(|e| ManagerError::Coordination {
            step,
            source: Box::new(e),
        })
    }

    async fn acknowledge<B: Serialize + ?Sized>(
        &self,
        step: &'static str,
        body: &B,
    ) -> Result<(), ManagerError> {
        let ack: Ack = self.request(step, body).await?;
        if ack.ok {
            Ok(())
        } else {
            Err(ManagerError::Coordination {
                step,
                source: ack.error.unwrap_or_else(|| "rejected".to_string()).into(),
            })
        }
    }
}

#[async_trait]
impl Coordinator for NatsCoordinator {
    async fn register(&self, node: &NodeInfo) -> Result<(), ManagerError> {
        self.acknowledge(subjects::REGISTER, node).await
    }

    async fn login(&self, node_id: &str) -> Result<Assignment, ManagerError> {
        self.request(subjects::LOGIN, &NodeRef { node_id }).await
    }

    async fn ready(&self, node_id: &str) -> Result<(), ManagerError> {
        self.acknowledge(subjects::READY, &NodeRef { node_id }).await
    }
}
