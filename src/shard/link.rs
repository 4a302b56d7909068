//! Typed command channel to a worker
//!
//! Workers are never touched directly: every interaction is a
//! `WorkerCommand` with a oneshot reply.

use crate::error::ManagerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use twilight_model::gateway::presence::ActivityType;
use twilight_model::id::{
    marker::{ChannelMarker, GuildMarker},
    Id,
};

/// Capacity of a worker's command queue
pub const COMMAND_BUFFER: usize = 32;

/// Activity kinds accepted by the presence endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    Playing,
    Streaming,
    Listening,
    Watching,
    Custom,
    Competing,
}

impl From<ActivityKind> for ActivityType {
    fn from(kind: ActivityKind) -> Self {
        match kind {
            ActivityKind::Playing => ActivityType::Playing,
            ActivityKind::Streaming => ActivityType::Streaming,
            ActivityKind::Listening => ActivityType::Listening,
            ActivityKind::Watching => ActivityType::Watching,
            ActivityKind::Custom => ActivityType::Custom,
            ActivityKind::Competing => ActivityType::Competing,
        }
    }
}

/// Presence to apply on every shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    pub kind: ActivityKind,
    pub name: String,
    pub url: Option<String>,
}

/// Closed set of commands a worker understands
#[derive(Debug)]
pub enum WorkerCommand {
    /// Guilds currently served by the shard
    GuildIds {
        reply: oneshot::Sender<Vec<Id<GuildMarker>>>,
    },
    /// Time since the shard became ready (zero before that)
    Uptime { reply: oneshot::Sender<Duration> },
    /// Update the shard's presence
    SetPresence {
        presence: Presence,
        reply: oneshot::Sender<Result<(), String>>,
    },
    /// Post `content` in `channel_id` if one of the shard's guilds owns it;
    /// answers whether the shard posted
    Announce {
        channel_id: Id<ChannelMarker>,
        content: String,
        reply: oneshot::Sender<Result<bool, String>>,
    },
}

impl WorkerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GuildIds { .. } => "guild_ids",
            Self::Uptime { .. } => "uptime",
            Self::SetPresence { .. } => "set_presence",
            Self::Announce { .. } => "announce",
        }
    }
}

/// Sending half of a worker's command queue
#[derive(Debug, Clone)]
pub struct WorkerLink {
    shard_id: u32,
    tx: mpsc::Sender<WorkerCommand>,
    timeout: Duration,
}

impl WorkerLink {
    /// Create a link and the receiver the worker task drains
    pub fn channel(shard_id: u32, timeout: Duration) -> (Self, mpsc::Receiver<WorkerCommand>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        (Self { shard_id, tx, timeout }, rx)
    }

    /// A link whose worker never started; every call fails
    pub fn detached(shard_id: u32, timeout: Duration) -> Self {
        let (link, _) = Self::channel(shard_id, timeout);
        link
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Send a command and await its reply within the link timeout
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> WorkerCommand,
    ) -> Result<T, ManagerError> {
        let shard_id = self.shard_id;
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);

        let exchange = async {
            let (reply, response) = oneshot::channel();
            self.tx
                .send(build(reply))
                .await
                .map_err(|_| ManagerError::WorkerUnavailable { shard_id })?;
            response
                .await
                .map_err(|_| ManagerError::WorkerUnavailable { shard_id })
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ManagerError::WorkerTimeout { shard_id, timeout_ms })?
    }

    pub async fn guild_ids(&self) -> Result<Vec<Id<GuildMarker>>, ManagerError> {
        self.call(|reply| WorkerCommand::GuildIds { reply }).await
    }

    pub async fn uptime(&self) -> Result<Duration, ManagerError> {
        self.call(|reply| WorkerCommand::Uptime { reply }).await
    }

    pub async fn set_presence(&self, presence: Presence) -> Result<(), ManagerError> {
        self.call(|reply| WorkerCommand::SetPresence { presence, reply })
            .await?
            .map_err(|reason| ManagerError::WorkerRejected {
                shard_id: self.shard_id,
                reason,
            })
    }

    pub async fn announce(
        &self,
        channel_id: Id<ChannelMarker>,
        content: String,
    ) -> Result<bool, ManagerError> {
        self.call(|reply| WorkerCommand::Announce {
            channel_id,
            content,
            reply,
        })
        .await?
        .map_err(|reason| ManagerError::WorkerRejected {
            shard_id: self.shard_id,
            reason,
        })
    }
}
