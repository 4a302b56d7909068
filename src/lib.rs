//! Shard Manager - Discord shard fleet control plane
//!
//! - Resolves how many shards exist and which ones this node runs
//! - Optionally coordinates with other nodes over NATS
//! - Drives one worker per shard through a typed command channel
//! - Aggregates fleet state behind an authenticated HTTP control API
//! - Validates channel message formats and runs recurring jobs

pub mod api;
pub mod broadcast;
pub mod cluster;
pub mod config;
pub mod error;
pub mod jobs;
pub mod manager;
pub mod metrics;
pub mod moderation;
pub mod shard;

pub use config::ManagerConfig;
pub use error::ManagerError;
pub use manager::{Collaborators, ShardManager, StartupOptions};
