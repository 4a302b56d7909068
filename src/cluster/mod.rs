//! Multi-node coordination
//!
//! Registers this node with the coordinator and retrieves its shard range.

mod coordinator;
mod nats;

pub use coordinator::{Assignment, CoordinationSession, Coordinator, LoggedIn, NodeInfo, Registered};
pub use nats::NatsCoordinator;
