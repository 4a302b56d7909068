//! Shard management module
//!
//! - `allocation`: shard count and ownership
//! - `link`: typed command channel to a worker
//! - `fleet`: worker handles and lifecycle observation
//! - `worker`: twilight shard runtime

pub mod allocation;
mod fleet;
mod link;
mod worker;

pub use allocation::{ShardAllocation, ShardCountSource};
pub use fleet::{ShardHealth, WorkerEvent, WorkerEventKind, WorkerFleet, WorkerHandle, WorkerLauncher};
pub use link::{ActivityKind, Presence, WorkerCommand, WorkerLink};
pub use worker::TwilightLauncher;
