//! Domain error types for the shard manager
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All library code returns Result<T, ManagerError>.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shard manager domain errors
///
/// Every variant carries structured context fields for diagnostics, so callers
/// can pattern-match on the failure mode instead of parsing message strings.
///
/// Example log output:
/// ```text
/// ManagerError::WorkerTimeout { shard_id: 3, timeout_ms: 5000 }
/// → "shard 3 did not answer within 5000ms"
/// ```
#[derive(Error, Debug)]
pub enum ManagerError {
    /// Configuration error (environment variable missing or invalid)
    #[error("configuration error: {0}")]
    Config(String),

    /// A request field failed validation
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// A moderation pattern is not a well-formed regular expression
    #[error("invalid regex pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Shard allocation does not satisfy its invariants
    #[error("shard {shard_id} is outside the allocation of {total_shards} shards")]
    ShardOutOfRange { shard_id: u32, total_shards: u32 },

    /// Shard allocation with zero total shards
    #[error("total shard count must be positive")]
    EmptyShardSpace,

    /// The platform shard recommendation could not be fetched
    #[error("failed to fetch shard recommendation")]
    ShardCountUnavailable(#[source] BoxError),

    /// A coordinator protocol step failed
    #[error("coordinator {step} failed")]
    Coordination {
        step: &'static str,
        #[source]
        source: BoxError,
    },

    /// A worker could not be launched
    #[error("shard {shard_id} failed to launch")]
    WorkerLaunch {
        shard_id: u32,
        #[source]
        source: BoxError,
    },

    /// The worker's command channel is closed (terminated or never started)
    #[error("shard {shard_id} is not accepting commands")]
    WorkerUnavailable { shard_id: u32 },

    /// The worker did not answer in time
    #[error("shard {shard_id} did not answer within {timeout_ms}ms")]
    WorkerTimeout { shard_id: u32, timeout_ms: u64 },

    /// The worker answered with a failure
    #[error("shard {shard_id} rejected command: {reason}")]
    WorkerRejected { shard_id: u32, reason: String },

    /// A Discord REST delivery (notice, notification, reply) failed
    #[error("discord delivery failed")]
    Delivery(#[source] BoxError),

    /// Build notifications are enabled without target channels
    #[error("build notifications are enabled but no channel is configured")]
    NotificationsUnconfigured,

    /// A scheduled job failed
    #[error("job '{job}' failed: {reason}")]
    JobFailed { job: String, reason: String },
}

impl ManagerError {
    /// Returns a static label string suitable for Prometheus metrics.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Validation { .. } => "validation",
            Self::InvalidPattern { .. } => "invalid_pattern",
            Self::ShardOutOfRange { .. } => "shard_out_of_range",
            Self::EmptyShardSpace => "empty_shard_space",
            Self::ShardCountUnavailable(_) => "shard_count",
            Self::Coordination { .. } => "coordination",
            Self::WorkerLaunch { .. } => "worker_launch",
            Self::WorkerUnavailable { .. } => "worker_unavailable",
            Self::WorkerTimeout { .. } => "worker_timeout",
            Self::WorkerRejected { .. } => "worker_rejected",
            Self::Delivery(_) => "delivery",
            Self::NotificationsUnconfigured => "notifications_unconfigured",
            Self::JobFailed { .. } => "job_failed",
        }
    }

    /// True for errors caused by caller input rather than system state.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::InvalidPattern { .. })
    }
}
