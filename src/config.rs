//! Manager configuration module
//!
//! Handles loading configuration from environment variables.

use crate::error::ManagerError;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use twilight_gateway::Intents;
use twilight_model::id::{marker::ChannelMarker, Id};

/// Cluster coordination settings (multi-node mode)
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// NATS server URL(s) - comma-separated for multiple servers
    pub nats_url: String,

    /// Subject prefix for coordinator requests (`{prefix}.register` etc.)
    pub subject_prefix: String,

    /// Shards this node is willing to host (0 = coordinator decides)
    pub shard_capacity: u32,

    /// Where the coordinator can reach this node's control API
    pub callback_url: Option<String>,
}

/// Build notification delivery settings
#[derive(Debug, Clone, Default)]
pub struct BuildNotificationConfig {
    pub enabled: bool,
    pub channel_ids: Vec<Id<ChannelMarker>>,
}

/// Manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Discord bot token
    pub discord_token: String,

    /// Shared secret expected in the `Authorization` header
    pub api_secret: String,

    /// Control API HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Target guild load per shard in standalone mode
    pub servers_per_shard: u32,

    /// Present when clustering is enabled
    pub cluster: Option<ClusterConfig>,

    /// Upper bound for a single worker command round-trip
    pub worker_call_timeout: Duration,

    pub build_notifications: BuildNotificationConfig,

    /// Interval of the server count job
    pub server_count_interval: Duration,
}

impl ManagerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ManagerError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ManagerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let discord_token = lookup("DISCORD_TOKEN")
            .or_else(|| lookup("DISCORD_BOT_TOKEN"))
            .ok_or_else(|| {
                ManagerError::Config("DISCORD_TOKEN or DISCORD_BOT_TOKEN must be set".to_string())
            })?;

        let api_secret = lookup("API_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ManagerError::Config("API_SECRET must be set".to_string()))?;

        let http_port = parse_or(&lookup, "HTTP_PORT", 3001u16)?;
        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let servers_per_shard: u32 = parse_or(&lookup, "SERVERS_PER_SHARD", 1000)?;
        if servers_per_shard == 0 {
            return Err(ManagerError::Config(
                "SERVERS_PER_SHARD must be greater than zero".to_string(),
            ));
        }

        let clustering_enabled = parse_bool(&lookup, "CLUSTERING_ENABLED")?;
        let cluster = if clustering_enabled {
            let nats_url = lookup("NATS_URL").ok_or_else(|| {
                ManagerError::Config("NATS_URL must be set when CLUSTERING_ENABLED".to_string())
            })?;
            Some(ClusterConfig {
                nats_url,
                subject_prefix: lookup("COORDINATOR_SUBJECT")
                    .unwrap_or_else(|| "cluster".to_string()),
                shard_capacity: parse_or(&lookup, "CLUSTER_SHARD_CAPACITY", 0)?,
                callback_url: lookup("CLUSTER_CALLBACK_URL"),
            })
        } else {
            None
        };

        let worker_call_timeout =
            Duration::from_millis(parse_or(&lookup, "WORKER_CALL_TIMEOUT_MS", 5000u64)?);

        let build_notifications = BuildNotificationConfig {
            enabled: parse_bool(&lookup, "BUILD_NOTIFICATIONS_ENABLED")?,
            channel_ids: parse_channel_list(lookup("BUILD_NOTIFICATION_CHANNELS").as_deref())?,
        };

        let server_count_interval =
            Duration::from_secs(parse_or(&lookup, "SERVER_COUNT_INTERVAL_SECS", 300u64)?.max(1));

        Ok(Self {
            discord_token,
            api_secret,
            http_port,
            log_level,
            servers_per_shard,
            cluster,
            worker_call_timeout,
            build_notifications,
            server_count_interval,
        })
    }

    /// Whether this node takes part in a multi-node cluster
    pub fn clustering_enabled(&self) -> bool {
        self.cluster.is_some()
    }

    /// Get configured Discord intents
    ///
    /// - GUILDS: guild lifecycle events (guild and channel membership)
    /// - GUILD_MESSAGES: messages to moderate
    /// - MESSAGE_CONTENT: message text for format validation (privileged)
    pub fn intents() -> Intents {
        Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ManagerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ManagerError::Config(format!("{key} must be a valid number: {e}"))),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str) -> Result<bool, ManagerError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") => Ok(true),
        Some("0") | Some("false") | Some("FALSE") | Some("no") => Ok(false),
        Some(other) => Err(ManagerError::Config(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}

fn parse_channel_list(raw: Option<&str>) -> Result<Vec<Id<ChannelMarker>>, ManagerError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .ok()
                .and_then(Id::new_checked)
                .ok_or_else(|| {
                    ManagerError::Config(format!(
                        "BUILD_NOTIFICATION_CHANNELS contains an invalid channel id: {s}"
                    ))
                })
        })
        .collect()
}
