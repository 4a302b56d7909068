//! Per-channel format rules
//!
//! Rules are keyed by `(guild, channel)` and are never deleted: disabling keeps
//! the pattern and message so status queries still see them.

use crate::error::ManagerError;
use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;
use twilight_model::id::{
    marker::{ChannelMarker, GuildMarker},
    Id,
};

pub type ChannelKey = (Id<GuildMarker>, Id<ChannelMarker>);

/// Message format policy for one channel
#[derive(Debug, Clone)]
pub struct ModerationRule {
    pub guild_id: Id<GuildMarker>,
    pub channel_id: Id<ChannelMarker>,
    pub pattern: Regex,
    pub error_message: String,
    pub enabled: bool,
}

impl ModerationRule {
    /// Unanchored search, same as a plain regex test
    pub fn accepts(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// Shared rule store, one instance per process
#[derive(Debug, Clone, Default)]
pub struct ModerationRules {
    rules: Arc<DashMap<ChannelKey, ModerationRule>>,
}

impl ModerationRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or fully overwrite the channel's rule, enabled
    ///
    /// Nothing is stored when the pattern does not compile or the message is empty.
    /// Patterns follow the `regex` crate dialect, which has no lookaround and no
    /// backreferences.
    pub fn set_rule(
        &self,
        guild_id: Id<GuildMarker>,
        channel_id: Id<ChannelMarker>,
        pattern: &str,
        error_message: &str,
    ) -> Result<ModerationRule, ManagerError> {
        let compiled = Regex::new(pattern).map_err(|source| ManagerError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let error_message = error_message.trim();
        if error_message.is_empty() {
            return Err(ManagerError::Validation {
                field: "error_message",
                reason: "must not be empty".to_string(),
            });
        }

        let rule = ModerationRule {
            guild_id,
            channel_id,
            pattern: compiled,
            error_message: error_message.to_string(),
            enabled: true,
        };

        self.rules.insert((guild_id, channel_id), rule.clone());
        Ok(rule)
    }

    /// Disable the channel's rule; returns whether a rule existed
    pub fn disable_rule(&self, guild_id: Id<GuildMarker>, channel_id: Id<ChannelMarker>) -> bool {
        match self.rules.get_mut(&(guild_id, channel_id)) {
            Some(mut rule) => {
                rule.enabled = false;
                true
            }
            None => false,
        }
    }

    pub fn get_rule(
        &self,
        guild_id: Id<GuildMarker>,
        channel_id: Id<ChannelMarker>,
    ) -> Option<ModerationRule> {
        self.rules.get(&(guild_id, channel_id)).map(|r| r.clone())
    }

    /// The channel's rule if it is enabled
    pub fn active_rule(
        &self,
        guild_id: Id<GuildMarker>,
        channel_id: Id<ChannelMarker>,
    ) -> Option<ModerationRule> {
        self.rules
            .get(&(guild_id, channel_id))
            .filter(|r| r.enabled)
            .map(|r| r.clone())
    }

    pub fn active_rules(&self) -> Vec<ModerationRule> {
        self.rules
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
