//! Channel message-format moderation
//!
//! - `rules`: the per-channel rule store
//! - `engine`: message evaluation and notice lifecycle
//! - `command`: the admin slash command surface

pub mod command;
mod engine;
mod rules;

pub use engine::{
    notice_content, InboundMessage, ModerationEngine, NoticeSink, Verdict, NOTICE_TTL,
};
pub use rules::{ChannelKey, ModerationRule, ModerationRules};
