//! `/format-validator` admin command
//!
//! Maps `enable`, `disable` and `status` onto the rule store and produces the
//! reply text shown to the invoking moderator.

use super::rules::ModerationRules;
use twilight_model::application::command::{
    Command, CommandOption, CommandOptionChoice, CommandOptionChoiceValue, CommandOptionType,
    CommandType,
};
use twilight_model::guild::Permissions;
use twilight_model::id::{
    marker::{ChannelMarker, GuildMarker},
    Id,
};

/// Slash command name
pub const COMMAND_NAME: &str = "format-validator";

/// Option names carried by the slash command
pub mod options {
    pub const COMMAND: &str = "command";
    pub const PATTERN: &str = "pattern";
    pub const ERROR_MESSAGE: &str = "error_message";
}

/// Values of the `command` option
pub const SUBCOMMANDS: [&str; 3] = ["enable", "disable", "status"];

/// Shown when a pattern is rejected
const DIALECT_HINT: &str =
    "Patterns use Rust regex syntax: lookaround and backreferences are not supported.";

/// Global slash command definition, registered once per process
///
/// Only members with Manage Channels see the command by default.
pub fn definition() -> Command {
    let string_option = |name: &str, description: &str, required: bool| CommandOption {
        autocomplete: None,
        channel_types: None,
        choices: None,
        description: description.to_string(),
        description_localizations: None,
        kind: CommandOptionType::String,
        max_length: None,
        max_value: None,
        min_length: None,
        min_value: None,
        name: name.to_string(),
        name_localizations: None,
        options: None,
        required: Some(required),
    };

    let mut command = string_option(options::COMMAND, "Action to perform", true);
    command.choices = Some(
        SUBCOMMANDS
            .iter()
            .map(|&name| CommandOptionChoice {
                name: name.to_string(),
                name_localizations: None,
                value: CommandOptionChoiceValue::String(name.to_string()),
            })
            .collect(),
    );

    Command {
        application_id: None,
        contexts: None,
        default_member_permissions: Some(Permissions::MANAGE_CHANNELS),
        dm_permission: Some(false),
        description: "Validate the format of messages posted in this channel".to_string(),
        description_localizations: None,
        guild_id: None,
        id: None,
        integration_types: None,
        kind: CommandType::ChatInput,
        name: COMMAND_NAME.to_string(),
        name_localizations: None,
        nsfw: None,
        options: vec![
            command,
            string_option(
                options::PATTERN,
                "Regex every message must match (enable only)",
                false,
            ),
            string_option(
                options::ERROR_MESSAGE,
                "Message shown to authors of non-matching messages (enable only)",
                false,
            ),
        ],
        version: Id::new(1),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationCommand {
    Enable {
        pattern: Option<String>,
        error_message: Option<String>,
    },
    Disable,
    Status,
}

impl ModerationCommand {
    /// Build from raw option values; `None` for an unknown subcommand
    pub fn parse(
        command: &str,
        pattern: Option<String>,
        error_message: Option<String>,
    ) -> Option<Self> {
        match command {
            "enable" => Some(Self::Enable {
                pattern,
                error_message,
            }),
            "disable" => Some(Self::Disable),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

/// Where and by whom the command was invoked
#[derive(Debug, Clone, Copy)]
pub struct Invocation {
    pub guild_id: Option<Id<GuildMarker>>,
    pub channel_id: Option<Id<ChannelMarker>>,
    pub can_manage_channels: bool,
}

/// Execute the command and return the reply text
pub fn handle(
    rules: &ModerationRules,
    invocation: Invocation,
    command: Option<ModerationCommand>,
) -> String {
    let (Some(guild_id), Some(channel_id)) = (invocation.guild_id, invocation.channel_id) else {
        return "This command can only be used in server channels.".to_string();
    };

    if !invocation.can_manage_channels {
        return "You need the \"Manage Channels\" permission to use this command.".to_string();
    }

    let Some(command) = command else {
        return "Please specify a valid subcommand.".to_string();
    };

    match command {
        ModerationCommand::Enable {
            pattern,
            error_message,
        } => {
            let Some(pattern) = pattern.filter(|p| !p.is_empty()) else {
                return "You must provide a regex pattern for message validation.".to_string();
            };
            let Some(error_message) = error_message.filter(|m| !m.trim().is_empty()) else {
                return "You must provide an error message to display when messages don't match the pattern.".to_string();
            };

            match rules.set_rule(guild_id, channel_id, &pattern, &error_message) {
                Ok(rule) => format!(
                    "✅ Message format validation enabled for this channel.\nPattern: `{}`\nError message: {}",
                    rule.pattern.as_str(),
                    rule.error_message
                ),
                Err(e) => format!("Invalid regex pattern: {e}\n{DIALECT_HINT}"),
            }
        }
        ModerationCommand::Disable => {
            if rules.disable_rule(guild_id, channel_id) {
                "✅ Message format validation disabled for this channel.".to_string()
            } else {
                "ℹ️ Message format validation was not enabled for this channel.".to_string()
            }
        }
        ModerationCommand::Status => match rules.active_rule(guild_id, channel_id) {
            Some(rule) => format!(
                "✅ Message format validation is **enabled** for this channel.\nPattern: `{}`\nError message: {}",
                rule.pattern.as_str(),
                rule.error_message
            ),
            None => "ℹ️ Message format validation is **not enabled** for this channel.".to_string(),
        },
    }
}
