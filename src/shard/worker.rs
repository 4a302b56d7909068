//! Twilight-backed worker
//!
//! Each worker owns one Discord shard, answers fleet commands from its queue
//! and feeds guild messages into the moderation engine.

use crate::error::ManagerError;
use crate::moderation::command::{self, Invocation, ModerationCommand};
use crate::moderation::{InboundMessage, ModerationEngine};
use crate::shard::fleet::{WorkerEvent, WorkerEventKind, WorkerLauncher};
use crate::shard::link::{Presence, WorkerCommand, WorkerLink};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use twilight_gateway::{Config, EventTypeFlags, Intents, MessageSender, Shard, StreamExt as _};
use twilight_model::application::interaction::application_command::CommandOptionValue;
use twilight_model::application::interaction::{Interaction, InteractionData};
use twilight_model::gateway::event::Event;
use twilight_model::gateway::payload::incoming::GuildCreate;
use twilight_model::gateway::payload::outgoing::UpdatePresence;
use twilight_model::gateway::presence::{Activity, MinimalActivity, Status};
use twilight_model::gateway::ShardId;
use twilight_model::guild::Permissions;
use twilight_model::http::interaction::{
    InteractionResponse, InteractionResponseData, InteractionResponseType,
};
use twilight_model::id::{
    marker::{ApplicationMarker, ChannelMarker, GuildMarker},
    Id,
};

/// Consecutive receive errors before the worker gives up
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Shard that registers the global slash commands
const COMMAND_REGISTRAR_SHARD: u32 = 0;

/// Guilds served by a shard and the channels each of them contains
#[derive(Debug, Default)]
struct Membership {
    guilds: HashMap<Id<GuildMarker>, HashSet<Id<ChannelMarker>>>,
}

impl Membership {
    /// Replace the guild set, keeping known channels of guilds still present
    fn reset(&mut self, guild_ids: impl IntoIterator<Item = Id<GuildMarker>>) {
        let mut guilds = HashMap::new();
        for guild_id in guild_ids {
            let channels = self.guilds.remove(&guild_id).unwrap_or_default();
            guilds.insert(guild_id, channels);
        }
        self.guilds = guilds;
    }

    fn join(
        &mut self,
        guild_id: Id<GuildMarker>,
        channels: impl IntoIterator<Item = Id<ChannelMarker>>,
    ) {
        self.guilds.entry(guild_id).or_default().extend(channels);
    }

    /// Forget a guild together with all of its channels
    fn leave(&mut self, guild_id: Id<GuildMarker>) {
        self.guilds.remove(&guild_id);
    }

    fn add_channel(&mut self, guild_id: Id<GuildMarker>, channel_id: Id<ChannelMarker>) {
        if let Some(channels) = self.guilds.get_mut(&guild_id) {
            channels.insert(channel_id);
        }
    }

    fn remove_channel(&mut self, channel_id: Id<ChannelMarker>) {
        for channels in self.guilds.values_mut() {
            channels.remove(&channel_id);
        }
    }

    fn guild_ids(&self) -> Vec<Id<GuildMarker>> {
        self.guilds.keys().copied().collect()
    }

    fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    fn owns_channel(&self, channel_id: Id<ChannelMarker>) -> bool {
        self.guilds.values().any(|c| c.contains(&channel_id))
    }
}

/// Launches twilight shards as tokio tasks
pub struct TwilightLauncher {
    token: String,
    intents: Intents,
    http: Arc<twilight_http::Client>,
    engine: Arc<ModerationEngine>,
    call_timeout: Duration,
}

impl TwilightLauncher {
    pub fn new(
        token: String,
        intents: Intents,
        http: Arc<twilight_http::Client>,
        engine: Arc<ModerationEngine>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            token,
            intents,
            http,
            engine,
            call_timeout,
        }
    }
}

#[async_trait]
impl WorkerLauncher for TwilightLauncher {
    async fn launch(
        &self,
        shard_id: u32,
        total_shards: u32,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<WorkerLink, ManagerError> {
        let id = ShardId::new_checked(shard_id, total_shards).ok_or(
            ManagerError::ShardOutOfRange {
                shard_id,
                total_shards,
            },
        )?;

        let config = Config::new(self.token.clone(), self.intents);
        let shard = Shard::with_config(id, config);
        let (link, commands) = WorkerLink::channel(shard_id, self.call_timeout);

        let worker = Worker {
            shard_id,
            http: Arc::clone(&self.http),
            engine: Arc::clone(&self.engine),
            events: events.clone(),
            membership: Membership::default(),
            ready_at: None,
            application_id: None,
        };

        tokio::spawn(worker.run(shard, commands));

        let _ = events.send(WorkerEvent::new(shard_id, WorkerEventKind::Created));
        Ok(link)
    }
}

/// Per-shard state, owned by the worker task
struct Worker {
    shard_id: u32,
    http: Arc<twilight_http::Client>,
    engine: Arc<ModerationEngine>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    membership: Membership,
    ready_at: Option<Instant>,
    application_id: Option<Id<ApplicationMarker>>,
}

impl Worker {
    /// Run the shard's event loop until the stream ends, the fleet drops the
    /// link or too many consecutive errors occur
    async fn run(mut self, mut shard: Shard, mut commands: mpsc::Receiver<WorkerCommand>) {
        let shard_id = self.shard_id;
        let sender = shard.sender();
        let mut consecutive_errors: u32 = 0;

        info!(shard_id, "Shard starting");

        loop {
            tokio::select! {
                item = shard.next_event(EventTypeFlags::all()) => {
                    let Some(item) = item else {
                        info!(shard_id, "Shard event stream ended");
                        break;
                    };

                    match item {
                        Ok(event) => {
                            consecutive_errors = 0;
                            self.handle_event(event);
                        }
                        Err(source) => {
                            consecutive_errors += 1;
                            warn!(shard_id, error = %source, consecutive = consecutive_errors, "Error receiving event");
                            self.emit(WorkerEventKind::Errored(source.to_string()));

                            if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                                error!(shard_id, consecutive = consecutive_errors, "Shard dead: consecutive error threshold exceeded");
                                break;
                            }
                        }
                    }
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        info!(shard_id, "Worker link dropped, stopping shard");
                        break;
                    };
                    self.handle_command(command, &sender);
                }
            }
        }

        self.emit(WorkerEventKind::Terminated);
    }

    fn emit(&self, kind: WorkerEventKind) {
        let _ = self.events.send(WorkerEvent::new(self.shard_id, kind));
    }

    fn handle_event(&mut self, event: Event) {
        let shard_id = self.shard_id;

        match event {
            Event::Ready(ready) => {
                self.membership.reset(ready.guilds.iter().map(|g| g.id));
                self.application_id = Some(ready.application.id);
                if self.ready_at.is_none() {
                    self.ready_at = Some(Instant::now());
                    self.emit(WorkerEventKind::Ready);
                    if shard_id == COMMAND_REGISTRAR_SHARD {
                        self.register_commands(ready.application.id);
                    }
                }
                info!(shard_id, guilds = ready.guilds.len(), "Shard ready");
            }
            Event::Resumed => {
                info!(shard_id, "Shard resumed");
            }
            Event::GuildCreate(guild) => match *guild {
                GuildCreate::Available(guild) => {
                    self.membership
                        .join(guild.id, guild.channels.iter().map(|c| c.id));
                }
                GuildCreate::Unavailable(guild) => {
                    self.membership.join(guild.id, []);
                }
            },
            Event::GuildDelete(guild) => {
                if guild.unavailable != Some(true) {
                    self.membership.leave(guild.id);
                }
                debug!(shard_id, guild_id = %guild.id, "Guild left");
            }
            Event::ChannelCreate(channel) => {
                if let Some(guild_id) = channel.guild_id {
                    self.membership.add_channel(guild_id, channel.id);
                }
            }
            Event::ChannelDelete(channel) => {
                self.membership.remove_channel(channel.id);
            }
            Event::MessageCreate(message) => {
                let inbound = InboundMessage::from(&message.0);
                let engine = Arc::clone(&self.engine);
                tokio::spawn(async move {
                    engine.evaluate(&inbound).await;
                });
            }
            Event::MessageDelete(deleted) => {
                self.engine.forget_notice(deleted.id);
            }
            Event::InteractionCreate(interaction) => {
                self.handle_interaction(interaction.0);
            }
            _ => {}
        }
    }

    fn handle_command(&self, command: WorkerCommand, sender: &MessageSender) {
        match command {
            WorkerCommand::GuildIds { reply } => {
                let _ = reply.send(self.membership.guild_ids());
            }
            WorkerCommand::Uptime { reply } => {
                let _ = reply.send(self.ready_at.map(|t| t.elapsed()).unwrap_or_default());
            }
            WorkerCommand::SetPresence { presence, reply } => {
                let _ = reply.send(apply_presence(sender, presence));
            }
            WorkerCommand::Announce {
                channel_id,
                content,
                reply,
            } => {
                if !self.membership.owns_channel(channel_id) {
                    let _ = reply.send(Ok(false));
                    return;
                }

                let http = Arc::clone(&self.http);
                tokio::spawn(async move {
                    let result = http
                        .create_message(channel_id)
                        .content(&content)
                        .await
                        .map(|_| true)
                        .map_err(|e| e.to_string());
                    let _ = reply.send(result);
                });
            }
        }
    }

    /// Install the global slash commands (overwrites any previous set)
    fn register_commands(&self, application_id: Id<ApplicationMarker>) {
        let http = Arc::clone(&self.http);
        let shard_id = self.shard_id;
        tokio::spawn(async move {
            let commands = [command::definition()];
            match http
                .interaction(application_id)
                .set_global_commands(&commands)
                .await
            {
                Ok(_) => info!(shard_id, command = command::COMMAND_NAME, "Registered slash commands"),
                Err(e) => warn!(shard_id, error = %e, "Failed to register slash commands"),
            }
        });
    }

    fn handle_interaction(&self, interaction: Interaction) {
        let Some(InteractionData::ApplicationCommand(data)) = interaction.data.as_ref() else {
            return;
        };
        if data.name != command::COMMAND_NAME {
            return;
        }
        let Some(application_id) = self.application_id else {
            warn!(shard_id = self.shard_id, "Interaction received before ready");
            return;
        };

        let option = |name: &str| {
            data.options.iter().find_map(|o| match &o.value {
                CommandOptionValue::String(value) if o.name == name => Some(value.clone()),
                _ => None,
            })
        };

        let parsed = option(command::options::COMMAND).and_then(|c| {
            ModerationCommand::parse(
                &c,
                option(command::options::PATTERN),
                option(command::options::ERROR_MESSAGE),
            )
        });

        let invocation = Invocation {
            guild_id: interaction.guild_id,
            channel_id: interaction.channel.as_ref().map(|c| c.id),
            can_manage_channels: interaction
                .member
                .as_ref()
                .and_then(|m| m.permissions)
                .is_some_and(|p| p.contains(Permissions::MANAGE_CHANNELS)),
        };

        let reply = command::handle(self.engine.rules(), invocation, parsed);

        let response = InteractionResponse {
            kind: InteractionResponseType::ChannelMessageWithSource,
            data: Some(InteractionResponseData {
                content: Some(reply),
                ..Default::default()
            }),
        };

        let http = Arc::clone(&self.http);
        let shard_id = self.shard_id;
        tokio::spawn(async move {
            if let Err(e) = http
                .interaction(application_id)
                .create_response(interaction.id, &interaction.token, &response)
                .await
            {
                warn!(shard_id, error = %e, "Failed to answer format-validator command");
            }
        });
    }
}

fn apply_presence(sender: &MessageSender, presence: Presence) -> Result<(), String> {
    let activity = Activity::from(MinimalActivity {
        kind: presence.kind.into(),
        name: presence.name,
        url: presence.url,
    });

    let update = UpdatePresence::new(vec![activity], false, None, Status::Online)
        .map_err(|e| e.to_string())?;

    sender.command(&update).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD_A: Id<GuildMarker> = Id::new(1);
    const GUILD_B: Id<GuildMarker> = Id::new(2);

    #[test]
    fn test_leaving_a_guild_drops_its_channels() {
        let mut membership = Membership::default();
        membership.join(GUILD_A, [Id::new(10), Id::new(11)]);
        membership.join(GUILD_B, [Id::new(20)]);

        membership.leave(GUILD_A);

        assert!(!membership.owns_channel(Id::new(10)));
        assert!(!membership.owns_channel(Id::new(11)));
        assert!(membership.owns_channel(Id::new(20)));
        assert_eq!(membership.guild_ids(), vec![GUILD_B]);
    }

    #[test]
    fn test_reset_keeps_channels_of_remaining_guilds() {
        let mut membership = Membership::default();
        membership.join(GUILD_A, [Id::new(10)]);
        membership.join(GUILD_B, [Id::new(20)]);

        membership.reset([GUILD_B, Id::new(3)]);

        assert_eq!(membership.guild_count(), 2);
        assert!(!membership.owns_channel(Id::new(10)));
        assert!(membership.owns_channel(Id::new(20)));
    }

    #[test]
    fn test_channel_events_follow_their_guild() {
        let mut membership = Membership::default();
        membership.join(GUILD_A, []);

        membership.add_channel(GUILD_A, Id::new(10));
        // Channels of unknown guilds are ignored
        membership.add_channel(GUILD_B, Id::new(20));
        assert!(membership.owns_channel(Id::new(10)));
        assert!(!membership.owns_channel(Id::new(20)));

        membership.remove_channel(Id::new(10));
        assert!(!membership.owns_channel(Id::new(10)));
        assert_eq!(membership.guild_ids(), vec![GUILD_A]);
    }
}
