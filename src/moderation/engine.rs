//! Message evaluation against channel rules
//!
//! A mismatching message gets a notice mentioning its author; the notice is
//! removed after [`NOTICE_TTL`]. Notices are advisory: delivery and removal
//! failures are logged and dropped.

use super::rules::{ModerationRule, ModerationRules};
use crate::error::ManagerError;
use crate::metrics::ManagerMetrics;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use twilight_model::channel::Message;
use twilight_model::id::{
    marker::{ChannelMarker, GuildMarker, MessageMarker, UserMarker},
    Id,
};

/// How long a notice stays in the channel
pub const NOTICE_TTL: Duration = Duration::from_secs(30);

/// Where notices are posted (Discord REST in production)
#[async_trait]
pub trait NoticeSink: Send + Sync {
    async fn send_notice(
        &self,
        channel_id: Id<ChannelMarker>,
        content: &str,
    ) -> Result<Id<MessageMarker>, ManagerError>;

    async fn delete_notice(
        &self,
        channel_id: Id<ChannelMarker>,
        message_id: Id<MessageMarker>,
    ) -> Result<(), ManagerError>;
}

#[async_trait]
impl NoticeSink for twilight_http::Client {
    async fn send_notice(
        &self,
        channel_id: Id<ChannelMarker>,
        content: &str,
    ) -> Result<Id<MessageMarker>, ManagerError> {
        let message = self
            .create_message(channel_id)
            .content(content)
            .await
            .map_err(|e| ManagerError::Delivery(Box::new(e)))?
            .model()
            .await
            .map_err(|e| ManagerError::Delivery(Box::new(e)))?;

        Ok(message.id)
    }

    async fn delete_notice(
        &self,
        channel_id: Id<ChannelMarker>,
        message_id: Id<MessageMarker>,
    ) -> Result<(), ManagerError> {
        self.delete_message(channel_id, message_id)
            .await
            .map_err(|e| ManagerError::Delivery(Box::new(e)))?;
        Ok(())
    }
}

/// The parts of a guild message the engine looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: Id<MessageMarker>,
    pub guild_id: Option<Id<GuildMarker>>,
    pub channel_id: Id<ChannelMarker>,
    pub author_id: Id<UserMarker>,
    pub author_is_bot: bool,
    pub content: String,
}

impl From<&Message> for InboundMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            guild_id: message.guild_id,
            channel_id: message.channel_id,
            author_id: message.author.id,
            author_is_bot: message.author.bot,
            content: message.content.clone(),
        }
    }
}

/// Outcome of evaluating one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No enabled rule applies (or the author is a bot, or not in a guild)
    Unmoderated,
    /// The message matches the channel's pattern
    Accepted,
    /// The message does not match; `notice` is the posted notice, if delivery worked
    Rejected { notice: Option<Id<MessageMarker>> },
}

/// Evaluates messages and owns pending notice removals
pub struct ModerationEngine {
    rules: ModerationRules,
    sink: Arc<dyn NoticeSink>,
    notice_ttl: Duration,
    pending: Arc<DashMap<Id<MessageMarker>, AbortHandle>>,
    metrics: Arc<ManagerMetrics>,
}

impl ModerationEngine {
    pub fn new(
        rules: ModerationRules,
        sink: Arc<dyn NoticeSink>,
        metrics: Arc<ManagerMetrics>,
    ) -> Self {
        Self {
            rules,
            sink,
            notice_ttl: NOTICE_TTL,
            pending: Arc::new(DashMap::new()),
            metrics,
        }
    }

    pub fn with_notice_ttl(mut self, ttl: Duration) -> Self {
        self.notice_ttl = ttl;
        self
    }

    pub fn rules(&self) -> &ModerationRules {
        &self.rules
    }

    /// Check a message against its channel's rule
    pub async fn evaluate(&self, message: &InboundMessage) -> Verdict {
        if message.author_is_bot {
            return Verdict::Unmoderated;
        }
        let Some(guild_id) = message.guild_id else {
            return Verdict::Unmoderated;
        };
        let Some(rule) = self.rules.active_rule(guild_id, message.channel_id) else {
            return Verdict::Unmoderated;
        };

        if rule.accepts(&message.content) {
            return Verdict::Accepted;
        }

        debug!(
            guild_id = %guild_id,
            channel_id = %message.channel_id,
            message_id = %message.id,
            "Message does not match channel format"
        );

        let notice = self.notify(message, &rule).await;
        Verdict::Rejected { notice }
    }

    async fn notify(&self, message: &InboundMessage, rule: &ModerationRule) -> Option<Id<MessageMarker>> {
        let content = notice_content(message.author_id, &rule.error_message);

        match self.sink.send_notice(message.channel_id, &content).await {
            Ok(notice_id) => {
                self.metrics.record_notice("sent");
                self.schedule_removal(message.channel_id, notice_id);
                Some(notice_id)
            }
            Err(e) => {
                warn!(
                    channel_id = %message.channel_id,
                    error = %e,
                    "Failed to send format notice"
                );
                self.metrics.record_notice("failed");
                None
            }
        }
    }

    fn schedule_removal(&self, channel_id: Id<ChannelMarker>, notice_id: Id<MessageMarker>) {
        // The slot stays locked until the handle is stored, so the task's own
        // cleanup cannot run ahead of the insert.
        let Entry::Vacant(slot) = self.pending.entry(notice_id) else {
            return;
        };

        let sink = Arc::clone(&self.sink);
        let pending = Arc::clone(&self.pending);
        let ttl = self.notice_ttl;

        let task = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Err(e) = sink.delete_notice(channel_id, notice_id).await {
                debug!(notice_id = %notice_id, error = %e, "Notice already gone");
            }
            pending.remove(&notice_id);
        });

        slot.insert(task.abort_handle());
    }

    /// Cancel the removal timer of a notice deleted by other means
    pub fn forget_notice(&self, notice_id: Id<MessageMarker>) -> bool {
        match self.pending.remove(&notice_id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Number of notices waiting for removal
    pub fn pending_notices(&self) -> usize {
        self.pending.len()
    }
}

/// Notice text: author mention followed by the rule's message
pub fn notice_content(author_id: Id<UserMarker>, error_message: &str) -> String {
    format!("<@{author_id}>, {error_message}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    const GUILD: Id<GuildMarker> = Id::new(1);
    const CHANNEL: Id<ChannelMarker> = Id::new(10);
    const AUTHOR: Id<UserMarker> = Id::new(500);

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(Id<ChannelMarker>, String)>>,
        deleted: Mutex<Vec<Id<MessageMarker>>>,
        next_id: AtomicU64,
        fail_send: bool,
    }

    #[async_trait]
    impl NoticeSink for RecordingSink {
        async fn send_notice(
            &self,
            channel_id: Id<ChannelMarker>,
            content: &str,
        ) -> Result<Id<MessageMarker>, ManagerError> {
            if self.fail_send {
                return Err(ManagerError::Delivery("missing permissions".into()));
            }
            self.sent.lock().unwrap().push((channel_id, content.to_string()));
            Ok(Id::new(1000 + self.next_id.fetch_add(1, Ordering::SeqCst)))
        }

        async fn delete_notice(
            &self,
            _channel_id: Id<ChannelMarker>,
            message_id: Id<MessageMarker>,
        ) -> Result<(), ManagerError> {
            self.deleted.lock().unwrap().push(message_id);
            Ok(())
        }
    }

    fn engine(sink: Arc<RecordingSink>) -> ModerationEngine {
        ModerationEngine::new(
            ModerationRules::new(),
            sink,
            Arc::new(ManagerMetrics::disabled()),
        )
    }

    fn message(content: &str) -> InboundMessage {
        InboundMessage {
            id: Id::new(77),
            guild_id: Some(GUILD),
            channel_id: CHANNEL,
            author_id: AUTHOR,
            author_is_bot: false,
            content: content.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatch_sends_notice_and_removes_it_after_ttl() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(Arc::clone(&sink));
        engine.rules().set_rule(GUILD, CHANNEL, r"^\d+$", "Numbers only").unwrap();

        let verdict = engine.evaluate(&message("abc")).await;
        let Verdict::Rejected { notice: Some(notice_id) } = verdict else {
            panic!("expected a notice, got {verdict:?}");
        };

        {
            let sent = sink.sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].0, CHANNEL);
            assert_eq!(sent[0].1, "<@500>, Numbers only");
        }
        assert_eq!(engine.pending_notices(), 1);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(sink.deleted.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*sink.deleted.lock().unwrap(), vec![notice_id]);
        assert_eq!(engine.pending_notices(), 0);
    }

    #[tokio::test]
    async fn test_match_produces_no_notice() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(Arc::clone(&sink));
        engine.rules().set_rule(GUILD, CHANNEL, r"^\d+$", "Numbers only").unwrap();

        assert_eq!(engine.evaluate(&message("12345")).await, Verdict::Accepted);
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_rule_and_bots_are_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(Arc::clone(&sink));
        engine.rules().set_rule(GUILD, CHANNEL, r"^\d+$", "Numbers only").unwrap();

        let mut bot = message("abc");
        bot.author_is_bot = true;
        assert_eq!(engine.evaluate(&bot).await, Verdict::Unmoderated);

        let mut direct = message("abc");
        direct.guild_id = None;
        assert_eq!(engine.evaluate(&direct).await, Verdict::Unmoderated);

        engine.rules().disable_rule(GUILD, CHANNEL);
        assert_eq!(engine.evaluate(&message("abc")).await, Verdict::Unmoderated);
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let sink = Arc::new(RecordingSink { fail_send: true, ..Default::default() });
        let engine = engine(Arc::clone(&sink));
        engine.rules().set_rule(GUILD, CHANNEL, "x", "must contain x").unwrap();

        assert_eq!(
            engine.evaluate(&message("abc")).await,
            Verdict::Rejected { notice: None }
        );
        assert_eq!(engine.pending_notices(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_notice_cancels_timer() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(Arc::clone(&sink));
        engine.rules().set_rule(GUILD, CHANNEL, "x", "must contain x").unwrap();

        let Verdict::Rejected { notice: Some(notice_id) } = engine.evaluate(&message("abc")).await
        else {
            panic!("expected a notice");
        };

        assert!(engine.forget_notice(notice_id));
        assert!(!engine.forget_notice(notice_id));

        tokio::time::sleep(NOTICE_TTL * 2).await;
        assert!(sink.deleted.lock().unwrap().is_empty());
    }
}
