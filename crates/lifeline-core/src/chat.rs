//! Emergency chat: membership, messages, location sharing.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use lifeline_shared::constants::JOINED_SUFFIX;
use lifeline_shared::identity::Profile;
use lifeline_shared::models::{Chat, Location, Message, MessageKind, NewMessage};
use lifeline_shared::types::ChatId;

use crate::engine::EngineContext;
use crate::error::{EngineError, NotFoundExt, Result};
use crate::location::LocationService;
use crate::subscriptions::ChatFeed;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JoinOutcome {
    Joined {
        chat: Chat,
        /// `true` on the caller's first admission; the join notice was posted.
        first_join: bool,
    },
    /// The chat is closed; membership is unchanged.
    ChatEnded { chat: Chat },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    Sent { message: Message },
    /// Nothing was written.
    ChatEnded,
}

pub struct ChatCoordinator {
    ctx: EngineContext,
    location: Arc<LocationService>,
    profile: Arc<Profile>,
}

impl ChatCoordinator {
    pub fn new(ctx: EngineContext, location: Arc<LocationService>, profile: Arc<Profile>) -> Self {
        Self {
            ctx,
            location,
            profile,
        }
    }

    fn identity(&self) -> Result<&Profile> {
        if self.profile.uid.is_empty() {
            return Err(EngineError::NoIdentity);
        }
        Ok(&self.profile)
    }

    async fn chat(&self, id: ChatId) -> Result<Chat> {
        self.ctx.store.get_chat(id).await.or_not_found("chat")
    }

    /// Enter a chat. Pre-authorized helpers and newcomers alike are admitted;
    /// the join notice is posted once per member.
    pub async fn join(&self, chat_id: ChatId) -> Result<JoinOutcome> {
        let profile = self.identity()?;
        let chat = self.chat(chat_id).await?;
        if !chat.is_active {
            return Ok(JoinOutcome::ChatEnded { chat });
        }

        let first_join = self
            .ctx
            .store
            .join_participant(chat_id, &profile.uid, self.ctx.clock.now())
            .await?;
        if first_join {
            self.ctx
                .store
                .append_message(
                    &NewMessage::system(chat_id, format!("{} {}", profile.name(), JOINED_SUFFIX)),
                    self.ctx.clock.now(),
                )
                .await?;
            info!(user = %profile.uid.short(), chat = %chat_id, "Joined chat");
        }

        Ok(JoinOutcome::Joined {
            chat: self.chat(chat_id).await?,
            first_join,
        })
    }

    /// Post a message. `kind` must be text or location.
    pub async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        kind: MessageKind,
    ) -> Result<SendOutcome> {
        self.post(chat_id, text, kind, None).await
    }

    /// Share the caller's current position in the chat.
    pub async fn send_location(&self, chat_id: ChatId) -> Result<SendOutcome> {
        let here = self.location.fetch().await?;
        let text = format!("Shared location: {:.5}, {:.5}", here.latitude, here.longitude);
        self.post(chat_id, &text, MessageKind::Location, Some(here))
            .await
    }

    async fn post(
        &self,
        chat_id: ChatId,
        text: &str,
        kind: MessageKind,
        location: Option<Location>,
    ) -> Result<SendOutcome> {
        let profile = self.identity()?;
        if kind == MessageKind::System {
            return Err(EngineError::ReservedKind);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::EmptyMessage);
        }
        let text = truncate_chars(text, self.ctx.config.max_message_chars);

        let chat = self.chat(chat_id).await?;
        if !chat.is_active {
            debug!("Send to ended chat {} dropped", chat_id);
            return Ok(SendOutcome::ChatEnded);
        }
        let now = self.ctx.clock.now();
        if !chat.is_participant(&profile.uid) {
            self.ctx
                .store
                .add_participant(chat_id, &profile.uid, now)
                .await?;
        }

        let message = self
            .ctx
            .store
            .append_message(
                &NewMessage {
                    chat_id,
                    sender_id: profile.uid.clone(),
                    sender_name: profile.name(),
                    text: text.to_string(),
                    kind,
                    location,
                },
                now,
            )
            .await?;
        Ok(SendOutcome::Sent { message })
    }

    /// Full transcript, ordered by `(sent_at, seq)`. Participants only.
    pub async fn messages(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        let profile = self.identity()?;
        let chat = self.chat(chat_id).await?;
        if !chat.is_participant(&profile.uid) {
            return Err(EngineError::NotParticipant);
        }
        Ok(self.ctx.store.messages_for_chat(chat_id).await?)
    }

    /// Live feed of the chat. Participants only.
    pub async fn watch(&self, chat_id: ChatId) -> Result<ChatFeed> {
        let profile = self.identity()?;
        let chat = self.chat(chat_id).await?;
        if !chat.is_participant(&profile.uid) {
            return Err(EngineError::NotParticipant);
        }
        Ok(ChatFeed::new(self.ctx.store.clone(), chat_id))
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
