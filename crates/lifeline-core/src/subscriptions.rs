//! Live queries over the store's change feed.
//!
//! Each handle owns a broadcast receiver. It wakes on changes relevant to its
//! query and re-reads from the store, so a lagging subscriber simply resyncs
//! instead of replaying missed events.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use lifeline_shared::models::{DeliveryStatus, Emergency, HelperAlert, Message};
use lifeline_shared::types::{ChatId, UserId};
use lifeline_store::{DocumentStore, StoreChange};

use crate::error::{EngineError, Result};

/// Wait for the next change accepted by `relevant`. A lag counts as a change.
async fn next_relevant(
    feed: &mut broadcast::Receiver<StoreChange>,
    relevant: impl Fn(&StoreChange) -> bool,
) -> Result<()> {
    loop {
        match feed.recv().await {
            Ok(change) if relevant(&change) => return Ok(()),
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                debug!("Subscriber lagged by {} change(s); resyncing", skipped);
                return Ok(());
            }
            Err(RecvError::Closed) => return Err(EngineError::FeedClosed),
        }
    }
}

/// The victim's authoritative open emergency.
pub struct ActiveEmergencyWatch {
    store: Arc<dyn DocumentStore>,
    victim_id: UserId,
    feed: broadcast::Receiver<StoreChange>,
}

impl ActiveEmergencyWatch {
    pub fn new(store: Arc<dyn DocumentStore>, victim_id: UserId) -> Self {
        let feed = store.changes();
        Self {
            store,
            victim_id,
            feed,
        }
    }

    /// Most recently created open emergency, if any.
    pub async fn current(&self) -> Result<Option<Emergency>> {
        let open = self.store.open_emergencies_for(&self.victim_id).await?;
        Ok(open.into_iter().next())
    }

    /// Wait for the victim's emergencies to change, then return the new view.
    pub async fn changed(&mut self) -> Result<Option<Emergency>> {
        let victim = self.victim_id.clone();
        next_relevant(&mut self.feed, |c| {
            matches!(c, StoreChange::Emergency { victim_id, .. } if *victim_id == victim)
        })
        .await?;
        self.current().await
    }
}

/// New messages of one chat, plus its open/closed state.
pub struct ChatFeed {
    store: Arc<dyn DocumentStore>,
    chat_id: ChatId,
    feed: broadcast::Receiver<StoreChange>,
    last_seq: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatUpdate {
    pub messages: Vec<Message>,
    pub is_active: bool,
}

impl ChatFeed {
    pub fn new(store: Arc<dyn DocumentStore>, chat_id: ChatId) -> Self {
        let feed = store.changes();
        Self {
            store,
            chat_id,
            feed,
            last_seq: 0,
        }
    }

    /// Everything not yet seen, without waiting.
    pub async fn poll(&mut self) -> Result<ChatUpdate> {
        let messages = self.store.messages_since(self.chat_id, self.last_seq).await?;
        if let Some(last) = messages.last() {
            self.last_seq = last.seq;
        }
        let is_active = self.store.get_chat(self.chat_id).await?.is_active;
        Ok(ChatUpdate {
            messages,
            is_active,
        })
    }

    /// Wait for the chat to change, then return what is new.
    pub async fn next(&mut self) -> Result<ChatUpdate> {
        let id = self.chat_id;
        next_relevant(&mut self.feed, |c| match c {
            StoreChange::Message { chat_id, .. } => *chat_id == id,
            StoreChange::Chat { id: changed } => *changed == id,
            _ => false,
        })
        .await?;
        self.poll().await
    }
}

/// Pending alerts addressed to one helper.
pub struct AlertInbox {
    store: Arc<dyn DocumentStore>,
    helper_id: UserId,
    feed: broadcast::Receiver<StoreChange>,
}

impl AlertInbox {
    pub fn new(store: Arc<dyn DocumentStore>, helper_id: UserId) -> Self {
        let feed = store.changes();
        Self {
            store,
            helper_id,
            feed,
        }
    }

    pub async fn pending(&self) -> Result<Vec<HelperAlert>> {
        Ok(self
            .store
            .alerts_for_helper(&self.helper_id, DeliveryStatus::Pending)
            .await?)
    }

    pub async fn changed(&mut self) -> Result<Vec<HelperAlert>> {
        let me = self.helper_id.clone();
        next_relevant(&mut self.feed, |c| {
            matches!(c, StoreChange::Alert { helper_id, .. } if *helper_id == me)
        })
        .await?;
        self.pending().await
    }
}
