//! Async document store seam and live change feed.
//!
//! The engine only talks to [`DocumentStore`]. Every successful write
//! publishes a [`StoreChange`] on a broadcast channel; live queries subscribe
//! to that feed and re-read the documents they care about.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use lifeline_shared::models::{
    Chat, Closure, DeliveryStatus, Emergency, EmergencyContact, EmergencyStatus, HelperAlert,
    Message, NewMessage, UserPresence,
};
use lifeline_shared::types::{AlertId, ChatId, ContactId, EmergencyId, UserId};

use crate::chats::Admission;
use crate::database::Database;
use crate::error::{Result, StoreError};

/// Capacity of the change feed; slow subscribers observe `Lagged` and resync.
const CHANGE_FEED_CAPACITY: usize = 256;

/// A document changed.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    Emergency { id: EmergencyId, victim_id: UserId },
    Chat { id: ChatId },
    Message { chat_id: ChatId, seq: i64 },
    Alert { id: AlertId, helper_id: UserId },
    Presence { user_id: UserId },
    Contacts { owner_id: UserId },
}

/// Persistent store as seen by the engine.
///
/// Writes are individually atomic; there are no multi-document transactions.
/// Membership updates are additive unions and closing transitions are
/// conditional so that concurrent writers cannot lose updates. Timestamps
/// are passed in by the caller, so the store and the engine share one clock.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // -- presence --
    async fn upsert_presence(&self, presence: &UserPresence) -> Result<()>;
    async fn get_presence(&self, user_id: &UserId) -> Result<UserPresence>;
    async fn list_located_presence(&self) -> Result<Vec<UserPresence>>;

    // -- contacts --
    async fn insert_contact(&self, contact: &EmergencyContact) -> Result<()>;
    async fn get_contact(&self, id: ContactId) -> Result<EmergencyContact>;
    async fn list_contacts(&self, owner_id: &UserId) -> Result<Vec<EmergencyContact>>;
    async fn set_primary_contact(&self, owner_id: &UserId, id: ContactId) -> Result<()>;
    async fn delete_contact(&self, owner_id: &UserId, id: ContactId) -> Result<bool>;

    // -- emergencies --
    async fn insert_emergency(&self, emergency: &Emergency) -> Result<()>;
    async fn get_emergency(&self, id: EmergencyId) -> Result<Emergency>;
    async fn set_emergency_chat(&self, id: EmergencyId, chat_id: ChatId) -> Result<()>;
    /// Returns `true` if this call performed the transition.
    async fn transition_emergency(&self, id: EmergencyId, status: EmergencyStatus)
        -> Result<bool>;
    async fn open_emergencies_for(&self, victim_id: &UserId) -> Result<Vec<Emergency>>;
    async fn emergency_history(&self, victim_id: &UserId) -> Result<Vec<Emergency>>;

    // -- chats --
    async fn insert_chat(&self, chat: &Chat) -> Result<()>;
    async fn get_chat(&self, id: ChatId) -> Result<Chat>;
    async fn add_participant(
        &self,
        id: ChatId,
        user: &UserId,
        at: DateTime<Utc>,
    ) -> Result<Admission>;
    /// Returns `true` only for the first recorded join of `user`.
    async fn join_participant(
        &self,
        id: ChatId,
        user: &UserId,
        at: DateTime<Utc>,
    ) -> Result<bool>;
    /// Returns `true` if this call closed the chat.
    async fn close_chat(&self, id: ChatId, closure: Closure) -> Result<bool>;
    async fn expired_active_chats(&self, now: DateTime<Utc>) -> Result<Vec<Chat>>;

    // -- messages --
    /// Append with `sent_at = at` and the next sequence number.
    async fn append_message(&self, message: &NewMessage, at: DateTime<Utc>) -> Result<Message>;
    async fn messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>>;
    async fn messages_since(&self, chat_id: ChatId, after_seq: i64) -> Result<Vec<Message>>;

    // -- alerts --
    async fn insert_alert(&self, alert: &HelperAlert) -> Result<bool>;
    async fn get_alert(&self, id: AlertId) -> Result<HelperAlert>;
    async fn mark_alert_delivered(&self, id: AlertId) -> Result<bool>;
    async fn alerts_for_helper(
        &self,
        helper_id: &UserId,
        status: DeliveryStatus,
    ) -> Result<Vec<HelperAlert>>;

    /// Subscribe to the change feed.
    fn changes(&self) -> broadcast::Receiver<StoreChange>;
}

/// [`DocumentStore`] over a single SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
    changes: broadcast::Sender<StoreChange>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            db: Arc::new(Mutex::new(db)),
            changes,
        }
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn publish(&self, change: StoreChange) {
        // No receivers is fine: nobody is watching.
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn upsert_presence(&self, presence: &UserPresence) -> Result<()> {
        self.db()?.upsert_presence(presence)?;
        self.publish(StoreChange::Presence {
            user_id: presence.user_id.clone(),
        });
        Ok(())
    }

    async fn get_presence(&self, user_id: &UserId) -> Result<UserPresence> {
        self.db()?.get_presence(user_id)
    }

    async fn list_located_presence(&self) -> Result<Vec<UserPresence>> {
        self.db()?.list_located_presence()
    }

    async fn insert_contact(&self, contact: &EmergencyContact) -> Result<()> {
        self.db()?.insert_contact(contact)?;
        self.publish(StoreChange::Contacts {
            owner_id: contact.owner_id.clone(),
        });
        Ok(())
    }

    async fn get_contact(&self, id: ContactId) -> Result<EmergencyContact> {
        self.db()?.get_contact(id)
    }

    async fn list_contacts(&self, owner_id: &UserId) -> Result<Vec<EmergencyContact>> {
        self.db()?.list_contacts(owner_id)
    }

    async fn set_primary_contact(&self, owner_id: &UserId, id: ContactId) -> Result<()> {
        self.db()?.set_primary_contact(owner_id, id)?;
        self.publish(StoreChange::Contacts {
            owner_id: owner_id.clone(),
        });
        Ok(())
    }

    async fn delete_contact(&self, owner_id: &UserId, id: ContactId) -> Result<bool> {
        let deleted = self.db()?.delete_contact(owner_id, id)?;
        if deleted {
            self.publish(StoreChange::Contacts {
                owner_id: owner_id.clone(),
            });
        }
        Ok(deleted)
    }

    async fn insert_emergency(&self, emergency: &Emergency) -> Result<()> {
        self.db()?.insert_emergency(emergency)?;
        self.publish(StoreChange::Emergency {
            id: emergency.id,
            victim_id: emergency.victim_id.clone(),
        });
        Ok(())
    }

    async fn get_emergency(&self, id: EmergencyId) -> Result<Emergency> {
        self.db()?.get_emergency(id)
    }

    async fn set_emergency_chat(&self, id: EmergencyId, chat_id: ChatId) -> Result<()> {
        let victim_id = {
            let db = self.db()?;
            db.set_emergency_chat(id, chat_id)?;
            db.get_emergency(id)?.victim_id
        };
        self.publish(StoreChange::Emergency { id, victim_id });
        Ok(())
    }

    async fn transition_emergency(
        &self,
        id: EmergencyId,
        status: EmergencyStatus,
    ) -> Result<bool> {
        let (changed, victim_id) = {
            let db = self.db()?;
            let changed = db.transition_emergency(id, status)?;
            let victim_id = if changed {
                Some(db.get_emergency(id)?.victim_id)
            } else {
                None
            };
            (changed, victim_id)
        };
        if let Some(victim_id) = victim_id {
            self.publish(StoreChange::Emergency { id, victim_id });
        }
        Ok(changed)
    }

    async fn open_emergencies_for(&self, victim_id: &UserId) -> Result<Vec<Emergency>> {
        self.db()?.open_emergencies_for(victim_id)
    }

    async fn emergency_history(&self, victim_id: &UserId) -> Result<Vec<Emergency>> {
        self.db()?.emergency_history(victim_id)
    }

    async fn insert_chat(&self, chat: &Chat) -> Result<()> {
        self.db()?.insert_chat(chat)?;
        self.publish(StoreChange::Chat { id: chat.id });
        Ok(())
    }

    async fn get_chat(&self, id: ChatId) -> Result<Chat> {
        self.db()?.get_chat(id)
    }

    async fn add_participant(
        &self,
        id: ChatId,
        user: &UserId,
        at: DateTime<Utc>,
    ) -> Result<Admission> {
        let admission = self.db()?.add_participant(id, user, at)?;
        if admission == Admission::Added {
            self.publish(StoreChange::Chat { id });
        }
        Ok(admission)
    }

    async fn join_participant(&self, id: ChatId, user: &UserId, at: DateTime<Utc>) -> Result<bool> {
        let first = self.db()?.join_participant(id, user, at)?;
        if first {
            self.publish(StoreChange::Chat { id });
        }
        Ok(first)
    }

    async fn close_chat(&self, id: ChatId, closure: Closure) -> Result<bool> {
        let closed = self.db()?.close_chat(id, closure)?;
        if closed {
            self.publish(StoreChange::Chat { id });
        }
        Ok(closed)
    }

    async fn expired_active_chats(&self, now: DateTime<Utc>) -> Result<Vec<Chat>> {
        self.db()?.expired_active_chats(now)
    }

    async fn append_message(&self, message: &NewMessage, at: DateTime<Utc>) -> Result<Message> {
        let stored = self.db()?.append_message(message, at)?;
        self.publish(StoreChange::Message {
            chat_id: stored.chat_id,
            seq: stored.seq,
        });
        Ok(stored)
    }

    async fn messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        self.db()?.get_messages_for_chat(chat_id)
    }

    async fn messages_since(&self, chat_id: ChatId, after_seq: i64) -> Result<Vec<Message>> {
        self.db()?.get_messages_since(chat_id, after_seq)
    }

    async fn insert_alert(&self, alert: &HelperAlert) -> Result<bool> {
        let inserted = self.db()?.insert_alert(alert)?;
        if inserted {
            self.publish(StoreChange::Alert {
                id: alert.id,
                helper_id: alert.helper_id.clone(),
            });
        }
        Ok(inserted)
    }

    async fn get_alert(&self, id: AlertId) -> Result<HelperAlert> {
        self.db()?.get_alert(id)
    }

    async fn mark_alert_delivered(&self, id: AlertId) -> Result<bool> {
        let (changed, helper_id) = {
            let db = self.db()?;
            let changed = db.mark_alert_delivered(id)?;
            (changed, db.get_alert(id)?.helper_id)
        };
        if changed {
            self.publish(StoreChange::Alert { id, helper_id });
        }
        Ok(changed)
    }

    async fn alerts_for_helper(
        &self,
        helper_id: &UserId,
        status: DeliveryStatus,
    ) -> Result<Vec<HelperAlert>> {
        self.db()?.alerts_for_helper(helper_id, status)
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lifeline_shared::models::{LocationQuality, TriggerReason};

    fn emergency(victim: &str) -> Emergency {
        Emergency {
            id: EmergencyId::new(),
            victim_id: UserId::new(victim),
            victim_name: "Victim".into(),
            victim_contact: None,
            location: None,
            location_quality: LocationQuality::Missing,
            status: EmergencyStatus::Waiting,
            trigger_reason: TriggerReason::Manual,
            created_at: Utc::now(),
            chat_id: None,
        }
    }

    #[tokio::test]
    async fn test_writes_publish_changes() {
        let store = SqliteStore::in_memory().unwrap();
        let mut feed = store.changes();

        let e = emergency("v");
        store.insert_emergency(&e).await.unwrap();
        assert_eq!(
            feed.recv().await.unwrap(),
            StoreChange::Emergency {
                id: e.id,
                victim_id: UserId::new("v")
            }
        );

        let now = Utc::now();
        let chat = Chat {
            id: ChatId::new(),
            emergency_id: e.id,
            participant_ids: [UserId::new("v")].into_iter().collect(),
            is_active: true,
            created_at: now,
            expires_at: now + Duration::hours(1),
            closure: None,
        };
        store.insert_chat(&chat).await.unwrap();
        assert_eq!(feed.recv().await.unwrap(), StoreChange::Chat { id: chat.id });

        let msg = store
            .append_message(&NewMessage::system(chat.id, "hello"), now)
            .await
            .unwrap();
        assert_eq!(
            feed.recv().await.unwrap(),
            StoreChange::Message {
                chat_id: chat.id,
                seq: msg.seq
            }
        );
    }

    #[tokio::test]
    async fn test_losing_close_publishes_nothing() {
        let store = SqliteStore::in_memory().unwrap();
        let e = emergency("v");
        store.insert_emergency(&e).await.unwrap();

        let mut feed = store.changes();
        assert!(store
            .transition_emergency(e.id, EmergencyStatus::Closed)
            .await
            .unwrap());
        assert!(!store
            .transition_emergency(e.id, EmergencyStatus::Closed)
            .await
            .unwrap());

        assert!(feed.recv().await.is_ok());
        assert!(matches!(
            feed.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
