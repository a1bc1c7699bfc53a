//! Shared fixtures for the engine tests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use lifeline_shared::geo::offset_north;
use lifeline_shared::identity::Profile;
use lifeline_shared::models::{
    Chat, Closure, DeliveryStatus, Emergency, EmergencyContact, EmergencyStatus, HelperAlert,
    Location, LocationQuality, Message, NewMessage, TriggerReason, UserPresence,
};
use lifeline_shared::types::{AlertId, ChatId, ContactId, EmergencyId, UserId};
use lifeline_store::chats::Admission;
use lifeline_store::{DocumentStore, SqliteStore, StoreChange, StoreError};

use crate::clock::{Clock, ManualClock};
use crate::config::EngineConfig;
use crate::engine::{EmergencySession, Engine, EngineContext};
use crate::error::NotifyError;
use crate::location::FixedLocationProvider;
use crate::notify::{AlertPayload, Notifier};

pub(crate) const ORIGIN: (f64, f64) = (45.07, 7.69);

/// Records every push; can be told to fail for given recipients.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<UserId>>,
    failing: Mutex<Vec<UserId>>,
}

impl RecordingNotifier {
    pub(crate) fn recipients(&self) -> Vec<UserId> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn fail_for(&self, uid: &str) {
        self.failing.lock().unwrap().push(UserId::new(uid));
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(
        &self,
        recipient: &UserId,
        _payload: &AlertPayload,
    ) -> Result<(), NotifyError> {
        if self.failing.lock().unwrap().contains(recipient) {
            return Err(NotifyError::Delivery("unreachable".into()));
        }
        self.sent.lock().unwrap().push(recipient.clone());
        Ok(())
    }
}

/// Delegates to SQLite, failing the calls it is told to fail.
#[derive(Default)]
pub(crate) struct Faults {
    pub presence_scans: AtomicBool,
    pub emergency_inserts: AtomicBool,
    pub chat_inserts: AtomicBool,
    pub closing_transitions: AtomicBool,
    /// Number of upcoming `close_chat` calls to fail.
    pub chat_closes: AtomicUsize,
}

pub(crate) struct FaultyStore {
    inner: SqliteStore,
    faults: Arc<Faults>,
}

fn offline() -> StoreError {
    StoreError::Unavailable("offline".into())
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn upsert_presence(&self, p: &UserPresence) -> lifeline_store::Result<()> {
        self.inner.upsert_presence(p).await
    }
    async fn get_presence(&self, user: &UserId) -> lifeline_store::Result<UserPresence> {
        self.inner.get_presence(user).await
    }
    async fn list_located_presence(&self) -> lifeline_store::Result<Vec<UserPresence>> {
        if self.faults.presence_scans.load(Ordering::SeqCst) {
            return Err(offline());
        }
        self.inner.list_located_presence().await
    }
    async fn insert_contact(&self, c: &EmergencyContact) -> lifeline_store::Result<()> {
        self.inner.insert_contact(c).await
    }
    async fn get_contact(&self, id: ContactId) -> lifeline_store::Result<EmergencyContact> {
        self.inner.get_contact(id).await
    }
    async fn list_contacts(&self, owner: &UserId) -> lifeline_store::Result<Vec<EmergencyContact>> {
        self.inner.list_contacts(owner).await
    }
    async fn set_primary_contact(
        &self,
        owner: &UserId,
        id: ContactId,
    ) -> lifeline_store::Result<()> {
        self.inner.set_primary_contact(owner, id).await
    }
    async fn delete_contact(&self, owner: &UserId, id: ContactId) -> lifeline_store::Result<bool> {
        self.inner.delete_contact(owner, id).await
    }
    async fn insert_emergency(&self, e: &Emergency) -> lifeline_store::Result<()> {
        if self.faults.emergency_inserts.load(Ordering::SeqCst) {
            return Err(offline());
        }
        self.inner.insert_emergency(e).await
    }
    async fn get_emergency(&self, id: EmergencyId) -> lifeline_store::Result<Emergency> {
        self.inner.get_emergency(id).await
    }
    async fn set_emergency_chat(
        &self,
        id: EmergencyId,
        chat: ChatId,
    ) -> lifeline_store::Result<()> {
        self.inner.set_emergency_chat(id, chat).await
    }
    async fn transition_emergency(
        &self,
        id: EmergencyId,
        status: EmergencyStatus,
    ) -> lifeline_store::Result<bool> {
        if status == EmergencyStatus::Closed
            && self.faults.closing_transitions.load(Ordering::SeqCst)
        {
            return Err(offline());
        }
        self.inner.transition_emergency(id, status).await
    }
    async fn open_emergencies_for(
        &self,
        victim: &UserId,
    ) -> lifeline_store::Result<Vec<Emergency>> {
        self.inner.open_emergencies_for(victim).await
    }
    async fn emergency_history(&self, victim: &UserId) -> lifeline_store::Result<Vec<Emergency>> {
        self.inner.emergency_history(victim).await
    }
    async fn insert_chat(&self, chat: &Chat) -> lifeline_store::Result<()> {
        if self.faults.chat_inserts.load(Ordering::SeqCst) {
            return Err(offline());
        }
        self.inner.insert_chat(chat).await
    }
    async fn get_chat(&self, id: ChatId) -> lifeline_store::Result<Chat> {
        self.inner.get_chat(id).await
    }
    async fn add_participant(
        &self,
        id: ChatId,
        user: &UserId,
        at: DateTime<Utc>,
    ) -> lifeline_store::Result<Admission> {
        self.inner.add_participant(id, user, at).await
    }
    async fn join_participant(
        &self,
        id: ChatId,
        user: &UserId,
        at: DateTime<Utc>,
    ) -> lifeline_store::Result<bool> {
        self.inner.join_participant(id, user, at).await
    }
    async fn close_chat(&self, id: ChatId, closure: Closure) -> lifeline_store::Result<bool> {
        let failing = self
            .faults
            .chat_closes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(offline());
        }
        self.inner.close_chat(id, closure).await
    }
    async fn expired_active_chats(&self, now: DateTime<Utc>) -> lifeline_store::Result<Vec<Chat>> {
        self.inner.expired_active_chats(now).await
    }
    async fn append_message(
        &self,
        m: &NewMessage,
        at: DateTime<Utc>,
    ) -> lifeline_store::Result<Message> {
        self.inner.append_message(m, at).await
    }
    async fn messages_for_chat(&self, id: ChatId) -> lifeline_store::Result<Vec<Message>> {
        self.inner.messages_for_chat(id).await
    }
    async fn messages_since(&self, id: ChatId, after: i64) -> lifeline_store::Result<Vec<Message>> {
        self.inner.messages_since(id, after).await
    }
    async fn insert_alert(&self, a: &HelperAlert) -> lifeline_store::Result<bool> {
        self.inner.insert_alert(a).await
    }
    async fn get_alert(&self, id: AlertId) -> lifeline_store::Result<HelperAlert> {
        self.inner.get_alert(id).await
    }
    async fn mark_alert_delivered(&self, id: AlertId) -> lifeline_store::Result<bool> {
        self.inner.mark_alert_delivered(id).await
    }
    async fn alerts_for_helper(
        &self,
        helper: &UserId,
        status: DeliveryStatus,
    ) -> lifeline_store::Result<Vec<HelperAlert>> {
        self.inner.alerts_for_helper(helper, status).await
    }
    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes()
    }
}

pub(crate) struct Harness {
    pub store: Arc<dyn DocumentStore>,
    pub faults: Arc<Faults>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub ctx: EngineContext,
    pub engine: Engine,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let faults = Arc::new(Faults::default());
        let store: Arc<dyn DocumentStore> = Arc::new(FaultyStore {
            inner: SqliteStore::in_memory().unwrap(),
            faults: faults.clone(),
        });
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = EngineContext::new(
            store.clone(),
            notifier.clone(),
            clock.clone(),
            EngineConfig::default(),
        );
        let engine = Engine::from_context(ctx.clone());
        Self {
            store,
            faults,
            clock,
            notifier,
            ctx,
            engine,
        }
    }

    pub(crate) fn location_at(&self, (lat, lng): (f64, f64)) -> Location {
        Location::new(lat, lng, 8.0, self.clock.now())
    }

    /// A session whose device reports `at`, or has no fix at all.
    pub(crate) fn session(&self, uid: &str, at: Option<(f64, f64)>) -> EmergencySession {
        let provider = FixedLocationProvider::from_option(at.map(|p| self.location_at(p)));
        self.engine
            .session(Profile::new(uid, uid.to_uppercase()), Arc::new(provider))
            .unwrap()
    }
}

/// Register an online helper `km` north of [`ORIGIN`].
pub(crate) async fn helper_near(h: &Harness, uid: &str, km: f64) {
    let (lat, lng) = offset_north(ORIGIN.0, ORIGIN.1, km);
    h.store
        .upsert_presence(&UserPresence {
            user_id: UserId::new(uid),
            display_name: uid.to_uppercase(),
            phone: None,
            email: None,
            location: Some(h.location_at((lat, lng))),
            is_online: true,
            last_active: h.clock.now(),
        })
        .await
        .unwrap();
}

/// An open episode written straight to the store, bypassing discovery.
pub(crate) async fn episode(h: &Harness, victim: &str) -> (Emergency, Chat) {
    let now = h.clock.now();
    let chat_id = ChatId::new();
    let emergency = Emergency {
        id: EmergencyId::new(),
        victim_id: UserId::new(victim),
        victim_name: victim.to_uppercase(),
        victim_contact: None,
        location: None,
        location_quality: LocationQuality::Missing,
        status: EmergencyStatus::Active,
        trigger_reason: TriggerReason::Manual,
        created_at: now,
        chat_id: None,
    };
    h.store.insert_emergency(&emergency).await.unwrap();
    let chat = Chat {
        id: chat_id,
        emergency_id: emergency.id,
        participant_ids: BTreeSet::from([UserId::new(victim)]),
        is_active: true,
        created_at: now,
        expires_at: now + h.ctx.config.chat_lifetime,
        closure: None,
    };
    h.store.insert_chat(&chat).await.unwrap();
    h.store.set_emergency_chat(emergency.id, chat_id).await.unwrap();
    (
        Emergency {
            chat_id: Some(chat_id),
            ..emergency
        },
        chat,
    )
}
