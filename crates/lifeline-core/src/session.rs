//! Emergency lifecycle: trigger, fan-out, resolve, expiry.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};

use lifeline_shared::constants::CHAT_OPENED_TEXT;
use lifeline_shared::identity::Profile;
use lifeline_shared::models::{
    Chat, Closure, DeliveryStatus, Emergency, EmergencyStatus, HelperAlert, HelperCandidate,
    LocationQuality, NewMessage, TriggerReason, UserPresence,
};
use lifeline_shared::types::{AlertId, ChatId, EmergencyId, UserId};

use crate::discovery::HelperDiscovery;
use crate::driver::TriggerTarget;
use crate::engine::EngineContext;
use crate::error::{EngineError, NotFoundExt, Result};
use crate::expiry::{close_episode, ExpiryScheduler};
use crate::location::LocationService;
use crate::notify::AlertPayload;

/// Something that went wrong without stopping the alert from going out.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerWarning {
    /// No live fix; `quality` says what was used instead.
    DegradedLocation {
        quality: LocationQuality,
        reason: Option<String>,
    },
    DiscoveryFailed { reason: String },
    OpeningMessageFailed { reason: String },
    AdmissionFailed { helper_id: UserId, reason: String },
    AlertWriteFailed { helper_id: UserId, reason: String },
    PushFailed { helper_id: UserId, reason: String },
    ActivationFailed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerReport {
    pub emergency: Emergency,
    pub chat: Chat,
    pub helpers: Vec<HelperCandidate>,
    pub search_radius_km: Option<f64>,
    pub location_quality: LocationQuality,
    pub warnings: Vec<TriggerWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Resolved,
    AlreadyClosed,
}

pub struct EmergencyManager {
    ctx: EngineContext,
    expiry: Arc<ExpiryScheduler>,
    location: Arc<LocationService>,
    discovery: HelperDiscovery,
    profile: Arc<Profile>,
}

impl EmergencyManager {
    pub fn new(
        ctx: EngineContext,
        expiry: Arc<ExpiryScheduler>,
        location: Arc<LocationService>,
        profile: Arc<Profile>,
    ) -> Self {
        let discovery = HelperDiscovery::new(
            ctx.store.clone(),
            ctx.clock.clone(),
            ctx.config.search,
            ctx.config.online_window,
        );
        Self {
            ctx,
            expiry,
            location,
            discovery,
            profile,
        }
    }

    fn identity(&self) -> Result<&Profile> {
        if self.profile.uid.is_empty() {
            return Err(EngineError::NoIdentity);
        }
        Ok(&self.profile)
    }

    /// Raise an emergency and alert nearby helpers.
    ///
    /// Only the emergency and chat writes are fatal; everything after them
    /// is best effort and reported through [`TriggerReport::warnings`].
    pub async fn trigger_emergency(&self, reason: TriggerReason) -> Result<TriggerReport> {
        let profile = self.identity()?;
        let victim = profile.uid.clone();
        let mut warnings = Vec::new();

        let fix = self.location.best_effort().await;
        if fix.quality != LocationQuality::Live {
            warn!(
                reason = %reason,
                quality = %fix.quality,
                victim = %victim.short(),
                "Triggering without a live location"
            );
            warnings.push(TriggerWarning::DegradedLocation {
                quality: fix.quality,
                reason: fix.error.map(|e| e.to_string()),
            });
        }

        let now = self.ctx.clock.now();
        let mut emergency = Emergency {
            id: EmergencyId::new(),
            victim_id: victim.clone(),
            victim_name: profile.name(),
            victim_contact: profile.contact_info(),
            location: fix.location,
            location_quality: fix.quality,
            status: EmergencyStatus::Waiting,
            trigger_reason: reason,
            created_at: now,
            chat_id: None,
        };
        self.ctx
            .store
            .insert_emergency(&emergency)
            .await
            .map_err(EngineError::AlertNotSent)?;

        let mut chat = Chat {
            id: ChatId::new(),
            emergency_id: emergency.id,
            participant_ids: BTreeSet::from([victim.clone()]),
            is_active: true,
            created_at: now,
            expires_at: now + self.ctx.config.chat_lifetime,
            closure: None,
        };
        if let Err(e) = self.open_chat(&chat).await {
            error!(emergency = %emergency.id, error = %e, "Emergency aborted, chat not created");
            // Keep the half-created episode out of the active view.
            if let Err(cleanup) = self
                .ctx
                .store
                .transition_emergency(emergency.id, EmergencyStatus::Closed)
                .await
            {
                warn!(
                    emergency = %emergency.id,
                    error = %cleanup,
                    "Could not close aborted emergency"
                );
            }
            return Err(EngineError::AlertNotSent(e));
        }
        emergency.chat_id = Some(chat.id);

        if let Err(e) = self
            .ctx
            .store
            .append_message(&NewMessage::system(chat.id, CHAT_OPENED_TEXT), now)
            .await
        {
            warn!(chat = %chat.id, error = %e, "Opening message failed");
            warnings.push(TriggerWarning::OpeningMessageFailed {
                reason: e.to_string(),
            });
        }

        let (helpers, search_radius_km) = match &fix.location {
            Some(origin) => match self.discovery.find_helpers(origin, &victim).await {
                Ok(found) => (found.helpers, Some(found.radius_km)),
                Err(e) => {
                    warn!(emergency = %emergency.id, error = %e, "Helper discovery failed");
                    warnings.push(TriggerWarning::DiscoveryFailed {
                        reason: e.to_string(),
                    });
                    (Vec::new(), None)
                }
            },
            None => (Vec::new(), None),
        };

        let (alerted, pushes) = self
            .fan_out(&emergency, chat.id, &helpers, &mut warnings)
            .await;
        chat.participant_ids
            .extend(alerted.iter().map(|h| h.user_id.clone()));

        // Activation does not wait on the push gateway.
        match self
            .ctx
            .store
            .transition_emergency(emergency.id, EmergencyStatus::Active)
            .await
        {
            Ok(_) => emergency.status = EmergencyStatus::Active,
            Err(e) => {
                warn!(emergency = %emergency.id, error = %e, "Emergency left waiting");
                warnings.push(TriggerWarning::ActivationFailed {
                    reason: e.to_string(),
                });
            }
        }

        self.expiry
            .schedule(emergency.id, chat.id, chat.expires_at);

        self.push_alerts(pushes, &mut warnings).await;

        info!(
            emergency = %emergency.id,
            victim = %victim.short(),
            reason = %reason,
            alerted = alerted.len(),
            warnings = warnings.len(),
            "Emergency raised"
        );

        Ok(TriggerReport {
            emergency,
            chat,
            helpers,
            search_radius_km,
            location_quality: fix.quality,
            warnings,
        })
    }

    async fn open_chat(&self, chat: &Chat) -> lifeline_store::Result<()> {
        self.ctx.store.insert_chat(chat).await?;
        self.ctx
            .store
            .set_emergency_chat(chat.emergency_id, chat.id)
            .await
    }

    /// Admit each helper and record their alert. Returns the helpers whose
    /// alert was recorded, along with the pushes still to be sent.
    async fn fan_out<'a>(
        &self,
        emergency: &Emergency,
        chat_id: ChatId,
        helpers: &'a [HelperCandidate],
        warnings: &mut Vec<TriggerWarning>,
    ) -> (Vec<&'a HelperCandidate>, Vec<(&'a HelperCandidate, AlertPayload)>) {
        let mut alerted = Vec::new();
        let mut pushes = Vec::new();

        for helper in helpers {
            let now = self.ctx.clock.now();
            if let Err(e) = self
                .ctx
                .store
                .add_participant(chat_id, &helper.user_id, now)
                .await
            {
                warn!(
                    helper = %helper.user_id.short(),
                    chat = %chat_id,
                    error = %e,
                    "Could not admit helper"
                );
                warnings.push(TriggerWarning::AdmissionFailed {
                    helper_id: helper.user_id.clone(),
                    reason: e.to_string(),
                });
            }

            let alert = HelperAlert {
                id: AlertId::new(),
                helper_id: helper.user_id.clone(),
                emergency_id: emergency.id,
                chat_id,
                distance_km: helper.distance_km,
                delivery_status: DeliveryStatus::Pending,
                created_at: now,
            };
            match self.ctx.store.insert_alert(&alert).await {
                Ok(_) => {
                    alerted.push(helper);
                    let payload = AlertPayload::for_alert(&emergency.victim_name, &alert, helper);
                    pushes.push((helper, payload));
                }
                Err(e) => {
                    warn!(helper = %helper.user_id.short(), error = %e, "Alert not recorded");
                    warnings.push(TriggerWarning::AlertWriteFailed {
                        helper_id: helper.user_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        (alerted, pushes)
    }

    /// Send the pushes concurrently. A failed push leaves the stored alert
    /// in place for the helper's inbox.
    async fn push_alerts(
        &self,
        pushes: Vec<(&HelperCandidate, AlertPayload)>,
        warnings: &mut Vec<TriggerWarning>,
    ) {
        let sends = pushes.into_iter().map(|(helper, payload)| async move {
            let result = self.ctx.notifier.deliver(&helper.user_id, &payload).await;
            (helper, result)
        });
        for (helper, result) in join_all(sends).await {
            if let Err(e) = result {
                warn!(helper = %helper.user_id.short(), error = %e, "Push failed");
                warnings.push(TriggerWarning::PushFailed {
                    helper_id: helper.user_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Close an emergency on behalf of its victim.
    pub async fn resolve_emergency(&self, id: EmergencyId) -> Result<Resolution> {
        let profile = self.identity()?;
        let emergency = self
            .ctx
            .store
            .get_emergency(id)
            .await
            .or_not_found("emergency")?;
        if emergency.victim_id != profile.uid {
            return Err(EngineError::NotVictim);
        }
        if emergency.status == EmergencyStatus::Closed && !self.chat_left_open(&emergency).await {
            return Ok(Resolution::AlreadyClosed);
        }

        if close_episode(&self.ctx, id, emergency.chat_id, Closure::Resolved).await? {
            self.expiry.cancel(id);
            Ok(Resolution::Resolved)
        } else {
            Ok(Resolution::AlreadyClosed)
        }
    }

    /// A closed emergency whose chat is still active was interrupted mid-close.
    async fn chat_left_open(&self, emergency: &Emergency) -> bool {
        let Some(chat_id) = emergency.chat_id else {
            return false;
        };
        match self.ctx.store.get_chat(chat_id).await {
            Ok(chat) => chat.is_active,
            Err(e) => {
                warn!(chat = %chat_id, error = %e, "Could not read chat of closed emergency");
                false
            }
        }
    }

    /// Resolve whatever emergency is currently authoritative for the caller.
    pub async fn resolve_active(&self) -> Result<Option<Resolution>> {
        match self.active_emergency().await? {
            Some(emergency) => self.resolve_emergency(emergency.id).await.map(Some),
            None => Ok(None),
        }
    }

    /// The caller's open emergency; the most recently created one wins.
    pub async fn active_emergency(&self) -> Result<Option<Emergency>> {
        let profile = self.identity()?;
        let open = self.ctx.store.open_emergencies_for(&profile.uid).await?;
        Ok(open.into_iter().next())
    }

    /// The caller's emergencies, newest first.
    pub async fn history(&self) -> Result<Vec<Emergency>> {
        let profile = self.identity()?;
        Ok(self.ctx.store.emergency_history(&profile.uid).await?)
    }

    /// Helper side: mark an alert as seen. Returns `false` if it already was.
    pub async fn acknowledge_alert(&self, id: AlertId) -> Result<bool> {
        let profile = self.identity()?;
        let alert = self.ctx.store.get_alert(id).await.or_not_found("alert")?;
        if alert.helper_id != profile.uid {
            return Err(EngineError::NotAlertRecipient);
        }
        Ok(self.ctx.store.mark_alert_delivered(id).await?)
    }

    /// Alerts addressed to the caller that have not been acknowledged yet.
    pub async fn pending_alerts(&self) -> Result<Vec<HelperAlert>> {
        let profile = self.identity()?;
        Ok(self
            .ctx
            .store
            .alerts_for_helper(&profile.uid, DeliveryStatus::Pending)
            .await?)
    }

    /// Publish the caller's whereabouts so discovery can find them.
    ///
    /// A failed fix keeps the previously stored location.
    pub async fn report_presence(&self, online: bool) -> Result<UserPresence> {
        let profile = self.identity()?;
        let location = match self.location.fetch().await {
            Ok(location) => Some(location),
            Err(e) => {
                warn!(user = %profile.uid.short(), error = %e, "Presence reported without a fix");
                None
            }
        };
        let presence = UserPresence {
            user_id: profile.uid.clone(),
            display_name: profile.name(),
            phone: profile.phone.clone(),
            email: profile.email.clone(),
            location,
            is_online: online,
            last_active: self.ctx.clock.now(),
        };
        self.ctx.store.upsert_presence(&presence).await?;
        Ok(presence)
    }
}

#[async_trait]
impl TriggerTarget for EmergencyManager {
    async fn fire(&self, reason: TriggerReason) {
        match self.trigger_emergency(reason).await {
            Ok(report) => info!(
                "SOS alert out for {} ({} helper(s))",
                report.emergency.id,
                report.helpers.len()
            ),
            Err(e) => error!(error = %e, "SOS alert was NOT sent"),
        }
    }
}
