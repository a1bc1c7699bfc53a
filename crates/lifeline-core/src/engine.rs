//! Engine wiring.
//!
//! An [`Engine`] owns what is shared by every user: the store, the push
//! notifier, the clock, the configuration and the expiry timers. Each
//! authenticated caller gets an [`EmergencySession`] holding their identity
//! and location service, from which the emergency manager, chat coordinator
//! and contact book are reached.

use std::sync::Arc;

use tracing::warn;

use lifeline_shared::identity::Profile;
use lifeline_shared::models::Location;
use lifeline_store::DocumentStore;

use crate::chat::ChatCoordinator;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::contacts::ContactBook;
use crate::driver::SosDriver;
use crate::error::{EngineError, Result};
use crate::expiry::ExpiryScheduler;
use crate::location::{LocationProvider, LocationService};
use crate::notify::Notifier;
use crate::session::EmergencyManager;
use crate::subscriptions::{ActiveEmergencyWatch, AlertInbox};

/// Shared collaborators, cheap to clone.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn DocumentStore>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<EngineConfig>,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            config: Arc::new(config),
        }
    }
}

pub struct Engine {
    ctx: EngineContext,
    expiry: Arc<ExpiryScheduler>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self::from_context(EngineContext::new(store, notifier, Arc::new(SystemClock), config))
    }

    pub fn from_context(ctx: EngineContext) -> Self {
        let expiry = Arc::new(ExpiryScheduler::new(ctx.clone()));
        Self { ctx, expiry }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn expiry(&self) -> &Arc<ExpiryScheduler> {
        &self.expiry
    }

    /// Close every chat past its lifetime.
    pub async fn sweep_expired(&self) -> Result<usize> {
        self.expiry.sweep().await
    }

    /// Open a session for an authenticated caller.
    pub fn session(
        &self,
        profile: Profile,
        provider: Arc<dyn LocationProvider>,
    ) -> Result<EmergencySession> {
        if profile.uid.is_empty() {
            return Err(EngineError::NoIdentity);
        }
        Ok(self.build_session(profile, provider, None))
    }

    /// Open a session whose location cache starts from the caller's last
    /// reported fix, so a trigger without a live reading still has a place.
    pub async fn resume_session(
        &self,
        profile: Profile,
        provider: Arc<dyn LocationProvider>,
    ) -> Result<EmergencySession> {
        if profile.uid.is_empty() {
            return Err(EngineError::NoIdentity);
        }
        let last_known = match self.ctx.store.get_presence(&profile.uid).await {
            Ok(presence) => presence.location,
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!(user = %profile.uid.short(), error = %e, "Stored presence unreadable");
                None
            }
        };
        Ok(self.build_session(profile, provider, last_known))
    }

    fn build_session(
        &self,
        profile: Profile,
        provider: Arc<dyn LocationProvider>,
        last_known: Option<Location>,
    ) -> EmergencySession {
        let profile = Arc::new(profile);
        let mut service = LocationService::new(provider, self.ctx.config.location);
        if let Some(location) = last_known {
            service = service.with_last_known(location);
        }
        let location = Arc::new(service);
        let manager = Arc::new(EmergencyManager::new(
            self.ctx.clone(),
            self.expiry.clone(),
            location.clone(),
            profile.clone(),
        ));
        EmergencySession {
            chat: ChatCoordinator::new(self.ctx.clone(), location.clone(), profile.clone()),
            contacts: ContactBook::new(self.ctx.clone(), profile.clone()),
            ctx: self.ctx.clone(),
            manager,
            location,
            profile,
        }
    }
}

/// Everything one authenticated caller can do.
pub struct EmergencySession {
    ctx: EngineContext,
    profile: Arc<Profile>,
    location: Arc<LocationService>,
    manager: Arc<EmergencyManager>,
    chat: ChatCoordinator,
    contacts: ContactBook,
}

impl EmergencySession {
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn location(&self) -> &Arc<LocationService> {
        &self.location
    }

    pub fn manager(&self) -> &Arc<EmergencyManager> {
        &self.manager
    }

    pub fn chat(&self) -> &ChatCoordinator {
        &self.chat
    }

    pub fn contacts(&self) -> &ContactBook {
        &self.contacts
    }

    /// Start the SOS button driver; completed gestures trigger through this
    /// session's manager.
    pub fn sos(&self) -> SosDriver {
        SosDriver::spawn(self.ctx.config.sos, self.manager.clone())
    }

    pub fn watch_active_emergency(&self) -> ActiveEmergencyWatch {
        ActiveEmergencyWatch::new(self.ctx.store.clone(), self.profile.uid.clone())
    }

    pub fn watch_alerts(&self) -> AlertInbox {
        AlertInbox::new(self.ctx.store.clone(), self.profile.uid.clone())
    }
}
