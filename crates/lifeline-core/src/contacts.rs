//! The caller's personal emergency contacts.

use std::sync::Arc;

use tracing::info;

use lifeline_shared::identity::Profile;
use lifeline_shared::models::EmergencyContact;
use lifeline_shared::types::ContactId;

use crate::engine::EngineContext;
use crate::error::{EngineError, NotFoundExt, Result};

/// Fields supplied when adding a contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub name: String,
    pub phone: String,
    pub relationship: Option<String>,
    pub is_primary: bool,
}

pub struct ContactBook {
    ctx: EngineContext,
    profile: Arc<Profile>,
}

impl ContactBook {
    pub fn new(ctx: EngineContext, profile: Arc<Profile>) -> Self {
        Self { ctx, profile }
    }

    fn identity(&self) -> Result<&Profile> {
        if self.profile.uid.is_empty() {
            return Err(EngineError::NoIdentity);
        }
        Ok(&self.profile)
    }

    pub async fn add(&self, contact: NewContact) -> Result<EmergencyContact> {
        let profile = self.identity()?;
        let name = contact.name.trim();
        let phone = contact.phone.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidContact("name is required".into()));
        }
        if phone.is_empty() {
            return Err(EngineError::InvalidContact("phone is required".into()));
        }

        let contact = EmergencyContact {
            id: ContactId::new(),
            owner_id: profile.uid.clone(),
            name: name.to_string(),
            phone: phone.to_string(),
            relationship: contact
                .relationship
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
            is_primary: contact.is_primary,
        };
        self.ctx.store.insert_contact(&contact).await?;
        info!(contact = %contact.id, user = %profile.uid.short(), "Contact added");
        Ok(contact)
    }

    /// Primary first, then by name.
    pub async fn list(&self) -> Result<Vec<EmergencyContact>> {
        let profile = self.identity()?;
        Ok(self.ctx.store.list_contacts(&profile.uid).await?)
    }

    pub async fn remove(&self, id: ContactId) -> Result<()> {
        let profile = self.identity()?;
        if self.ctx.store.delete_contact(&profile.uid, id).await? {
            Ok(())
        } else {
            Err(EngineError::NotFound("contact"))
        }
    }

    pub async fn set_primary(&self, id: ContactId) -> Result<()> {
        let profile = self.identity()?;
        self.ctx
            .store
            .set_primary_contact(&profile.uid, id)
            .await
            .or_not_found("contact")
    }
}
