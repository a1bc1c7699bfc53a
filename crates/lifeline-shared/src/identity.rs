//! Caller identity as supplied by the identity/profile collaborator.
//!
//! The engine treats a [`Profile`] as read-only context: it is never mutated
//! or persisted except as a snapshot inside an emergency or presence record.

use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// The authenticated caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub uid: UserId,
    pub display_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Profile {
    pub fn new(uid: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            uid: UserId::new(uid),
            display_name: display_name.into(),
            phone: None,
            email: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Name shown to other participants; falls back to a shortened user id.
    pub fn name(&self) -> String {
        let trimmed = self.display_name.trim();
        if trimmed.is_empty() {
            format!("User {}", self.uid.short())
        } else {
            trimmed.to_string()
        }
    }

    /// Best way to reach this person: phone first, then email.
    pub fn contact_info(&self) -> Option<String> {
        self.phone
            .clone()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| self.email.clone().filter(|e| !e.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_falls_back_to_short_uid() {
        let p = Profile::new("0123456789abcdef", "  ");
        assert_eq!(p.name(), "User 01234567");
    }

    #[test]
    fn test_contact_info_prefers_phone() {
        let p = Profile::new("u1", "Ana")
            .with_email("ana@example.org")
            .with_phone("+33 6 00 00 00 00");
        assert_eq!(p.contact_info().as_deref(), Some("+33 6 00 00 00 00"));

        let p = Profile::new("u2", "Bo").with_email("bo@example.org");
        assert_eq!(p.contact_info().as_deref(), Some("bo@example.org"));
    }
}
