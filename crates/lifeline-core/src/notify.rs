//! Push notification seam.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use lifeline_shared::models::{HelperAlert, HelperCandidate};
use lifeline_shared::types::UserId;

use crate::error::NotifyError;

/// What is pushed to a helper's device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertPayload {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

impl AlertPayload {
    pub fn for_alert(victim_name: &str, alert: &HelperAlert, helper: &HelperCandidate) -> Self {
        let mut data = BTreeMap::new();
        data.insert("type".to_string(), "emergency".to_string());
        data.insert("alert_id".to_string(), alert.id.to_string());
        data.insert("emergency_id".to_string(), alert.emergency_id.to_string());
        data.insert("chat_id".to_string(), alert.chat_id.to_string());
        data.insert(
            "distance_km".to_string(),
            format!("{:.1}", helper.distance_km),
        );
        Self {
            title: "Emergency nearby".to_string(),
            body: format!(
                "{} needs help {:.1} km from you",
                victim_name, helper.distance_km
            ),
            data,
        }
    }
}

/// Delivers alert notifications. Failures are reported, never retried here.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, recipient: &UserId, payload: &AlertPayload) -> Result<(), NotifyError>;
}

/// Logs instead of pushing. The default when no push backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, recipient: &UserId, payload: &AlertPayload) -> Result<(), NotifyError> {
        info!(recipient = %recipient.short(), title = %payload.title, "Push: {}", payload.body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lifeline_shared::models::{DeliveryStatus, Location};
    use lifeline_shared::types::{AlertId, ChatId, EmergencyId};

    #[test]
    fn test_payload_carries_routing_data() {
        let alert = HelperAlert {
            id: AlertId::new(),
            helper_id: UserId::new("h"),
            emergency_id: EmergencyId::new(),
            chat_id: ChatId::new(),
            distance_km: 2.345,
            delivery_status: DeliveryStatus::Pending,
            created_at: Utc::now(),
        };
        let helper = HelperCandidate {
            user_id: UserId::new("h"),
            display_name: "H".into(),
            contact_info: None,
            location: Location::new(0.0, 0.0, 1.0, Utc::now()),
            distance_km: 2.345,
            is_online: true,
        };
        let payload = AlertPayload::for_alert("Ana", &alert, &helper);
        assert_eq!(payload.body, "Ana needs help 2.3 km from you");
        assert_eq!(payload.data["chat_id"], alert.chat_id.to_string());
        assert_eq!(payload.data["distance_km"], "2.3");
    }

    #[tokio::test]
    async fn test_log_notifier_accepts() {
        let payload = AlertPayload {
            title: "t".into(),
            body: "b".into(),
            data: BTreeMap::new(),
        };
        assert!(LogNotifier.deliver(&UserId::new("x"), &payload).await.is_ok());
    }
}
