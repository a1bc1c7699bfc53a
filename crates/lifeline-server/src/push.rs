//! Push gateway notifier.
//!
//! POSTs each alert as JSON to a configured webhook; the gateway is in
//! charge of reaching the helper's device.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use lifeline_core::notify::{AlertPayload, Notifier};
use lifeline_core::NotifyError;
use lifeline_shared::types::UserId;

#[derive(Serialize)]
struct PushRequest<'a> {
    recipient: &'a UserId,
    #[serde(flatten)]
    payload: &'a AlertPayload,
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, recipient: &UserId, payload: &AlertPayload) -> Result<(), NotifyError> {
        if recipient.is_empty() {
            return Err(NotifyError::NoTarget);
        }
        let response = self
            .client
            .post(&self.url)
            .json(&PushRequest { recipient, payload })
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Delivery(format!("gateway answered {status}")));
        }
        debug!(recipient = %recipient.short(), "Push accepted by gateway");
        Ok(())
    }
}
