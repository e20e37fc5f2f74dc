use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use yo_common::types::TransportKind;

use super::{Contact, ContactField, Delivery, Transport, error_body, skip_disabled};
use crate::error::DeliveryError;

/// Browser push, relayed through a gateway that holds the VAPID keys.
pub struct PushTransport {
    gateway_url: Option<String>,
    client: Client,
}

impl PushTransport {
    pub fn new(gateway_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        tracing::info!(enabled = gateway_url.is_some(), "Push transport configured");
        Self {
            gateway_url,
            client,
        }
    }
}

#[async_trait]
impl Transport for PushTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Push
    }

    fn is_enabled(&self) -> bool {
        self.gateway_url.is_some()
    }

    fn contact_field(&self) -> ContactField {
        ContactField::PushSubscription
    }

    async fn send(&self, delivery: &Delivery<'_>) -> Result<(), DeliveryError> {
        let Some(gateway_url) = &self.gateway_url else {
            skip_disabled(self.kind(), delivery);
            return Ok(());
        };
        let Contact::Subscription(subscription) = delivery.contact else {
            return Err(DeliveryError::Permanent(
                "push contact is not a subscription".into(),
            ));
        };

        let job = delivery.job;
        let payload = json!({
            "subscription": subscription,
            "notification": {
                "title": delivery.message.subject,
                "body": delivery.message.text,
                "data": {
                    "notification_id": job.notification_id,
                    "notify_type": job.notify_type,
                    "to_username": job.to_username,
                    "from_username": job.from_username,
                },
            },
        });

        let response = self
            .client
            .post(gateway_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::from_request("Push gateway", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            tracing::warn!(status = %status, body = %body, "Push gateway rejected message");
            return Err(DeliveryError::from_status("Push gateway", status, &body));
        }
        Ok(())
    }
}
