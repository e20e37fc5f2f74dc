use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use yo_common::config::AppConfig;
use yo_common::types::TransportKind;

use super::{ContactField, Delivery, Transport, error_body, skip_disabled};
use crate::error::DeliveryError;

const SENDGRID_API_URL: &str = "https://api.sendgrid.com";

/// SendGrid settings.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_key: Option<String>,
    pub from: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl EmailConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            api_key: config.sendgrid_api_key.clone(),
            from: config.email_from.clone(),
            base_url: SENDGRID_API_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Email through the SendGrid v3 mail API.
pub struct EmailTransport {
    config: EmailConfig,
    client: Client,
}

impl EmailTransport {
    pub fn new(config: EmailConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();

        tracing::info!(enabled = config.api_key.is_some(), "Email transport configured");
        Self { config, client }
    }

    fn build_payload(&self, to: &str, delivery: &Delivery<'_>) -> serde_json::Value {
        let message = delivery.message;
        let mut content = vec![json!({"type": "text/plain", "value": message.text})];
        if let Some(html) = &message.html {
            content.push(json!({"type": "text/html", "value": html}));
        }

        json!({
            "personalizations": [{"to": [{"email": to}]}],
            "from": {"email": self.config.from, "name": "steemit.com"},
            "subject": message.subject,
            "content": content,
        })
    }
}

#[async_trait]
impl Transport for EmailTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Email
    }

    fn is_enabled(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn contact_field(&self) -> ContactField {
        ContactField::Email
    }

    async fn send(&self, delivery: &Delivery<'_>) -> Result<(), DeliveryError> {
        let Some(api_key) = &self.config.api_key else {
            skip_disabled(self.kind(), delivery);
            return Ok(());
        };
        let to = delivery
            .contact
            .address()
            .ok_or_else(|| DeliveryError::Permanent("email contact is not an address".into()))?;

        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.config.base_url))
            .bearer_auth(api_key)
            .json(&self.build_payload(to, delivery))
            .send()
            .await
            .map_err(|e| DeliveryError::from_request("SendGrid", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            tracing::warn!(status = %status, body = %body, "SendGrid rejected message");
            return Err(DeliveryError::from_status("SendGrid", status, &body));
        }

        tracing::debug!(
            notification_id = delivery.job.notification_id,
            "Email accepted by SendGrid"
        );
        Ok(())
    }
}
