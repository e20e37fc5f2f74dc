use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use yo_common::config::AppConfig;
use yo_common::types::{JobPayload, TransportKind};

use super::{ContactField, Delivery, Transport, error_body, skip_disabled};
use crate::error::DeliveryError;
use crate::render::{self, Message};

const TWILIO_API_URL: &str = "https://api.twilio.com";

/// Twilio credentials. All three must be present for the adapter to send.
#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl SmsConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            account_sid: config.twilio_account_sid.clone(),
            auth_token: config.twilio_auth_token.clone(),
            from_number: config.twilio_from_number.clone(),
            base_url: TWILIO_API_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    fn credentials(&self) -> Option<(&str, &str, &str)> {
        Some((
            self.account_sid.as_deref()?,
            self.auth_token.as_deref()?,
            self.from_number.as_deref()?,
        ))
    }
}

/// SMS through the Twilio Messages API.
pub struct SmsTransport {
    config: SmsConfig,
    client: Client,
}

impl SmsTransport {
    pub fn new(config: SmsConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();

        tracing::info!(enabled = config.credentials().is_some(), "SMS transport configured");
        Self { config, client }
    }
}

#[async_trait]
impl Transport for SmsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sms
    }

    fn is_enabled(&self) -> bool {
        self.config.credentials().is_some()
    }

    fn contact_field(&self) -> ContactField {
        ContactField::Phone
    }

    /// Texts carry the subject line only.
    fn render(&self, job: &JobPayload) -> Message {
        let message = render::render(job);
        Message {
            text: message.subject.clone(),
            ..message
        }
    }

    async fn send(&self, delivery: &Delivery<'_>) -> Result<(), DeliveryError> {
        let Some((account_sid, auth_token, from_number)) = self.config.credentials() else {
            skip_disabled(self.kind(), delivery);
            return Ok(());
        };
        let to = delivery
            .contact
            .address()
            .ok_or_else(|| DeliveryError::Permanent("sms contact is not a number".into()))?;

        let response = self
            .client
            .post(format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                self.config.base_url, account_sid
            ))
            .basic_auth(account_sid, Some(auth_token))
            .form(&[
                ("To", to),
                ("From", from_number),
                ("Body", delivery.message.text.as_str()),
            ])
            .send()
            .await
            .map_err(|e| DeliveryError::from_request("Twilio", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            tracing::warn!(status = %status, body = %body, "Twilio rejected message");
            return Err(DeliveryError::from_status("Twilio", status, &body));
        }

        tracing::debug!(
            notification_id = delivery.job.notification_id,
            "SMS accepted by Twilio"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use yo_common::types::{NotificationType, Priority};

    use crate::transports::Contact;

    fn job() -> JobPayload {
        JobPayload {
            notification_id: 9,
            eid: "1/0/0/0".to_string(),
            notify_type: NotificationType::Receive,
            to_username: "alice".to_string(),
            from_username: Some("bob".to_string()),
            data: json!({"amount": "1.000 STEEM", "from": "bob", "memo": "hi", "to": "alice"}),
            priority: Priority::Low,
        }
    }

    fn config(base_url: String) -> SmsConfig {
        SmsConfig {
            account_sid: Some("AC123".to_string()),
            auth_token: Some("secret".to_string()),
            from_number: Some("+15555550000".to_string()),
            base_url,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_render_is_subject_only() {
        let transport = SmsTransport::new(config("http://localhost".to_string()));
        let message = transport.render(&job());
        assert_eq!(message.text, "@bob sent you 1.000 STEEM");
    }

    #[tokio::test]
    async fn test_send_posts_form_to_twilio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
            .and(header_exists("authorization"))
            .and(body_string_contains("To=%2B15555550100"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": "SM1"})))
            .expect(1)
            .mount(&server)
            .await;

        let transport = SmsTransport::new(config(server.uri()));
        let job = job();
        let message = transport.render(&job);
        let contact = Contact::Address("+15555550100".to_string());
        transport
            .send(&Delivery {
                job: &job,
                contact: &contact,
                message: &message,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_partial_credentials_disable() {
        let mut config = config("http://localhost".to_string());
        config.from_number = None;
        assert!(!SmsTransport::new(config).is_enabled());
    }
}
