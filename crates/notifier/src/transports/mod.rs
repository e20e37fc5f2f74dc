//! Delivery channels.
//!
//! - `poll`: rows in `poll_notifications` read back by front-ends
//! - `email`: SendGrid v3 mail API
//! - `sms`: Twilio Messages API
//! - `push`: JSON relayed to a push gateway

mod email;
mod poll;
mod push;
mod sms;

pub use email::{EmailConfig, EmailTransport};
pub use poll::PollTransport;
pub use push::PushTransport;
pub use sms::{SmsConfig, SmsTransport};

use async_trait::async_trait;
use serde_json::Value;

use yo_common::types::{JobPayload, TransportKind};

use crate::error::DeliveryError;
use crate::render::{self, Message};

/// Which piece of contact data a transport needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactField {
    Username,
    Email,
    Phone,
    PushSubscription,
}

/// Resolved address of the recipient.
#[derive(Debug, Clone, PartialEq)]
pub enum Contact {
    /// Username, email address or phone number.
    Address(String),
    /// Browser push subscription as submitted by the client.
    Subscription(Value),
}

impl Contact {
    pub fn address(&self) -> Option<&str> {
        match self {
            Contact::Address(address) => Some(address),
            Contact::Subscription(_) => None,
        }
    }
}

/// Everything an adapter needs to deliver one job.
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    pub job: &'a JobPayload,
    pub contact: &'a Contact,
    pub message: &'a Message,
}

/// A delivery channel.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Whether the adapter has what it needs to reach its provider. A
    /// disabled adapter accepts deliveries and drops them.
    fn is_enabled(&self) -> bool;

    fn contact_field(&self) -> ContactField;

    fn render(&self, job: &JobPayload) -> Message {
        render::render(job)
    }

    async fn send(&self, delivery: &Delivery<'_>) -> Result<(), DeliveryError>;
}

/// Log and drop a delivery for an adapter that is not configured.
fn skip_disabled(kind: TransportKind, delivery: &Delivery<'_>) {
    tracing::info!(
        transport = %kind,
        notification_id = delivery.job.notification_id,
        to_username = %delivery.job.to_username,
        "Transport not configured, skipping delivery"
    );
}

/// Read an error response body for logging, tolerating failures.
async fn error_body(response: reqwest::Response) -> String {
    response.text().await.unwrap_or_default()
}
