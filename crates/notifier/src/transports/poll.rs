use async_trait::async_trait;
use sqlx::PgPool;

use yo_common::types::TransportKind;
use yo_engine::PollStore;

use super::{ContactField, Delivery, Transport};
use crate::error::DeliveryError;

/// Stores the notification for front-ends to poll.
pub struct PollTransport {
    pool: PgPool,
}

impl PollTransport {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Transport for PollTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Poll
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn contact_field(&self) -> ContactField {
        ContactField::Username
    }

    async fn send(&self, delivery: &Delivery<'_>) -> Result<(), DeliveryError> {
        let inserted = PollStore::insert(&self.pool, delivery.job)
            .await
            .map_err(|e| {
                if e.is_transient() {
                    DeliveryError::Transient(e.to_string())
                } else {
                    DeliveryError::Permanent(e.to_string())
                }
            })?;

        if inserted.is_none() {
            tracing::debug!(
                notification_id = delivery.job.notification_id,
                "Poll entry already stored"
            );
        }
        Ok(())
    }
}
