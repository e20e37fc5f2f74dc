//! Notification store: idempotent creation and fan-out into queue jobs.
//!
//! A notification is identified by `(eid, to_username)`. Creating the same
//! pair twice succeeds both times and stores it once, so the follower can
//! replay blocks freely. The insert, the preference lookup and the job fan-out
//! share one transaction: either the notification and all of its jobs exist,
//! or none of them do.

use sqlx::{PgConnection, PgPool};

use yo_common::error::AppError;
use yo_common::types::{JobPayload, NewNotification, Notification, TransportKind};

use crate::queue::WorkQueue;
use crate::users::UserStore;

/// Result of a single create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created { id: i64, jobs: usize },
    Duplicate,
}

/// Totals for a stored batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub created: usize,
    pub duplicates: usize,
    pub jobs: usize,
}

impl BatchSummary {
    pub fn add(&mut self, outcome: CreateOutcome) {
        match outcome {
            CreateOutcome::Created { jobs, .. } => {
                self.created += 1;
                self.jobs += jobs;
            }
            CreateOutcome::Duplicate => self.duplicates += 1,
        }
    }
}

/// Service layer for the `notifications` table.
pub struct NotificationStore;

impl NotificationStore {
    /// Store one notification and enqueue a job per enabled transport.
    pub async fn create_notification(
        pool: &PgPool,
        notification: &NewNotification,
    ) -> Result<CreateOutcome, AppError> {
        let mut tx = pool.begin().await?;
        let outcome = Self::create_in(&mut tx, notification).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Store a batch of notifications in one transaction.
    pub async fn create_notifications(
        pool: &PgPool,
        batch: &[NewNotification],
    ) -> Result<BatchSummary, AppError> {
        let mut summary = BatchSummary::default();
        if batch.is_empty() {
            return Ok(summary);
        }

        let mut tx = pool.begin().await?;
        for notification in batch {
            summary.add(Self::create_in(&mut tx, notification).await?);
        }
        tx.commit().await?;

        tracing::info!(
            created = summary.created,
            duplicates = summary.duplicates,
            jobs = summary.jobs,
            "Notification batch stored"
        );
        Ok(summary)
    }

    /// Insert + fan-out on an already open transaction.
    pub async fn create_in(
        conn: &mut PgConnection,
        notification: &NewNotification,
    ) -> Result<CreateOutcome, AppError> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO notifications (eid, notify_type, to_username, from_username, payload, priority)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (eid, to_username) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&notification.eid)
        .bind(notification.notify_type)
        .bind(&notification.to_username)
        .bind(&notification.from_username)
        .bind(&notification.payload)
        .bind(notification.priority)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(id) = id else {
            tracing::debug!(
                eid = %notification.eid,
                to_username = %notification.to_username,
                "Duplicate notification"
            );
            return Ok(CreateOutcome::Duplicate);
        };

        let transports =
            UserStore::transports_for(conn, &notification.to_username, notification.notify_type)
                .await?;
        if transports.is_empty() {
            return Ok(CreateOutcome::Created { id, jobs: 0 });
        }

        let payload = JobPayload {
            notification_id: id,
            eid: notification.eid.clone(),
            notify_type: notification.notify_type,
            to_username: notification.to_username.clone(),
            from_username: notification.from_username.clone(),
            data: notification.payload.clone(),
            priority: notification.priority,
        };
        let jobs: Vec<(JobPayload, TransportKind)> = transports
            .iter()
            .map(|transport| (payload.clone(), *transport))
            .collect();
        WorkQueue::enqueue_many(conn, &jobs).await?;

        tracing::debug!(
            notification_id = id,
            notify_type = %notification.notify_type,
            to_username = %notification.to_username,
            jobs = jobs.len(),
            "Notification created"
        );

        Ok(CreateOutcome::Created {
            id,
            jobs: jobs.len(),
        })
    }

    /// Fetch a stored notification.
    pub async fn get(pool: &PgPool, id: i64) -> Result<Notification, AppError> {
        sqlx::query_as(
            r#"
            SELECT id, eid, notify_type, to_username, from_username, payload, priority, created_at
            FROM notifications WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))
    }

    /// Notifications addressed to `username`, newest first.
    pub async fn list_for_user(
        pool: &PgPool,
        username: &str,
        limit: i64,
    ) -> Result<Vec<Notification>, AppError> {
        let rows: Vec<Notification> = sqlx::query_as(
            r#"
            SELECT id, eid, notify_type, to_username, from_username, payload, priority, created_at
            FROM notifications
            WHERE to_username = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(username)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}
