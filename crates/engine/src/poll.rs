//! Poll store: notifications delivered to front-ends that poll for them.
//!
//! The `poll` transport writes here; the read-side API lists entries and
//! flips their shown/read markers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};

use yo_common::error::AppError;
use yo_common::types::{JobPayload, NotificationType, Priority};

/// A delivered poll notification.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PollNotification {
    pub id: i64,
    pub notification_id: i64,
    pub eid: String,
    pub notify_type: NotificationType,
    pub to_username: String,
    pub from_username: Option<String>,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub shown_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Optional filters for [`PollStore::list_for_user`].
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PollFilter {
    pub shown: Option<bool>,
    pub read: Option<bool>,
    pub limit: Option<i64>,
}

const DEFAULT_LIST_LIMIT: i64 = 100;

/// Service layer for the `poll_notifications` table.
pub struct PollStore;

impl PollStore {
    /// Insert the poll entry for a job. Idempotent on `notification_id`:
    /// returns `None` if the entry already exists.
    pub async fn insert<'e, E: PgExecutor<'e>>(
        executor: E,
        job: &JobPayload,
    ) -> Result<Option<i64>, AppError> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO poll_notifications
                (notification_id, eid, notify_type, to_username, from_username, payload, priority)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (notification_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(job.notification_id)
        .bind(&job.eid)
        .bind(job.notify_type)
        .bind(&job.to_username)
        .bind(&job.from_username)
        .bind(&job.data)
        .bind(job.priority)
        .fetch_optional(executor)
        .await?;

        Ok(id)
    }

    /// Entries for `username`, newest first.
    pub async fn list_for_user(
        pool: &PgPool,
        username: &str,
        filter: PollFilter,
    ) -> Result<Vec<PollNotification>, AppError> {
        let rows: Vec<PollNotification> = sqlx::query_as(
            r#"
            SELECT id, notification_id, eid, notify_type, to_username, from_username,
                   payload, priority, created_at, shown_at, read_at
            FROM poll_notifications
            WHERE to_username = $1
              AND ($2::boolean IS NULL OR (shown_at IS NOT NULL) = $2)
              AND ($3::boolean IS NULL OR (read_at IS NOT NULL) = $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#,
        )
        .bind(username)
        .bind(filter.shown)
        .bind(filter.read)
        .bind(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    pub async fn mark_shown(pool: &PgPool, id: i64) -> Result<(), AppError> {
        Self::update_marker(pool, id, "UPDATE poll_notifications SET shown_at = NOW() WHERE id = $1")
            .await
    }

    pub async fn mark_unshown(pool: &PgPool, id: i64) -> Result<(), AppError> {
        Self::update_marker(pool, id, "UPDATE poll_notifications SET shown_at = NULL WHERE id = $1")
            .await
    }

    pub async fn mark_read(pool: &PgPool, id: i64) -> Result<(), AppError> {
        Self::update_marker(pool, id, "UPDATE poll_notifications SET read_at = NOW() WHERE id = $1")
            .await
    }

    pub async fn mark_unread(pool: &PgPool, id: i64) -> Result<(), AppError> {
        Self::update_marker(pool, id, "UPDATE poll_notifications SET read_at = NULL WHERE id = $1")
            .await
    }

    async fn update_marker(pool: &PgPool, id: i64, sql: &'static str) -> Result<(), AppError> {
        let result = sqlx::query(sql).bind(id).execute(pool).await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Poll notification {} not found",
                id
            )));
        }
        Ok(())
    }
}
