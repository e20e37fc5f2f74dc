//! Audit ledger: one append-only row per delivery attempt.
//!
//! The ledger is the only memory the delivery side has: rate limits count
//! `sent` rows, and failure escalation counts `failed` rows.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use yo_common::error::AppError;
use yo_common::types::{Action, ActionStatus, TransportKind};

/// Consecutive transient failures after which the next failure is permanent.
pub const PERMANENT_FAIL_COUNT: i64 = 3;

/// Number of `sent` actions within one clock hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct HourBucket {
    pub hour: DateTime<Utc>,
    pub count: i64,
}

/// Service layer for the `actions` table.
pub struct AuditLedger;

impl AuditLedger {
    /// Append an action.
    pub async fn record<'e, E: PgExecutor<'e>>(
        executor: E,
        notification_id: i64,
        username: &str,
        transport: TransportKind,
        status: ActionStatus,
    ) -> Result<Action, AppError> {
        let action: Action = sqlx::query_as(
            r#"
            INSERT INTO actions (notification_id, username, transport, status)
            VALUES ($1, $2, $3, $4)
            RETURNING id, notification_id, username, transport, status, created_at
            "#,
        )
        .bind(notification_id)
        .bind(username)
        .bind(transport)
        .bind(status)
        .fetch_one(executor)
        .await?;

        tracing::debug!(
            action_id = action.id,
            notification_id,
            username,
            transport = %transport,
            status = %status,
            "Action recorded"
        );

        Ok(action)
    }

    /// Append `perm_failed` for a job that can never be delivered. Returns
    /// `false` without writing when the notification does not exist.
    pub async fn record_undeliverable<'e, E: PgExecutor<'e>>(
        executor: E,
        notification_id: i64,
        username: &str,
        transport: TransportKind,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO actions (notification_id, username, transport, status)
            SELECT $1, $2, $3, $4
            WHERE EXISTS (SELECT 1 FROM notifications WHERE id = $1)
            "#,
        )
        .bind(notification_id)
        .bind(username)
        .bind(transport)
        .bind(ActionStatus::PermFailed)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Most recent status for a notification on one transport.
    pub async fn latest_status<'e, E: PgExecutor<'e>>(
        executor: E,
        notification_id: i64,
        transport: TransportKind,
    ) -> Result<Option<ActionStatus>, AppError> {
        let status: Option<ActionStatus> = sqlx::query_scalar(
            r#"
            SELECT status FROM actions
            WHERE notification_id = $1 AND transport = $2
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(notification_id)
        .bind(transport)
        .fetch_optional(executor)
        .await?;

        Ok(status)
    }

    /// `failed` actions since the latest `sent` or `perm_failed` for this
    /// notification and transport. `rate_limited` rows neither count nor reset.
    pub async fn consecutive_failures<'e, E: PgExecutor<'e>>(
        executor: E,
        notification_id: i64,
        transport: TransportKind,
    ) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM actions
            WHERE notification_id = $1
              AND transport = $2
              AND status = 'failed'
              AND id > COALESCE((
                  SELECT MAX(id) FROM actions
                  WHERE notification_id = $1
                    AND transport = $2
                    AND status IN ('sent', 'perm_failed')
              ), 0)
            "#,
        )
        .bind(notification_id)
        .bind(transport)
        .fetch_one(executor)
        .await?;

        Ok(count)
    }

    /// `sent` actions for a user on one transport over the trailing day,
    /// grouped by clock hour, oldest first.
    pub async fn sent_counts<'e, E: PgExecutor<'e>>(
        executor: E,
        username: &str,
        transport: TransportKind,
        now: DateTime<Utc>,
    ) -> Result<Vec<HourBucket>, AppError> {
        let buckets: Vec<HourBucket> = sqlx::query_as(
            r#"
            SELECT date_trunc('hour', created_at, 'UTC') AS hour, COUNT(*) AS count
            FROM actions
            WHERE username = $1
              AND transport = $2
              AND status = 'sent'
              AND created_at >= $3 - INTERVAL '1 day'
            GROUP BY 1
            ORDER BY 1
            "#,
        )
        .bind(username)
        .bind(transport)
        .bind(now)
        .fetch_all(executor)
        .await?;

        Ok(buckets)
    }

    /// Serialize rate checks for one recipient on one transport until the
    /// surrounding transaction ends.
    pub async fn lock_recipient<'e, E: PgExecutor<'e>>(
        executor: E,
        username: &str,
        transport: TransportKind,
    ) -> Result<(), AppError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1 || '/' || $2))")
            .bind(username)
            .bind(transport)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Full history for a notification, oldest first.
    pub async fn history<'e, E: PgExecutor<'e>>(
        executor: E,
        notification_id: i64,
    ) -> Result<Vec<Action>, AppError> {
        let actions: Vec<Action> = sqlx::query_as(
            r#"
            SELECT id, notification_id, username, transport, status, created_at
            FROM actions
            WHERE notification_id = $1
            ORDER BY id
            "#,
        )
        .bind(notification_id)
        .fetch_all(executor)
        .await?;

        Ok(actions)
    }

    /// Status to record for a transient failure, given how many consecutive
    /// failures the ledger already holds.
    pub fn escalate(prior_failures: i64) -> ActionStatus {
        if prior_failures >= PERMANENT_FAIL_COUNT {
            ActionStatus::PermFailed
        } else {
            ActionStatus::Failed
        }
    }

    /// Whether a job for this notification and transport must not be attempted
    /// again.
    pub fn is_settled(latest: Option<ActionStatus>) -> bool {
        matches!(
            latest,
            Some(ActionStatus::Sent) | Some(ActionStatus::PermFailed)
        )
    }
}
