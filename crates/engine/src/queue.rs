//! Work queue: durable delivery jobs claimed with `FOR UPDATE SKIP LOCKED`.
//!
//! A claim deletes the row inside a transaction that the caller holds until
//! the job's outcome is known. Committing makes the removal permanent;
//! rolling back (explicitly or by dropping the claim) puts the job back.
//! Concurrent claimants skip rows locked by another claim instead of
//! waiting on them. A job returned with [`ClaimedJob::retry_after`] is not
//! claimable again until its `not_before` time has passed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Transaction};

use yo_common::error::AppError;
use yo_common::types::{JobPayload, QueueJob, TransportKind};

use crate::actions::AuditLedger;

/// A claimed row before its payload is decoded.
#[derive(sqlx::FromRow)]
struct RawJob {
    id: i64,
    payload: Value,
    transport: TransportKind,
    enqueued_at: DateTime<Utc>,
}

/// Handle to the `queue` table.
#[derive(Clone)]
pub struct WorkQueue {
    pool: PgPool,
}

impl WorkQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one job and return its id.
    pub async fn enqueue(
        &self,
        payload: &JobPayload,
        transport: TransportKind,
    ) -> Result<i64, AppError> {
        let id: i64 =
            sqlx::query_scalar("INSERT INTO queue (payload, transport) VALUES ($1, $2) RETURNING id")
                .bind(Json(payload))
                .bind(transport)
                .fetch_one(&self.pool)
                .await?;

        tracing::debug!(job_id = id, transport = %transport, "Job enqueued");
        Ok(id)
    }

    /// Append several jobs on `conn`, typically inside the transaction that
    /// created the notification they deliver.
    pub async fn enqueue_many(
        conn: &mut PgConnection,
        jobs: &[(JobPayload, TransportKind)],
    ) -> Result<Vec<i64>, AppError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO queue (payload, transport) ");
        builder.push_values(jobs, |mut row, (payload, transport)| {
            row.push_bind(Json(payload)).push_bind(*transport);
        });
        builder.push(" RETURNING id");

        let ids = builder
            .build_query_scalar::<i64>()
            .fetch_all(&mut *conn)
            .await?;
        Ok(ids)
    }

    /// Claim the oldest due job, optionally restricted to one transport.
    ///
    /// Returns `None` when nothing is claimable. The returned claim owns an
    /// open transaction and must be committed or aborted. A row whose
    /// payload cannot be decoded is removed with a `perm_failed` ledger
    /// entry, when it names a known notification, and the next row is tried.
    pub async fn claim(
        &self,
        transport: Option<TransportKind>,
    ) -> Result<Option<ClaimedJob>, AppError> {
        loop {
            let mut tx = self.pool.begin().await?;

            let row: Option<RawJob> = sqlx::query_as(
                r#"
                DELETE FROM queue
                WHERE id = (
                    SELECT id FROM queue
                    WHERE ($1::text IS NULL OR transport = $1)
                      AND not_before <= NOW()
                    ORDER BY id
                    FOR UPDATE SKIP LOCKED
                    LIMIT 1
                )
                RETURNING id, payload, transport, enqueued_at
                "#,
            )
            .bind(transport)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = row else {
                tx.rollback().await?;
                return Ok(None);
            };

            match serde_json::from_value::<JobPayload>(row.payload.clone()) {
                Ok(payload) => {
                    tracing::debug!(job_id = row.id, transport = %row.transport, "Job claimed");
                    let job = QueueJob {
                        id: row.id,
                        payload: Json(payload),
                        transport: row.transport,
                        enqueued_at: row.enqueued_at,
                    };
                    return Ok(Some(ClaimedJob { tx, job }));
                }
                Err(e) => {
                    drop_undecodable(&mut tx, &row, &e).await?;
                    tx.commit().await?;
                }
            }
        }
    }

    /// Number of pending jobs, optionally for one transport.
    ///
    /// Rows held by an open claim or waiting out a retry delay are counted.
    pub async fn size(&self, transport: Option<TransportKind>) -> Result<i64, AppError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queue WHERE ($1::text IS NULL OR transport = $1)")
                .bind(transport)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

/// A job removed from the queue under an open transaction.
pub struct ClaimedJob {
    tx: Transaction<'static, Postgres>,
    job: QueueJob,
}

impl ClaimedJob {
    pub fn job(&self) -> &QueueJob {
        &self.job
    }

    pub fn payload(&self) -> &JobPayload {
        &self.job.payload
    }

    pub fn transport(&self) -> TransportKind {
        self.job.transport
    }

    /// Connection of the claim transaction. Writes made here commit or roll
    /// back together with the job's removal.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    /// Remove the job for good.
    pub async fn commit(self) -> Result<(), AppError> {
        let job_id = self.job.id;
        self.tx.commit().await?;
        tracing::debug!(job_id, "Job completed");
        Ok(())
    }

    /// Return the job to the queue.
    pub async fn abort(self) -> Result<(), AppError> {
        let job_id = self.job.id;
        self.tx.rollback().await?;
        tracing::debug!(job_id, "Job returned to queue");
        Ok(())
    }

    /// Put the job back under its original id, claimable once `delay` has
    /// passed, and commit. Ledger writes made on [`conn`](Self::conn) commit
    /// with it.
    pub async fn retry_after(mut self, delay: Duration) -> Result<(), AppError> {
        let job_id = self.job.id;
        sqlx::query(
            r#"
            INSERT INTO queue (id, payload, transport, enqueued_at, not_before)
            VALUES ($1, $2, $3, $4, clock_timestamp() + make_interval(secs => $5))
            "#,
        )
        .bind(job_id)
        .bind(&self.job.payload)
        .bind(self.job.transport)
        .bind(self.job.enqueued_at)
        .bind(delay.as_secs_f64())
        .execute(&mut *self.tx)
        .await?;
        self.tx.commit().await?;

        tracing::debug!(job_id, delay = ?delay, "Job returned to queue with delay");
        Ok(())
    }
}

async fn drop_undecodable(
    conn: &mut PgConnection,
    row: &RawJob,
    error: &serde_json::Error,
) -> Result<(), AppError> {
    let notification_id = row.payload.get("notification_id").and_then(Value::as_i64);
    let username = row.payload.get("to_username").and_then(Value::as_str);
    tracing::error!(
        job_id = row.id,
        transport = %row.transport,
        notification_id = ?notification_id,
        error = %error,
        "Dropping job with undecodable payload"
    );

    if let (Some(notification_id), Some(username)) = (notification_id, username) {
        AuditLedger::record_undeliverable(conn, notification_id, username, row.transport).await?;
    }
    Ok(())
}
