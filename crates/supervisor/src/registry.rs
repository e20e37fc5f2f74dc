//! Service registry: heartbeat rows and the election protocol.
//!
//! At most one registration per service name may be `enabled`. Every
//! heartbeat serializes on a transaction-scoped advisory lock for the service
//! name and locks all of its rows, so two instances can never both observe a
//! missing leader and both promote themselves. The partial unique index
//! `services_one_enabled_idx` rejects any write that would break the rule.

use std::time::Duration;

use sqlx::{PgConnection, PgExecutor, PgPool};

use yo_common::error::AppError;
use yo_common::types::{ServiceRegistration, ServiceStatus};

/// Insert a new, disabled registration.
pub async fn register<'e, E: PgExecutor<'e>>(
    executor: E,
    service_name: &str,
    extra: &serde_json::Value,
) -> Result<ServiceRegistration, AppError> {
    let registration: ServiceRegistration = sqlx::query_as(
        r#"
        INSERT INTO services (service_name, status, extra)
        VALUES ($1, 'disabled', $2)
        RETURNING id, service_name, status, extra, updated_at
        "#,
    )
    .bind(service_name)
    .bind(extra)
    .fetch_one(executor)
    .await?;

    tracing::info!(
        service_name,
        service_id = registration.id,
        "Service registered"
    );
    Ok(registration)
}

/// Remove a registration. Removing an unknown id is not an error.
pub async fn deregister<'e, E: PgExecutor<'e>>(
    executor: E,
    service_id: i64,
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM services WHERE id = $1")
        .bind(service_id)
        .execute(executor)
        .await?;

    tracing::info!(service_id, "Service deregistered");
    Ok(())
}

/// Delete registrations whose heartbeat is older than `stale_after`.
pub async fn prune<'e, E: PgExecutor<'e>>(
    executor: E,
    stale_after: Duration,
) -> Result<u64, AppError> {
    let result = sqlx::query(
        "DELETE FROM services WHERE updated_at < NOW() - make_interval(secs => $1)",
    )
    .bind(stale_after.as_secs_f64())
    .execute(executor)
    .await?;

    let pruned = result.rows_affected();
    if pruned > 0 {
        tracing::info!(pruned, "Pruned stale service registrations");
    }
    Ok(pruned)
}

/// All registrations for a service name, lowest id first.
pub async fn list<'e, E: PgExecutor<'e>>(
    executor: E,
    service_name: &str,
) -> Result<Vec<ServiceRegistration>, AppError> {
    let rows: Vec<ServiceRegistration> = sqlx::query_as(
        r#"
        SELECT id, service_name, status, extra, updated_at
        FROM services WHERE service_name = $1
        ORDER BY id
        "#,
    )
    .bind(service_name)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

/// One round of the election protocol for the calling instance.
///
/// Prunes stale rows, registers the caller if `service_id` is unknown, and
/// repairs the enabled count when it is not exactly one by enabling the
/// caller. Returns the caller's registration as stored afterwards.
pub async fn heartbeat(
    pool: &PgPool,
    service_name: &str,
    service_id: Option<i64>,
    extra: &serde_json::Value,
    stale_after: Duration,
) -> Result<ServiceRegistration, AppError> {
    prune(pool, stale_after).await?;

    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(service_name)
        .execute(&mut *tx)
        .await?;

    let peers: Vec<ServiceRegistration> = sqlx::query_as(
        r#"
        SELECT id, service_name, status, extra, updated_at
        FROM services WHERE service_name = $1
        ORDER BY id
        FOR UPDATE
        "#,
    )
    .bind(service_name)
    .fetch_all(&mut *tx)
    .await?;

    let own_id = match service_id.filter(|id| peers.iter().any(|p| p.id == *id)) {
        Some(id) => id,
        None => register(&mut *tx, service_name, extra).await?.id,
    };

    let enabled = peers
        .iter()
        .filter(|p| p.status == ServiceStatus::Enabled)
        .count();

    let registration = if enabled != 1 {
        tracing::info!(
            service_name,
            service_id = own_id,
            enabled,
            "Enabled count is not 1, electing this instance"
        );
        elect(&mut tx, service_name, own_id).await?
    } else {
        touch(&mut tx, own_id, extra).await?
    };

    tx.commit().await?;
    Ok(registration)
}

/// Disable every instance of `service_name`, then enable `service_id`.
async fn elect(
    conn: &mut PgConnection,
    service_name: &str,
    service_id: i64,
) -> Result<ServiceRegistration, AppError> {
    sqlx::query("UPDATE services SET status = 'disabled' WHERE service_name = $1 AND status = 'enabled'")
        .bind(service_name)
        .execute(&mut *conn)
        .await?;

    let registration: ServiceRegistration = sqlx::query_as(
        r#"
        UPDATE services SET status = 'enabled', updated_at = NOW()
        WHERE id = $1
        RETURNING id, service_name, status, extra, updated_at
        "#,
    )
    .bind(service_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(registration)
}

/// Refresh the heartbeat timestamp and metadata of one registration.
async fn touch(
    conn: &mut PgConnection,
    service_id: i64,
    extra: &serde_json::Value,
) -> Result<ServiceRegistration, AppError> {
    let registration: ServiceRegistration = sqlx::query_as(
        r#"
        UPDATE services SET updated_at = NOW(), extra = $2
        WHERE id = $1
        RETURNING id, service_name, status, extra, updated_at
        "#,
    )
    .bind(service_id)
    .bind(extra)
    .fetch_one(&mut *conn)
    .await?;

    Ok(registration)
}
