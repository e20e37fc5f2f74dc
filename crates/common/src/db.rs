use std::str::FromStr;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

/// Create a PostgreSQL connection pool.
///
/// `max_connections` controls the maximum number of connections in the pool.
/// Pass `AppConfig::db_max_connections` for the user-configured value (default 20).
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Create a pool for queue workers.
///
/// Every connection gets `idle_in_transaction_session_timeout`, so a worker that
/// stalls while holding a claimed row has its session closed by the server and
/// the row becomes claimable again.
pub async fn create_worker_pool(
    database_url: &str,
    max_connections: u32,
    idle_in_transaction_timeout: Duration,
) -> anyhow::Result<PgPool> {
    let timeout_ms = idle_in_transaction_timeout.as_millis().to_string();
    let options = PgConnectOptions::from_str(database_url)?
        .options([("idle_in_transaction_session_timeout", timeout_ms.as_str())]);

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;

    tracing::info!(
        max_connections,
        idle_in_transaction_timeout_ms = idle_in_transaction_timeout.as_millis() as u64,
        "Connected to PostgreSQL (worker pool)"
    );
    Ok(pool)
}

/// Apply the workspace migrations.
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
