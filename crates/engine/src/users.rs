//! User preference store: per-user transport settings.
//!
//! Users are never created explicitly. The first read or write for a
//! username creates the row, with `UserTransports::defaults()` on read.

use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use yo_common::error::AppError;
use yo_common::types::{NotificationType, TransportKind, UserTransports};

/// Service layer for the `users` table.
pub struct UserStore;

impl UserStore {
    /// Transport settings for `username`, creating the user with defaults
    /// if it does not exist yet.
    pub async fn get_user_transports(
        pool: &PgPool,
        username: &str,
    ) -> Result<UserTransports, AppError> {
        let mut conn = pool.acquire().await?;
        Self::load_or_create(&mut conn, username).await
    }

    /// Replace the transport settings for `username` with a validated
    /// payload, creating the user if needed.
    pub async fn set_user_transports(
        pool: &PgPool,
        username: &str,
        transports: &UserTransports,
    ) -> Result<(), AppError> {
        transports.validate()?;

        sqlx::query(
            r#"
            INSERT INTO users (username, transports)
            VALUES ($1, $2)
            ON CONFLICT (username)
            DO UPDATE SET transports = EXCLUDED.transports, updated_at = NOW()
            "#,
        )
        .bind(username)
        .bind(Json(transports))
        .execute(pool)
        .await?;

        tracing::info!(
            username,
            transports = transports.0.len(),
            "User transports updated"
        );

        Ok(())
    }

    /// Parse a raw JSON preference payload and store it.
    pub async fn set_user_transports_json(
        pool: &PgPool,
        username: &str,
        transports: serde_json::Value,
    ) -> Result<UserTransports, AppError> {
        let parsed = UserTransports::from_value(transports)?;
        Self::set_user_transports(pool, username, &parsed).await?;
        Ok(parsed)
    }

    /// Transports of `username` that accept `notify_type`, using `conn` so
    /// the lookup can share a notification's transaction.
    pub async fn transports_for(
        conn: &mut PgConnection,
        username: &str,
        notify_type: NotificationType,
    ) -> Result<Vec<TransportKind>, AppError> {
        let transports = Self::load_or_create(conn, username).await?;
        Ok(transports.enabled_for(notify_type))
    }

    /// Load a user's settings, inserting the defaults when absent.
    pub async fn load_or_create(
        conn: &mut PgConnection,
        username: &str,
    ) -> Result<UserTransports, AppError> {
        let existing: Option<Json<UserTransports>> =
            sqlx::query_scalar("SELECT transports FROM users WHERE username = $1")
                .bind(username)
                .fetch_optional(&mut *conn)
                .await?;
        if let Some(Json(transports)) = existing {
            return Ok(transports);
        }

        // A concurrent creator may win the insert; read back whatever is stored.
        let defaults = UserTransports::defaults();
        let stored: Json<UserTransports> = sqlx::query_scalar(
            r#"
            INSERT INTO users (username, transports)
            VALUES ($1, $2)
            ON CONFLICT (username) DO UPDATE SET username = EXCLUDED.username
            RETURNING transports
            "#,
        )
        .bind(username)
        .bind(Json(&defaults))
        .fetch_one(&mut *conn)
        .await?;

        tracing::debug!(username, "User created with default transports");
        Ok(stored.0)
    }
}
