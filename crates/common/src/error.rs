use thiserror::Error;

/// Common error types used across the workspace.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// SQLSTATE codes worth retrying: serialization failure, deadlock, admin
/// shutdown, and the idle-in-transaction session timeout.
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01", "57P01", "25P03"];

impl AppError {
    /// Whether the failed operation can be retried as-is after a backoff.
    ///
    /// Structural errors (bad configuration, schema mismatch, validation)
    /// are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Database(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db_err) => db_err
                    .code()
                    .is_some_and(|code| TRANSIENT_SQLSTATES.contains(&code.as_ref())),
                _ => false,
            },
            AppError::Rpc(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_errors_are_transient() {
        assert!(AppError::Rpc("connection reset".into()).is_transient());
        assert!(AppError::Database(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn test_structural_errors_are_not_transient() {
        assert!(!AppError::Config("missing DATABASE_URL".into()).is_transient());
        assert!(!AppError::Validation("bad transport".into()).is_transient());
        assert!(!AppError::Database(sqlx::Error::RowNotFound).is_transient());
    }
}
