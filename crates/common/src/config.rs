use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Deserialize;

use crate::types::TransportKind;

/// Hard send limits for one transport. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct HardLimit {
    pub per_hour: Option<u32>,
    pub per_day: Option<u32>,
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Chain node JSON-RPC URL
    pub steemd_url: String,

    /// First block to follow when no resume point is stored.
    /// Negative values mean "this many blocks behind the head", 0 means the head.
    pub follower_start_block: i64,

    /// Wait between polls once the follower has caught up (default: 3000)
    pub follower_poll_interval_ms: u64,

    /// Maximum number of blocks stored per notification batch (default: 1)
    pub follower_batch_blocks: u64,

    /// Interval between service heartbeats (default: 10)
    pub heartbeat_interval_secs: u64,

    /// Heartbeat age after which a registration is pruned (default: 25)
    pub service_stale_after_secs: u64,

    /// Longest time a claimed queue row may sit in an idle transaction (default: 5)
    pub queue_idle_tx_timeout_secs: u64,

    /// Concurrent claim loops per transport role (default: 4)
    pub dispatch_workers_per_transport: usize,

    /// Wait before re-claiming when the queue is empty (default: 500)
    pub dispatch_idle_wait_ms: u64,

    /// Wait after a transient delivery failure before the next claim (default: 2000)
    pub dispatch_failure_backoff_ms: u64,

    /// Directory service used to look up contact details not stored locally
    pub conveyor_url: Option<String>,

    /// SendGrid API key for email delivery
    pub sendgrid_api_key: Option<String>,

    /// Email sender address
    pub email_from: String,

    /// Twilio credentials for SMS delivery
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_from_number: Option<String>,

    /// Gateway that relays browser push messages
    pub push_gateway_url: Option<String>,

    /// Per-transport hard send limits
    pub rate_limits: BTreeMap<TransportKind, HardLimit>,

    /// Address for the `/health` endpoint; disabled when unset
    pub health_listen_addr: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut rate_limits = default_rate_limits();
        for kind in TransportKind::ALL {
            let name = kind.as_str().to_uppercase();
            let limit = rate_limits.entry(kind).or_default();
            if let Some(per_hour) = env_opt(&format!("RATE_LIMIT_{}_PER_HOUR", name))? {
                limit.per_hour = Some(per_hour);
            }
            if let Some(per_day) = env_opt(&format!("RATE_LIMIT_{}_PER_DAY", name))? {
                limit.per_day = Some(per_day);
            }
        }

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 20)?,
            steemd_url: std::env::var("STEEMD_URL")
                .unwrap_or_else(|_| "https://api.steemit.com".to_string()),
            follower_start_block: env_or("FOLLOWER_START_BLOCK", 0)?,
            follower_poll_interval_ms: env_or("FOLLOWER_POLL_INTERVAL_MS", 3000)?,
            follower_batch_blocks: env_or("FOLLOWER_BATCH_BLOCKS", 1)?,
            heartbeat_interval_secs: env_or("HEARTBEAT_INTERVAL_SECS", 10)?,
            service_stale_after_secs: env_or("SERVICE_STALE_AFTER_SECS", 25)?,
            queue_idle_tx_timeout_secs: env_or("QUEUE_IDLE_TX_TIMEOUT_SECS", 5)?,
            dispatch_workers_per_transport: env_or("DISPATCH_WORKERS_PER_TRANSPORT", 4)?,
            dispatch_idle_wait_ms: env_or("DISPATCH_IDLE_WAIT_MS", 500)?,
            dispatch_failure_backoff_ms: env_or("DISPATCH_FAILURE_BACKOFF_MS", 2000)?,
            conveyor_url: non_empty_var("CONVEYOR_URL"),
            sendgrid_api_key: non_empty_var("SENDGRID_API_KEY"),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "no-reply@steemit.com".to_string()),
            twilio_account_sid: non_empty_var("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: non_empty_var("TWILIO_AUTH_TOKEN"),
            twilio_from_number: non_empty_var("TWILIO_FROM_NUMBER"),
            push_gateway_url: non_empty_var("PUSH_GATEWAY_URL"),
            rate_limits,
            health_listen_addr: non_empty_var("HEALTH_LISTEN_ADDR"),
        };

        config.check()?;
        Ok(config)
    }

    /// Reject combinations that would make the services misbehave.
    fn check(&self) -> anyhow::Result<()> {
        if self.heartbeat_interval_secs == 0 {
            anyhow::bail!("HEARTBEAT_INTERVAL_SECS must be greater than zero");
        }
        if self.service_stale_after_secs <= self.heartbeat_interval_secs {
            anyhow::bail!(
                "SERVICE_STALE_AFTER_SECS ({}) must exceed HEARTBEAT_INTERVAL_SECS ({})",
                self.service_stale_after_secs,
                self.heartbeat_interval_secs
            );
        }
        if self.follower_batch_blocks == 0 {
            anyhow::bail!("FOLLOWER_BATCH_BLOCKS must be greater than zero");
        }
        if self.dispatch_workers_per_transport == 0 {
            anyhow::bail!("DISPATCH_WORKERS_PER_TRANSPORT must be greater than zero");
        }
        Ok(())
    }
}

/// Email and SMS are capped at one message per hour; poll and push are unlimited.
pub fn default_rate_limits() -> BTreeMap<TransportKind, HardLimit> {
    let hourly = HardLimit {
        per_hour: Some(1),
        per_day: None,
    };
    BTreeMap::from([
        (TransportKind::Email, hourly),
        (TransportKind::Sms, hourly),
        (TransportKind::Poll, HardLimit::default()),
        (TransportKind::Push, HardLimit::default()),
    ])
}

fn env_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                key,
                std::any::type_name::<T>()
            )
        }),
        Err(_) => Ok(default),
    }
}

fn env_opt<T: FromStr>(key: &str) -> anyhow::Result<Option<T>> {
    match non_empty_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} must be a valid {}", key, std::any::type_name::<T>())),
        None => Ok(None),
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rate_limits() {
        let limits = default_rate_limits();
        assert_eq!(limits[&TransportKind::Email].per_hour, Some(1));
        assert_eq!(limits[&TransportKind::Sms].per_hour, Some(1));
        assert_eq!(limits[&TransportKind::Poll], HardLimit::default());
        assert_eq!(limits[&TransportKind::Push].per_day, None);
    }

    #[test]
    fn test_env_or_falls_back_to_default() {
        let value: u64 = env_or("YO_TEST_UNSET_VARIABLE_FOR_CONFIG", 42).unwrap();
        assert_eq!(value, 42);
    }
}
