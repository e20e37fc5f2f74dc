//! Generic supervisor giving any long-running role at-most-one-active-instance
//! semantics across processes.
//!
//! The supervisor heartbeats on a fixed interval. When the registry reports
//! this instance as enabled it starts the role task; when it reports disabled
//! it cancels the task and waits for it to finish. On shutdown the role is
//! stopped first and the registration deleted afterwards, so a successor can
//! be elected on its next heartbeat.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use yo_common::config::AppConfig;
use yo_common::types::ServiceStatus;

use crate::registry;

/// A long-running role that must have at most one active instance.
#[async_trait]
pub trait ServiceRole: Send + Sync + 'static {
    /// Election key shared by all instances of this role.
    fn name(&self) -> String;

    /// Metadata stored with the registration.
    fn extra(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    /// Main task. Must return promptly once `cancel` fires, finishing any
    /// in-flight unit of work first.
    async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// Timing of the heartbeat protocol.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub heartbeat_interval: Duration,
    pub stale_after: Duration,
}

impl SupervisorConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            stale_after: Duration::from_secs(config.service_stale_after_secs),
        }
    }

    /// Time without a successful heartbeat after which a running role is
    /// stopped locally. Peers may prune this instance and elect a successor
    /// at `stale_after`; demotion is only checked on heartbeat ticks, so it
    /// must fire one interval earlier.
    pub fn demote_after(&self) -> Duration {
        self.stale_after.saturating_sub(self.heartbeat_interval)
    }
}

/// Lifecycle of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Unregistered,
    Disabled,
    Enabled,
}

impl From<ServiceStatus> for InstanceStatus {
    fn from(status: ServiceStatus) -> Self {
        match status {
            ServiceStatus::Disabled => InstanceStatus::Disabled,
            ServiceStatus::Enabled => InstanceStatus::Enabled,
        }
    }
}

/// Snapshot published after every heartbeat.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceState {
    pub service_name: String,
    pub instance: Uuid,
    pub service_id: Option<i64>,
    pub status: InstanceStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// What the supervisor must do with the role task after a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Stop,
    Keep,
}

/// Decide the role transition from the registry's verdict.
pub fn transition(status: ServiceStatus, running: bool) -> Transition {
    match (status, running) {
        (ServiceStatus::Enabled, false) => Transition::Start,
        (ServiceStatus::Disabled, true) => Transition::Stop,
        _ => Transition::Keep,
    }
}

/// Whether an instance that cannot reach the registry must stop its role.
pub fn must_self_demote(since_last_ok: Duration, config: &SupervisorConfig, running: bool) -> bool {
    running && since_last_ok >= config.demote_after()
}

struct RoleTask {
    cancel: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

/// Runs one [`ServiceRole`] under the heartbeat protocol.
pub struct Supervisor<R: ServiceRole> {
    pool: PgPool,
    role: Arc<R>,
    config: SupervisorConfig,
    instance: Uuid,
    state_tx: watch::Sender<InstanceState>,
}

impl<R: ServiceRole> Supervisor<R> {
    pub fn new(pool: PgPool, role: R, config: SupervisorConfig) -> Self {
        let instance = Uuid::new_v4();
        let (state_tx, _) = watch::channel(InstanceState {
            service_name: role.name(),
            instance,
            service_id: None,
            status: InstanceStatus::Unregistered,
            last_heartbeat: None,
        });

        Self {
            pool,
            role: Arc::new(role),
            config,
            instance,
            state_tx,
        }
    }

    /// Receiver for state snapshots, used by the health endpoint.
    pub fn subscribe(&self) -> watch::Receiver<InstanceState> {
        self.state_tx.subscribe()
    }

    fn extra(&self) -> serde_json::Value {
        let mut extra = serde_json::json!({
            "instance": self.instance.to_string(),
            "pid": std::process::id(),
            "version": env!("CARGO_PKG_VERSION"),
        });
        if let (Some(base), serde_json::Value::Object(role_extra)) =
            (extra.as_object_mut(), self.role.extra())
        {
            base.extend(role_extra);
        }
        extra
    }

    /// Heartbeat until `shutdown` fires, then stop the role and deregister.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let service_name = self.role.name();
        let extra = self.extra();
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut service_id: Option<i64> = None;
        let mut task: Option<RoleTask> = None;
        let mut last_ok = Instant::now();

        tracing::info!(service_name = %service_name, instance = %self.instance, "Supervisor starting");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            if task.as_ref().is_some_and(|t| t.handle.is_finished()) {
                if let Some(finished) = task.take() {
                    Self::reap(&service_name, finished).await;
                }
            }

            match registry::heartbeat(
                &self.pool,
                &service_name,
                service_id,
                &extra,
                self.config.stale_after,
            )
            .await
            {
                Ok(registration) => {
                    last_ok = Instant::now();
                    service_id = Some(registration.id);

                    match transition(registration.status, task.is_some()) {
                        Transition::Start => {
                            tracing::info!(
                                service_name = %service_name,
                                service_id = registration.id,
                                "Instance enabled, starting role"
                            );
                            task = Some(self.start_role());
                        }
                        Transition::Stop => {
                            tracing::info!(
                                service_name = %service_name,
                                service_id = registration.id,
                                "Instance disabled, stopping role"
                            );
                            if let Some(running) = task.take() {
                                Self::stop_role(&service_name, running).await;
                            }
                        }
                        Transition::Keep => {}
                    }

                    self.publish(
                        Some(registration.id),
                        registration.status.into(),
                        Some(registration.updated_at),
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        service_name = %service_name,
                        error = %e,
                        "Heartbeat failed"
                    );
                    if must_self_demote(last_ok.elapsed(), &self.config, task.is_some()) {
                        tracing::warn!(
                            service_name = %service_name,
                            "No successful heartbeat before the stale window closes, demoting"
                        );
                        if let Some(running) = task.take() {
                            Self::stop_role(&service_name, running).await;
                        }
                        self.publish(service_id, InstanceStatus::Disabled, None);
                    }
                }
            }
        }

        tracing::info!(service_name = %service_name, "Supervisor shutting down");
        if let Some(running) = task.take() {
            Self::stop_role(&service_name, running).await;
        }
        if let Some(id) = service_id {
            if let Err(e) = registry::deregister(&self.pool, id).await {
                tracing::warn!(service_name = %service_name, error = %e, "Deregister failed");
            }
        }
        self.publish(None, InstanceStatus::Unregistered, None);

        Ok(())
    }

    fn start_role(&self) -> RoleTask {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.role).run(cancel.clone()));
        RoleTask { cancel, handle }
    }

    async fn stop_role(service_name: &str, task: RoleTask) {
        task.cancel.cancel();
        Self::reap(service_name, task).await;
    }

    async fn reap(service_name: &str, task: RoleTask) {
        match task.handle.await {
            Ok(Ok(())) => tracing::info!(service_name, "Role stopped"),
            Ok(Err(e)) => tracing::error!(service_name, error = %e, "Role exited with error"),
            Err(e) => tracing::error!(service_name, error = %e, "Role task panicked"),
        }
    }

    fn publish(
        &self,
        service_id: Option<i64>,
        status: InstanceStatus,
        last_heartbeat: Option<DateTime<Utc>>,
    ) {
        self.state_tx.send_modify(|state| {
            state.service_id = service_id;
            state.status = status;
            if last_heartbeat.is_some() {
                state.last_heartbeat = last_heartbeat;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion_starts_role() {
        assert_eq!(transition(ServiceStatus::Enabled, false), Transition::Start);
    }

    #[test]
    fn test_demotion_stops_role() {
        assert_eq!(transition(ServiceStatus::Disabled, true), Transition::Stop);
    }

    #[test]
    fn test_steady_states_keep_role() {
        assert_eq!(transition(ServiceStatus::Enabled, true), Transition::Keep);
        assert_eq!(transition(ServiceStatus::Disabled, false), Transition::Keep);
    }

    #[test]
    fn test_self_demotion_one_interval_before_stale() {
        let config = SupervisorConfig {
            heartbeat_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(25),
        };
        assert_eq!(config.demote_after(), Duration::from_secs(15));
        assert!(!must_self_demote(Duration::from_secs(10), &config, true));
        assert!(must_self_demote(Duration::from_secs(15), &config, true));
        assert!(!must_self_demote(Duration::from_secs(60), &config, false));

        // The last tick before peers can prune us must already demote.
        let last_tick_before_stale = Duration::from_secs(20);
        assert!(last_tick_before_stale < config.stale_after);
        assert!(must_self_demote(last_tick_before_stale, &config, true));
    }

    #[test]
    fn test_demote_after_with_interval_beyond_stale_window() {
        let config = SupervisorConfig {
            heartbeat_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(25),
        };
        assert_eq!(config.demote_after(), Duration::ZERO);
        assert!(must_self_demote(Duration::from_millis(1), &config, true));
    }

    #[test]
    fn test_instance_status_from_service_status() {
        assert_eq!(
            InstanceStatus::from(ServiceStatus::Enabled),
            InstanceStatus::Enabled
        );
        assert_eq!(
            serde_json::to_value(InstanceStatus::Unregistered).unwrap(),
            serde_json::json!("unregistered")
        );
    }
}
