//! Queue consumers for one transport.
//!
//! A worker claims one job at a time and keeps the claim transaction open
//! while it delivers. The outcome is written to the audit ledger inside the
//! same transaction, so a job is either settled together with its ledger
//! entry or returned to the queue. A retryable failure returns the job with
//! its `failed` entry and a delay that grows with each consecutive failure,
//! so other loops cannot retry it before the delay has passed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use yo_common::config::AppConfig;
use yo_common::error::AppError;
use yo_common::types::{ActionStatus, JobPayload, TransportKind, TransportPreference};
use yo_engine::{AuditLedger, RateLimiter, UserStore, WorkQueue};
use yo_supervisor::ServiceRole;

use crate::directory::Directory;
use crate::error::DeliveryError;
use crate::stats::WorkerStats;
use crate::transports::{Contact, ContactField, Delivery, Transport};

/// What happened to one claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The queue had nothing for this transport.
    Idle,
    /// The job was already delivered or given up on; dropped.
    Skipped,
    Sent,
    RateLimited,
    /// Retryable failure; the job is back in the queue.
    Failed,
    PermFailed,
}

/// Timing of the claim loops.
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    pub workers: usize,
    pub idle_wait: Duration,
    pub failure_backoff: Duration,
    /// Upper bound on contact lookup plus delivery. Kept below the server's
    /// idle-in-transaction timeout so a slow provider does not kill the claim.
    pub send_timeout: Duration,
}

impl DispatchConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        let idle_tx_timeout = Duration::from_secs(config.queue_idle_tx_timeout_secs);
        Self {
            workers: config.dispatch_workers_per_transport,
            idle_wait: Duration::from_millis(config.dispatch_idle_wait_ms),
            failure_backoff: Duration::from_millis(config.dispatch_failure_backoff_ms),
            send_timeout: send_timeout_for(idle_tx_timeout),
        }
    }
}

fn send_timeout_for(idle_tx_timeout: Duration) -> Duration {
    (idle_tx_timeout * 4 / 5).max(Duration::from_secs(1))
}

/// Delay before a job is retried after its `prior_failures + 1`th failure.
fn retry_delay(backoff: Duration, prior_failures: i64) -> Duration {
    let exponent = prior_failures.clamp(0, 16) as u32;
    backoff.saturating_mul(1 << exponent)
}

/// Delivers queued jobs for one transport.
pub struct DispatchWorker {
    queue: WorkQueue,
    transport: Arc<dyn Transport>,
    directory: Arc<dyn Directory>,
    limiter: RateLimiter,
    config: DispatchConfig,
    stats: WorkerStats,
}

impl DispatchWorker {
    pub fn new(
        queue: WorkQueue,
        transport: Arc<dyn Transport>,
        directory: Arc<dyn Directory>,
        limiter: RateLimiter,
        config: DispatchConfig,
    ) -> Self {
        let stats = WorkerStats::new(transport.kind());
        Self {
            queue,
            transport,
            directory,
            limiter,
            config,
            stats,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Claim and settle at most one job.
    pub async fn process_next(&self) -> Result<DispatchOutcome, AppError> {
        let kind = self.kind();
        let Some(mut claim) = self.queue.claim(Some(kind)).await? else {
            return Ok(DispatchOutcome::Idle);
        };
        let job = claim.payload().clone();
        let notification_id = job.notification_id;
        let username = job.to_username.as_str();

        let latest = AuditLedger::latest_status(claim.conn(), notification_id, kind).await?;
        if AuditLedger::is_settled(latest) {
            tracing::debug!(
                notification_id,
                transport = %kind,
                latest = ?latest,
                "Job already settled, dropping"
            );
            claim.commit().await?;
            return Ok(DispatchOutcome::Skipped);
        }

        AuditLedger::lock_recipient(claim.conn(), username, kind).await?;
        let now = Utc::now();
        let buckets = AuditLedger::sent_counts(claim.conn(), username, kind, now).await?;
        let decision = self.limiter.check(kind, job.priority, &buckets, now);
        if !decision.is_allowed() {
            tracing::info!(
                notification_id,
                username,
                transport = %kind,
                decision = ?decision,
                "Rate limited"
            );
            AuditLedger::record(
                claim.conn(),
                notification_id,
                username,
                kind,
                ActionStatus::RateLimited,
            )
            .await?;
            claim.commit().await?;
            return Ok(DispatchOutcome::RateLimited);
        }

        let transports = UserStore::load_or_create(claim.conn(), username).await?;
        let result = match tokio::time::timeout(
            self.config.send_timeout,
            self.deliver(&job, transports.get(kind)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Transient(format!(
                "delivery did not finish within {:?}",
                self.config.send_timeout
            ))),
        };

        match result {
            Ok(()) => {
                AuditLedger::record(
                    claim.conn(),
                    notification_id,
                    username,
                    kind,
                    ActionStatus::Sent,
                )
                .await?;
                claim.commit().await?;
                Ok(DispatchOutcome::Sent)
            }
            Err(DeliveryError::Permanent(reason)) => {
                tracing::warn!(
                    notification_id,
                    username,
                    transport = %kind,
                    reason = %reason,
                    "Delivery failed permanently"
                );
                AuditLedger::record(
                    claim.conn(),
                    notification_id,
                    username,
                    kind,
                    ActionStatus::PermFailed,
                )
                .await?;
                claim.commit().await?;
                Ok(DispatchOutcome::PermFailed)
            }
            Err(DeliveryError::Transient(reason)) => {
                let prior =
                    AuditLedger::consecutive_failures(claim.conn(), notification_id, kind).await?;
                match AuditLedger::escalate(prior) {
                    ActionStatus::PermFailed => {
                        tracing::warn!(
                            notification_id,
                            username,
                            transport = %kind,
                            prior_failures = prior,
                            reason = %reason,
                            "Giving up after repeated failures"
                        );
                        AuditLedger::record(
                            claim.conn(),
                            notification_id,
                            username,
                            kind,
                            ActionStatus::PermFailed,
                        )
                        .await?;
                        claim.commit().await?;
                        Ok(DispatchOutcome::PermFailed)
                    }
                    status => {
                        let delay = retry_delay(self.config.failure_backoff, prior);
                        tracing::warn!(
                            notification_id,
                            username,
                            transport = %kind,
                            prior_failures = prior,
                            retry_in = ?delay,
                            reason = %reason,
                            "Delivery failed, job returned to queue"
                        );
                        AuditLedger::record(
                            claim.conn(),
                            notification_id,
                            username,
                            kind,
                            status,
                        )
                        .await?;
                        claim.retry_after(delay).await?;
                        Ok(DispatchOutcome::Failed)
                    }
                }
            }
        }
    }

    async fn deliver(
        &self,
        job: &JobPayload,
        preference: Option<&TransportPreference>,
    ) -> Result<(), DeliveryError> {
        let contact = self
            .resolve_contact(&job.to_username, preference)
            .await?
            .ok_or_else(|| {
                DeliveryError::Permanent(format!(
                    "no {} contact for {}",
                    self.kind(),
                    job.to_username
                ))
            })?;

        let message = self.transport.render(job);
        self.transport
            .send(&Delivery {
                job,
                contact: &contact,
                message: &message,
            })
            .await
    }

    /// Stored settings first, then the directory for email and phone.
    async fn resolve_contact(
        &self,
        username: &str,
        preference: Option<&TransportPreference>,
    ) -> Result<Option<Contact>, DeliveryError> {
        let field = self.transport.contact_field();
        match field {
            ContactField::Username => Ok(Some(Contact::Address(username.to_string()))),
            ContactField::PushSubscription => Ok(preference
                .map(|p| &p.sub_data)
                .filter(|data| data.is_object())
                .cloned()
                .map(Contact::Subscription)),
            ContactField::Email | ContactField::Phone => {
                if let Some(address) = preference.and_then(TransportPreference::contact) {
                    return Ok(Some(Contact::Address(address.to_string())));
                }

                let data = self.directory.lookup(username).await.map_err(|e| {
                    if e.is_transient() {
                        DeliveryError::Transient(e.to_string())
                    } else {
                        DeliveryError::Permanent(e.to_string())
                    }
                })?;
                let address = data.and_then(|d| match field {
                    ContactField::Email => d.email,
                    _ => d.phone,
                });
                Ok(address
                    .filter(|a| !a.trim().is_empty())
                    .map(Contact::Address))
            }
        }
    }

    /// Claim loop. Cancellation is observed between jobs only, so a claimed
    /// job is always settled or returned before the loop exits.
    pub async fn run(self: Arc<Self>, worker_id: usize, cancel: CancellationToken) -> anyhow::Result<()> {
        let kind = self.kind();
        tracing::info!(transport = %kind, worker_id, "Dispatch worker started");

        while !cancel.is_cancelled() {
            let wait = match self.stats.instrument(self.process_next()).await {
                Ok(DispatchOutcome::Idle) => Some(self.config.idle_wait),
                Ok(_) => None,
                Err(e) if e.is_transient() => Some(self.config.failure_backoff),
                Err(e) => {
                    tracing::error!(transport = %kind, worker_id, error = %e, "Dispatch worker stopping");
                    return Err(e.into());
                }
            };

            if let Some(wait) = wait {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }

        tracing::info!(
            transport = %kind,
            worker_id,
            stats = ?self.stats.snapshot(),
            "Dispatch worker stopped"
        );
        Ok(())
    }
}

/// Runs the claim loops of one transport while this instance holds its role.
pub struct DispatchRole {
    worker: Arc<DispatchWorker>,
    workers: usize,
}

impl DispatchRole {
    pub fn new(worker: DispatchWorker) -> Self {
        let workers = worker.config.workers.max(1);
        Self {
            worker: Arc::new(worker),
            workers,
        }
    }

    /// Election key for a transport's sender role.
    pub fn service_name(kind: TransportKind) -> String {
        format!("notification_sender.{}", kind)
    }
}

#[async_trait]
impl ServiceRole for DispatchRole {
    fn name(&self) -> String {
        Self::service_name(self.worker.kind())
    }

    fn extra(&self) -> serde_json::Value {
        json!({
            "transport": self.worker.kind(),
            "workers": self.workers,
            "adapter_enabled": self.worker.transport.is_enabled(),
        })
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let loops = cancel.child_token();
        let mut set = JoinSet::new();
        for worker_id in 0..self.workers {
            set.spawn(Arc::clone(&self.worker).run(worker_id, loops.clone()));
        }

        let mut result = Ok(());
        while let Some(joined) = set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(anyhow::anyhow!("dispatch worker panicked: {}", e)),
            };
            if let Err(e) = outcome {
                // One failed loop takes the others down; the supervisor
                // restarts the role on its next heartbeat.
                loops.cancel();
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_timeout_stays_below_idle_timeout() {
        assert_eq!(send_timeout_for(Duration::from_secs(5)), Duration::from_secs(4));
        assert_eq!(send_timeout_for(Duration::ZERO), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_delay_doubles_per_failure() {
        let backoff = Duration::from_millis(500);
        assert_eq!(retry_delay(backoff, 0), Duration::from_millis(500));
        assert_eq!(retry_delay(backoff, 1), Duration::from_secs(1));
        assert_eq!(retry_delay(backoff, 2), Duration::from_secs(2));
        assert_eq!(retry_delay(backoff, -1), Duration::from_millis(500));
    }

    #[test]
    fn test_service_name_per_transport() {
        assert_eq!(
            DispatchRole::service_name(TransportKind::Email),
            "notification_sender.email"
        );
        assert_eq!(
            DispatchRole::service_name(TransportKind::Poll),
            "notification_sender.poll"
        );
    }

    #[test]
    fn test_outcome_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(DispatchOutcome::RateLimited).unwrap(),
            json!("rate_limited")
        );
    }
}
