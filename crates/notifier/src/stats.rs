//! Per-transport counters and timing for queue work.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use yo_common::error::AppError;
use yo_common::types::TransportKind;

use crate::worker::DispatchOutcome;

#[derive(Debug, Default)]
pub struct WorkerStats {
    transport: Option<TransportKind>,
    idle: AtomicU64,
    skipped: AtomicU64,
    sent: AtomicU64,
    rate_limited: AtomicU64,
    failed: AtomicU64,
    perm_failed: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub idle: u64,
    pub skipped: u64,
    pub sent: u64,
    pub rate_limited: u64,
    pub failed: u64,
    pub perm_failed: u64,
    pub errors: u64,
}

impl WorkerStats {
    pub fn new(transport: TransportKind) -> Self {
        Self {
            transport: Some(transport),
            ..Default::default()
        }
    }

    /// Run one unit of queue work, then log its duration and count its outcome.
    pub async fn instrument<F>(&self, work: F) -> Result<DispatchOutcome, AppError>
    where
        F: Future<Output = Result<DispatchOutcome, AppError>>,
    {
        let started = Instant::now();
        let result = work.await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let transport = self.transport.map(|t| t.as_str()).unwrap_or("unknown");

        match &result {
            Ok(DispatchOutcome::Idle) => {
                self.idle.fetch_add(1, Ordering::Relaxed);
            }
            Ok(outcome) => {
                self.counter(*outcome).fetch_add(1, Ordering::Relaxed);
                tracing::debug!(transport, outcome = ?outcome, elapsed_ms, "Job processed");
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(transport, error = %e, elapsed_ms, "Job processing failed");
            }
        }
        result
    }

    fn counter(&self, outcome: DispatchOutcome) -> &AtomicU64 {
        match outcome {
            DispatchOutcome::Idle => &self.idle,
            DispatchOutcome::Skipped => &self.skipped,
            DispatchOutcome::Sent => &self.sent,
            DispatchOutcome::RateLimited => &self.rate_limited,
            DispatchOutcome::Failed => &self.failed,
            DispatchOutcome::PermFailed => &self.perm_failed,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            idle: self.idle.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            perm_failed: self.perm_failed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
