//! Hard per-transport send limits evaluated against the audit ledger.

use std::collections::BTreeMap;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

use yo_common::config::{HardLimit, default_rate_limits};
use yo_common::types::{Priority, TransportKind};

use crate::actions::HourBucket;

/// Why a delivery was held back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    HourlyLimit { sent: i64, limit: u32 },
    DailyLimit { sent: i64, limit: u32 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

/// Per-transport hard limits.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limits: BTreeMap<TransportKind, HardLimit>,
}

impl RateLimiter {
    pub fn new(limits: BTreeMap<TransportKind, HardLimit>) -> Self {
        Self { limits }
    }

    pub fn limit_for(&self, transport: TransportKind) -> HardLimit {
        self.limits.get(&transport).copied().unwrap_or_default()
    }

    /// Decide whether one more message may go out on `transport`.
    ///
    /// `buckets` are the user's hourly `sent` counts over the trailing day.
    /// The hourly limit applies to the clock hour containing `now`.
    pub fn check(
        &self,
        transport: TransportKind,
        priority: Priority,
        buckets: &[HourBucket],
        now: DateTime<Utc>,
    ) -> RateDecision {
        if priority == Priority::Always {
            return RateDecision::Allowed;
        }
        let limit = self.limit_for(transport);

        if let Some(per_hour) = limit.per_hour {
            let current_hour = now.duration_trunc(TimeDelta::hours(1)).unwrap_or(now);
            let sent: i64 = buckets
                .iter()
                .filter(|b| b.hour == current_hour)
                .map(|b| b.count)
                .sum();
            if sent >= i64::from(per_hour) {
                return RateDecision::HourlyLimit {
                    sent,
                    limit: per_hour,
                };
            }
        }

        if let Some(per_day) = limit.per_day {
            let sent: i64 = buckets.iter().map(|b| b.count).sum();
            if sent >= i64::from(per_day) {
                return RateDecision::DailyLimit {
                    sent,
                    limit: per_day,
                };
            }
        }

        RateDecision::Allowed
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(default_rate_limits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
    }

    fn bucket(hour: u32, count: i64) -> HourBucket {
        HourBucket {
            hour: at(hour, 0),
            count,
        }
    }

    #[test]
    fn test_below_hourly_limit_is_allowed() {
        let limiter = RateLimiter::default();
        let decision = limiter.check(TransportKind::Email, Priority::Low, &[], at(10, 30));
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_at_hourly_limit_is_blocked() {
        let limiter = RateLimiter::default();
        let decision = limiter.check(
            TransportKind::Sms,
            Priority::Normal,
            &[bucket(10, 1)],
            at(10, 45),
        );
        assert_eq!(decision, RateDecision::HourlyLimit { sent: 1, limit: 1 });
    }

    #[test]
    fn test_previous_hour_does_not_count() {
        let limiter = RateLimiter::default();
        let decision = limiter.check(
            TransportKind::Email,
            Priority::Low,
            &[bucket(9, 1)],
            at(10, 5),
        );
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_daily_limit() {
        let mut limits = default_rate_limits();
        limits.insert(
            TransportKind::Push,
            HardLimit {
                per_hour: None,
                per_day: Some(3),
            },
        );
        let limiter = RateLimiter::new(limits);
        let buckets = [bucket(1, 1), bucket(5, 2)];

        assert_eq!(
            limiter.check(TransportKind::Push, Priority::High, &buckets, at(12, 0)),
            RateDecision::DailyLimit { sent: 3, limit: 3 }
        );
        assert!(
            limiter
                .check(TransportKind::Push, Priority::High, &buckets[..1], at(12, 0))
                .is_allowed()
        );
    }

    #[test]
    fn test_unlimited_transports() {
        let limiter = RateLimiter::default();
        let buckets = [bucket(10, 500)];
        assert!(
            limiter
                .check(TransportKind::Poll, Priority::Marketing, &buckets, at(10, 1))
                .is_allowed()
        );
    }

    #[test]
    fn test_always_priority_bypasses_limits() {
        let limiter = RateLimiter::default();
        let buckets = [bucket(10, 5)];
        assert!(
            limiter
                .check(TransportKind::Email, Priority::Always, &buckets, at(10, 1))
                .is_allowed()
        );
    }
}
