pub mod actions;
pub mod notifications;
pub mod poll;
pub mod queue;
pub mod ratelimit;
pub mod users;

pub use actions::{AuditLedger, HourBucket, PERMANENT_FAIL_COUNT};
pub use notifications::{BatchSummary, CreateOutcome, NotificationStore};
pub use poll::{PollFilter, PollNotification, PollStore};
pub use queue::{ClaimedJob, WorkQueue};
pub use ratelimit::{RateDecision, RateLimiter};
pub use users::UserStore;
