use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Kinds of notifications produced from chain operations.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum NotificationType {
    PowerDown,
    PowerUp,
    Resteem,
    Feed,
    Reward,
    Send,
    Mention,
    Follow,
    Vote,
    CommentReply,
    PostReply,
    AccountUpdate,
    Message,
    Receive,
    /// Preference-only umbrella: subscribing to `comment` accepts both
    /// `comment_reply` and `post_reply`. Never stored on a notification.
    Comment,
}

impl NotificationType {
    /// Every type a notification can actually carry.
    pub const DELIVERABLE: [NotificationType; 14] = [
        NotificationType::PowerDown,
        NotificationType::PowerUp,
        NotificationType::Resteem,
        NotificationType::Feed,
        NotificationType::Reward,
        NotificationType::Send,
        NotificationType::Mention,
        NotificationType::Follow,
        NotificationType::Vote,
        NotificationType::CommentReply,
        NotificationType::PostReply,
        NotificationType::AccountUpdate,
        NotificationType::Message,
        NotificationType::Receive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::PowerDown => "power_down",
            NotificationType::PowerUp => "power_up",
            NotificationType::Resteem => "resteem",
            NotificationType::Feed => "feed",
            NotificationType::Reward => "reward",
            NotificationType::Send => "send",
            NotificationType::Mention => "mention",
            NotificationType::Follow => "follow",
            NotificationType::Vote => "vote",
            NotificationType::CommentReply => "comment_reply",
            NotificationType::PostReply => "post_reply",
            NotificationType::AccountUpdate => "account_update",
            NotificationType::Message => "message",
            NotificationType::Receive => "receive",
            NotificationType::Comment => "comment",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationType::DELIVERABLE
            .iter()
            .chain(std::iter::once(&NotificationType::Comment))
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| AppError::Validation(format!("Unknown notification type '{}'", s)))
    }
}

/// Delivery priority, lowest to highest.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Priority {
    Marketing,
    #[default]
    Low,
    Normal,
    High,
    Always,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Marketing => write!(f, "marketing"),
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Always => write!(f, "always"),
        }
    }
}

/// Named delivery channels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum TransportKind {
    Email,
    Sms,
    /// Desktop/poll store read back by front-ends.
    #[serde(alias = "wwwpoll", alias = "desktop")]
    Poll,
    /// Browser push.
    #[serde(alias = "wwwpush")]
    Push,
}

impl TransportKind {
    pub const ALL: [TransportKind; 4] = [
        TransportKind::Email,
        TransportKind::Sms,
        TransportKind::Poll,
        TransportKind::Push,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Email => "email",
            TransportKind::Sms => "sms",
            TransportKind::Poll => "poll",
            TransportKind::Push => "push",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(TransportKind::Email),
            "sms" => Ok(TransportKind::Sms),
            "poll" | "wwwpoll" | "desktop" => Ok(TransportKind::Poll),
            "push" | "wwwpush" => Ok(TransportKind::Push),
            other => Err(AppError::Validation(format!(
                "Unknown transport '{}'",
                other
            ))),
        }
    }
}

/// Outcome recorded in the audit ledger for one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ActionStatus {
    Sent,
    RateLimited,
    Failed,
    PermFailed,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Sent => write!(f, "sent"),
            ActionStatus::RateLimited => write!(f, "rate_limited"),
            ActionStatus::Failed => write!(f, "failed"),
            ActionStatus::PermFailed => write!(f, "perm_failed"),
        }
    }
}

/// Leader-election status of a service instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Disabled,
    Enabled,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Disabled => write!(f, "disabled"),
            ServiceStatus::Enabled => write!(f, "enabled"),
        }
    }
}

/// One operation streamed from the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainOp {
    pub block: u64,
    pub trx_in_block: u64,
    pub op_in_trx: u64,
    pub virtual_op: u64,
    pub op_type: String,
    pub op_fields: serde_json::Value,
}

impl ChainOp {
    /// Stable event id derived from the op's chain coordinates.
    pub fn eid(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.block, self.trx_in_block, self.op_in_trx, self.virtual_op
        )
    }

    /// String field of the op body, or `""` when absent.
    pub fn field_str(&self, key: &str) -> &str {
        self.op_fields
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }
}

/// The item a comment replies to, as resolved from the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentContent {
    pub author: String,
    pub permlink: String,
    /// Empty for root posts.
    pub parent_author: String,
}

impl ParentContent {
    /// A parent with a parent of its own is a comment, not a post.
    pub fn is_comment(&self) -> bool {
        !self.parent_author.is_empty()
    }
}

/// Candidate notification produced by an op handler, not yet stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub eid: String,
    pub notify_type: NotificationType,
    pub to_username: String,
    pub from_username: Option<String>,
    pub payload: serde_json::Value,
    pub priority: Priority,
}

/// A stored notification.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub eid: String,
    pub notify_type: NotificationType,
    pub to_username: String,
    pub from_username: Option<String>,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

/// A user's settings for one transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportPreference {
    pub notification_types: BTreeSet<NotificationType>,
    /// Transport-specific contact data (email address, phone number, push
    /// subscription). Opaque to the core apart from validation.
    #[serde(default)]
    pub sub_data: serde_json::Value,
}

impl TransportPreference {
    /// Whether this transport should deliver notifications of `notify_type`.
    pub fn accepts(&self, notify_type: NotificationType) -> bool {
        if self.notification_types.contains(&notify_type) {
            return true;
        }
        matches!(
            notify_type,
            NotificationType::CommentReply | NotificationType::PostReply
        ) && self.notification_types.contains(&NotificationType::Comment)
    }

    /// `sub_data` as a non-empty string, if it is one.
    pub fn contact(&self) -> Option<&str> {
        self.sub_data.as_str().filter(|s| !s.trim().is_empty())
    }
}

/// Mapping of transport → preference for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserTransports(pub BTreeMap<TransportKind, TransportPreference>);

impl UserTransports {
    /// Settings given to a user on first read or write: every type on `poll`.
    pub fn defaults() -> Self {
        let mut map = BTreeMap::new();
        map.insert(
            TransportKind::Poll,
            TransportPreference {
                notification_types: NotificationType::DELIVERABLE.into_iter().collect(),
                sub_data: serde_json::Value::Null,
            },
        );
        Self(map)
    }

    /// Parse and validate a preference payload submitted by a client.
    pub fn from_value(value: serde_json::Value) -> Result<Self, AppError> {
        let transports: UserTransports = serde_json::from_value(value)
            .map_err(|e| AppError::Validation(format!("Malformed transports: {}", e)))?;
        transports.validate()?;
        Ok(transports)
    }

    /// Reject contact data that would only fail later at dispatch time.
    pub fn validate(&self) -> Result<(), AppError> {
        for (kind, pref) in &self.0 {
            let sub_data = &pref.sub_data;
            let ok = match kind {
                TransportKind::Email => {
                    sub_data.is_null() || sub_data.as_str().is_some_and(is_plausible_email)
                }
                TransportKind::Sms => {
                    sub_data.is_null() || sub_data.as_str().is_some_and(is_plausible_phone)
                }
                TransportKind::Push => sub_data.is_null() || sub_data.is_object(),
                TransportKind::Poll => true,
            };
            if !ok {
                return Err(AppError::Validation(format!(
                    "Invalid sub_data for transport '{}'",
                    kind
                )));
            }
        }
        Ok(())
    }

    /// Transports that accept `notify_type`, in stable order.
    pub fn enabled_for(&self, notify_type: NotificationType) -> Vec<TransportKind> {
        self.0
            .iter()
            .filter(|(_, pref)| pref.accepts(notify_type))
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn get(&self, kind: TransportKind) -> Option<&TransportPreference> {
        self.0.get(&kind)
    }
}

fn is_plausible_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

fn is_plausible_phone(s: &str) -> bool {
    let digits = s.chars().filter(|c| c.is_ascii_digit()).count();
    digits >= 7
        && s
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'))
}

/// Fields copied into a queue job so a worker can deliver without
/// re-reading the notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub notification_id: i64,
    pub eid: String,
    pub notify_type: NotificationType,
    pub to_username: String,
    pub from_username: Option<String>,
    pub data: serde_json::Value,
    pub priority: Priority,
}

/// A pending delivery job.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueJob {
    pub id: i64,
    pub payload: sqlx::types::Json<JobPayload>,
    pub transport: TransportKind,
    pub enqueued_at: DateTime<Utc>,
}

/// An audit ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Action {
    pub id: i64,
    pub notification_id: i64,
    pub username: String,
    pub transport: TransportKind,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
}

/// A heartbeat registration row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServiceRegistration {
    pub id: i64,
    pub service_name: String,
    pub status: ServiceStatus,
    pub extra: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}
