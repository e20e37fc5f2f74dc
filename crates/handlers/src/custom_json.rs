use serde_json::Value;
use yo_common::types::{ChainOp, NewNotification, NotificationType, Priority};

use crate::OpContext;

/// custom_json ids that may carry follow or reblog payloads. The chain
/// emits reblogs under the `follow` plugin id.
const FOLLOW_PLUGIN_IDS: &[&str] = &["follow", "reblog"];

/// `custom_json` `["follow", {follower, following, what}]` → `follow` to the
/// followed account.
pub fn handle_follow(ctx: &OpContext<'_>) -> Vec<NewNotification> {
    let Some(body) = plugin_body(ctx.op, "follow") else {
        return Vec::new();
    };
    let follower = str_field(&body, "follower");
    let following = str_field(&body, "following");
    if follower.is_empty() || following.is_empty() {
        return Vec::new();
    }
    if !signed_only_by(ctx.op, follower) {
        tracing::warn!(eid = %ctx.op.eid(), follower, "Follow op not signed by follower alone");
        return Vec::new();
    }
    tracing::debug!(follower, following, "handle_follow");

    vec![ctx.notify(
        NotificationType::Follow,
        following,
        Some(follower),
        body.clone(),
        Priority::Low,
    )]
}

/// `custom_json` `["reblog", {account, author, permlink}]` → `resteem` to the
/// author of the reblogged post.
pub fn handle_resteem(ctx: &OpContext<'_>) -> Vec<NewNotification> {
    let Some(body) = plugin_body(ctx.op, "reblog") else {
        return Vec::new();
    };
    let account = str_field(&body, "account");
    let author = str_field(&body, "author");
    if account.is_empty() || author.is_empty() {
        return Vec::new();
    }
    if !signed_only_by(ctx.op, account) {
        tracing::warn!(eid = %ctx.op.eid(), account, "Reblog op not signed by account alone");
        return Vec::new();
    }
    tracing::debug!(account, author, permlink = str_field(&body, "permlink"), "handle_resteem");

    vec![ctx.notify(
        NotificationType::Resteem,
        author,
        Some(account),
        body.clone(),
        Priority::Low,
    )]
}

/// Parse the op's `json` string and return the body of a `[action, body]`
/// pair whose action matches.
fn plugin_body(op: &ChainOp, action: &str) -> Option<Value> {
    if !FOLLOW_PLUGIN_IDS.contains(&op.field_str("id")) {
        return None;
    }
    let parsed: Value = match serde_json::from_str(op.field_str("json")) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(eid = %op.eid(), error = %e, "Unparseable custom_json payload");
            return None;
        }
    };
    let pair = parsed.as_array()?;
    if pair.first().and_then(Value::as_str) != Some(action) {
        return None;
    }
    pair.get(1).filter(|body| body.is_object()).cloned()
}

/// Exactly one posting signer, and it is `actor`.
fn signed_only_by(op: &ChainOp, actor: &str) -> bool {
    match op
        .op_fields
        .get("required_posting_auths")
        .and_then(Value::as_array)
    {
        Some(auths) if auths.len() == 1 => auths[0].as_str() == Some(actor),
        _ => false,
    }
}

fn str_field<'a>(body: &'a Value, key: &str) -> &'a str {
    body.get(key).and_then(Value::as_str).unwrap_or_default()
}
