use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;
use yo_common::types::{NewNotification, NotificationType, Priority};

use crate::OpContext;

/// A valid `@username` followed by whitespace.
static MENTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([a-z][a-z0-9\-]{2,15})\s").expect("valid mention regex"));

/// Distinct usernames mentioned in `body`, sorted.
pub fn mentioned_usernames(body: &str) -> BTreeSet<String> {
    let haystack = format!("{}\n", body);
    MENTION_PATTERN
        .captures_iter(&haystack)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// `comment` → `mention` to each distinct account mentioned in the body.
pub fn handle_mentions(ctx: &OpContext<'_>) -> Vec<NewNotification> {
    let op = ctx.op;
    let author = op.field_str("author");
    let payload = json!({
        "author": author,
        "permlink": op.field_str("permlink"),
    });

    mentioned_usernames(op.field_str("body"))
        .into_iter()
        .map(|mentioned| {
            tracing::debug!(author, mentioned = %mentioned, "handle_mention");
            ctx.notify(
                NotificationType::Mention,
                &mentioned,
                Some(author),
                payload.clone(),
                Priority::Low,
            )
        })
        .collect()
}

/// `comment` with a parent → `comment_reply` or `post_reply` to the parent
/// author, depending on whether the parent is itself a comment.
///
/// A parent the follower could not resolve is treated as a post.
pub fn handle_reply(ctx: &OpContext<'_>) -> Vec<NewNotification> {
    let op = ctx.op;
    let parent_author = op.field_str("parent_author");
    if parent_author.is_empty() {
        return Vec::new();
    }

    let notify_type = match ctx.parent {
        Some(parent) if parent.is_comment() => NotificationType::CommentReply,
        _ => NotificationType::PostReply,
    };
    tracing::debug!(
        author = op.field_str("author"),
        parent_author,
        parent_permlink = op.field_str("parent_permlink"),
        notify_type = %notify_type,
        "handle_reply"
    );

    vec![ctx.notify(
        notify_type,
        parent_author,
        Some(op.field_str("author")),
        op.op_fields.clone(),
        Priority::Low,
    )]
}
