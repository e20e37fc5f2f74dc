use yo_common::types::{NewNotification, NotificationType, Priority};

use crate::OpContext;

/// `vote` → `vote` to the author of the voted item, from the voter.
pub fn handle_vote(ctx: &OpContext<'_>) -> Vec<NewNotification> {
    let op = ctx.op;
    let voter = op.field_str("voter");
    let author = op.field_str("author");
    if voter.is_empty() || author.is_empty() {
        return Vec::new();
    }

    tracing::debug!(
        voter,
        author,
        permlink = op.field_str("permlink"),
        "handle_vote"
    );

    vec![ctx.notify(
        NotificationType::Vote,
        author,
        Some(voter),
        op.op_fields.clone(),
        Priority::Low,
    )]
}
