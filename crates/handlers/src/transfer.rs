use serde_json::json;
use yo_common::types::{NewNotification, NotificationType, Priority};

use crate::OpContext;

/// `transfer` → `send` to the sender and `receive` to the receiver.
///
/// Both share the op's eid; they differ in recipient.
pub fn handle_transfer(ctx: &OpContext<'_>) -> Vec<NewNotification> {
    let op = ctx.op;
    let from = op.field_str("from");
    let to = op.field_str("to");
    if from.is_empty() || to.is_empty() {
        return Vec::new();
    }

    let payload = json!({
        "amount": op.field_str("amount"),
        "from": from,
        "memo": op.field_str("memo"),
        "to": to,
    });
    tracing::debug!(from, to, amount = op.field_str("amount"), "handle_transfer");

    let mut out = vec![ctx.notify(
        NotificationType::Send,
        from,
        None,
        payload.clone(),
        Priority::Low,
    )];
    // Transfers to self would collide on (eid, to_username).
    if to != from {
        out.push(ctx.notify(
            NotificationType::Receive,
            to,
            Some(from),
            payload,
            Priority::Low,
        ));
    }
    out
}
