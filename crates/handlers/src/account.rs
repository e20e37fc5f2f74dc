use yo_common::types::{NewNotification, NotificationType, Priority};

use crate::OpContext;

/// `withdraw_vesting` → `power_down` to the account.
pub fn handle_power_down(ctx: &OpContext<'_>) -> Vec<NewNotification> {
    account_notification(ctx, NotificationType::PowerDown)
}

/// `account_update` → `account_update` to the account.
pub fn handle_account_update(ctx: &OpContext<'_>) -> Vec<NewNotification> {
    account_notification(ctx, NotificationType::AccountUpdate)
}

fn account_notification(ctx: &OpContext<'_>, notify_type: NotificationType) -> Vec<NewNotification> {
    let account = ctx.op.field_str("account");
    if account.is_empty() {
        return Vec::new();
    }
    tracing::debug!(account, notify_type = %notify_type, "handle_account_op");

    vec![ctx.notify(
        notify_type,
        account,
        None,
        ctx.op.op_fields.clone(),
        Priority::Low,
    )]
}
