pub mod account;
pub mod comment;
pub mod custom_json;
pub mod transfer;
pub mod vote;

#[cfg(test)]
mod handler_tests;

use std::collections::HashMap;

use serde_json::Value;
use yo_common::types::{ChainOp, NewNotification, NotificationType, ParentContent, Priority};

/// Everything a handler may look at for one operation.
///
/// Handlers never touch the network or the database. Data that needs a
/// lookup (currently only the parent of a comment) is resolved by the
/// follower beforehand and passed in here.
#[derive(Debug, Clone, Copy)]
pub struct OpContext<'a> {
    pub op: &'a ChainOp,
    /// Parent of a `comment` op, when it replies to something and the
    /// follower could resolve it.
    pub parent: Option<&'a ParentContent>,
}

impl<'a> OpContext<'a> {
    pub fn new(op: &'a ChainOp) -> Self {
        Self { op, parent: None }
    }

    pub fn with_parent(op: &'a ChainOp, parent: Option<&'a ParentContent>) -> Self {
        Self { op, parent }
    }

    /// Build a candidate notification for this op.
    pub fn notify(
        &self,
        notify_type: NotificationType,
        to_username: &str,
        from_username: Option<&str>,
        payload: Value,
        priority: Priority,
    ) -> NewNotification {
        NewNotification {
            eid: self.op.eid(),
            notify_type,
            to_username: to_username.to_string(),
            from_username: from_username.map(str::to_string),
            payload,
            priority,
        }
    }
}

/// A handler maps one op to zero or more candidate notifications.
pub type OpHandler = fn(&OpContext<'_>) -> Vec<NewNotification>;

struct Registered {
    name: &'static str,
    handler: OpHandler,
}

/// Routes ops to the handlers registered for their op type.
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Registered>>,
}

impl HandlerRegistry {
    /// A registry with no handlers.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The production handler set.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry
            .register("vote", "vote", vote::handle_vote)
            .register("transfer", "transfer", transfer::handle_transfer)
            .register("custom_json", "follow", custom_json::handle_follow)
            .register("custom_json", "resteem", custom_json::handle_resteem)
            .register("withdraw_vesting", "power_down", account::handle_power_down)
            .register(
                "account_update",
                "account_update",
                account::handle_account_update,
            )
            .register("comment", "mention", comment::handle_mentions)
            .register("comment", "reply", comment::handle_reply);
        registry
    }

    /// Add a handler for `op_type`. Several handlers may share an op type;
    /// they run in registration order.
    pub fn register(&mut self, op_type: &str, name: &'static str, handler: OpHandler) -> &mut Self {
        self.handlers
            .entry(op_type.to_string())
            .or_default()
            .push(Registered { name, handler });
        self
    }

    /// Whether any handler is interested in `op_type`.
    pub fn handles(&self, op_type: &str) -> bool {
        self.handlers.contains_key(op_type)
    }

    /// Run every handler registered for the op's type and flatten the results.
    pub fn handle(&self, ctx: &OpContext<'_>) -> Vec<NewNotification> {
        let Some(handlers) = self.handlers.get(&ctx.op.op_type) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for registered in handlers {
            let produced = (registered.handler)(ctx);
            if !produced.is_empty() {
                tracing::debug!(
                    handler = registered.name,
                    eid = %ctx.op.eid(),
                    count = produced.len(),
                    "Handler produced notifications"
                );
            }
            out.extend(produced);
        }
        out
    }

    /// Number of registered handlers across all op types.
    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Whether a `comment` op replies to another item, so its parent must be
/// resolved before handlers run.
pub fn needs_parent(op: &ChainOp) -> bool {
    op.op_type == "comment" && !op.field_str("parent_author").is_empty()
}
