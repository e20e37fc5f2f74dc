//! Tests for every op handler and HandlerRegistry routing.
//!
//! Ops are built in the shape the follower receives them from the chain
//! node, then run through the standard registry.

use serde_json::{Value, json};

use yo_common::types::{ChainOp, NotificationType, ParentContent, Priority};

use crate::comment::mentioned_usernames;
use crate::{HandlerRegistry, OpContext, needs_parent};

// ───────────────────────────── helpers ──────────────────────────────

const BLOCK: u64 = 20_000_000;

fn build_op(op_type: &str, op_fields: Value) -> ChainOp {
    ChainOp {
        block: BLOCK,
        trx_in_block: 7,
        op_in_trx: 0,
        virtual_op: 0,
        op_type: op_type.to_string(),
        op_fields,
    }
}

fn custom_json(id: &str, payload: Value, signers: &[&str]) -> ChainOp {
    build_op(
        "custom_json",
        json!({
            "id": id,
            "json": payload.to_string(),
            "required_auths": [],
            "required_posting_auths": signers,
        }),
    )
}

fn comment(author: &str, parent_author: &str, body: &str) -> ChainOp {
    build_op(
        "comment",
        json!({
            "author": author,
            "permlink": "re-post",
            "parent_author": parent_author,
            "parent_permlink": if parent_author.is_empty() { "steem" } else { "post" },
            "title": "",
            "body": body,
            "json_metadata": "{}",
        }),
    )
}

fn registry() -> HandlerRegistry {
    HandlerRegistry::standard()
}

// ═══════════════════════════════════════════════════════════════════
//  vote
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_vote_notifies_author() {
    let op = build_op(
        "vote",
        json!({"voter": "bob", "author": "alice", "permlink": "p", "weight": 10000}),
    );
    let out = registry().handle(&OpContext::new(&op));

    assert_eq!(out.len(), 1);
    let n = &out[0];
    assert_eq!(n.notify_type, NotificationType::Vote);
    assert_eq!(n.to_username, "alice");
    assert_eq!(n.from_username.as_deref(), Some("bob"));
    assert_eq!(n.eid, "20000000/7/0/0");
    assert_eq!(n.priority, Priority::Low);
    assert_eq!(n.payload["weight"], 10000);
}

#[test]
fn test_vote_missing_author_is_ignored() {
    let op = build_op("vote", json!({"voter": "bob", "permlink": "p"}));
    assert!(registry().handle(&OpContext::new(&op)).is_empty());
}

// ═══════════════════════════════════════════════════════════════════
//  transfer
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_transfer_notifies_both_parties() {
    let op = build_op(
        "transfer",
        json!({"from": "alice", "to": "bob", "amount": "1.000 STEEM", "memo": "thanks"}),
    );
    let out = registry().handle(&OpContext::new(&op));

    assert_eq!(out.len(), 2);
    let send = out
        .iter()
        .find(|n| n.notify_type == NotificationType::Send)
        .unwrap();
    assert_eq!(send.to_username, "alice");
    assert_eq!(send.payload["memo"], "thanks");

    let receive = out
        .iter()
        .find(|n| n.notify_type == NotificationType::Receive)
        .unwrap();
    assert_eq!(receive.to_username, "bob");
    assert_eq!(receive.from_username.as_deref(), Some("alice"));
    assert_eq!(receive.payload["amount"], "1.000 STEEM");
    assert_eq!(send.eid, receive.eid);
}

#[test]
fn test_transfer_to_self_sends_once() {
    let op = build_op(
        "transfer",
        json!({"from": "alice", "to": "alice", "amount": "1.000 SBD", "memo": ""}),
    );
    let out = registry().handle(&OpContext::new(&op));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].notify_type, NotificationType::Send);
}

// ═══════════════════════════════════════════════════════════════════
//  custom_json: follow / reblog
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_follow_notifies_followed_account() {
    let op = custom_json(
        "follow",
        json!(["follow", {"follower": "bob", "following": "alice", "what": ["blog"]}]),
        &["bob"],
    );
    let out = registry().handle(&OpContext::new(&op));

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].notify_type, NotificationType::Follow);
    assert_eq!(out[0].to_username, "alice");
    assert_eq!(out[0].from_username.as_deref(), Some("bob"));
    assert_eq!(out[0].payload["what"], json!(["blog"]));
}

#[test]
fn test_follow_requires_single_matching_signer() {
    let payload = json!(["follow", {"follower": "bob", "following": "alice", "what": ["blog"]}]);

    let wrong_signer = custom_json("follow", payload.clone(), &["mallory"]);
    assert!(registry().handle(&OpContext::new(&wrong_signer)).is_empty());

    let two_signers = custom_json("follow", payload.clone(), &["bob", "mallory"]);
    assert!(registry().handle(&OpContext::new(&two_signers)).is_empty());

    let no_signers = custom_json("follow", payload, &[]);
    assert!(registry().handle(&OpContext::new(&no_signers)).is_empty());
}

#[test]
fn test_reblog_under_follow_id_notifies_author() {
    let op = custom_json(
        "follow",
        json!(["reblog", {"account": "bob", "author": "alice", "permlink": "p"}]),
        &["bob"],
    );
    let out = registry().handle(&OpContext::new(&op));

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].notify_type, NotificationType::Resteem);
    assert_eq!(out[0].to_username, "alice");
    assert_eq!(out[0].from_username.as_deref(), Some("bob"));
    assert_eq!(out[0].payload["permlink"], "p");
}

#[test]
fn test_reblog_id_is_accepted() {
    let op = custom_json(
        "reblog",
        json!(["reblog", {"account": "bob", "author": "alice", "permlink": "p"}]),
        &["bob"],
    );
    assert_eq!(registry().handle(&OpContext::new(&op)).len(), 1);
}

#[test]
fn test_reblog_signed_by_other_account_is_ignored() {
    let op = custom_json(
        "follow",
        json!(["reblog", {"account": "bob", "author": "alice", "permlink": "p"}]),
        &["alice"],
    );
    assert!(registry().handle(&OpContext::new(&op)).is_empty());
}

#[test]
fn test_unrelated_custom_json_is_ignored() {
    let other_plugin = custom_json("market", json!(["follow", {}]), &["bob"]);
    assert!(registry().handle(&OpContext::new(&other_plugin)).is_empty());

    let garbage = build_op(
        "custom_json",
        json!({"id": "follow", "json": "not json", "required_posting_auths": ["bob"]}),
    );
    assert!(registry().handle(&OpContext::new(&garbage)).is_empty());

    let not_a_pair = custom_json("follow", json!({"follower": "bob"}), &["bob"]);
    assert!(registry().handle(&OpContext::new(&not_a_pair)).is_empty());
}

// ═══════════════════════════════════════════════════════════════════
//  withdraw_vesting / account_update
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_power_down_notifies_account() {
    let op = build_op(
        "withdraw_vesting",
        json!({"account": "alice", "vesting_shares": "100.000000 VESTS"}),
    );
    let out = registry().handle(&OpContext::new(&op));

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].notify_type, NotificationType::PowerDown);
    assert_eq!(out[0].to_username, "alice");
    assert_eq!(out[0].from_username, None);
    assert_eq!(out[0].payload["vesting_shares"], "100.000000 VESTS");
}

#[test]
fn test_account_update_notifies_account() {
    let op = build_op(
        "account_update",
        json!({"account": "alice", "memo_key": "STM7abc", "json_metadata": ""}),
    );
    let out = registry().handle(&OpContext::new(&op));

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].notify_type, NotificationType::AccountUpdate);
    assert_eq!(out[0].to_username, "alice");
}

// ═══════════════════════════════════════════════════════════════════
//  comment: mentions and replies
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_mentions_are_distinct() {
    let names = mentioned_usernames("hey @alice and @bob-2, @alice again\n@carol");
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    assert_eq!(names, vec!["alice", "carol"]);
}

#[test]
fn test_mention_at_end_of_body_matches() {
    assert!(mentioned_usernames("thanks @alice").contains("alice"));
}

#[test]
fn test_mention_pattern_rejects_invalid_names() {
    assert!(mentioned_usernames("@ab short").is_empty());
    assert!(mentioned_usernames("@1abc digit").is_empty());
    assert!(mentioned_usernames("email@Upper case").is_empty());
}

#[test]
fn test_root_post_produces_only_mentions() {
    let op = comment("bob", "", "hello @alice ");
    assert!(!needs_parent(&op));

    let out = registry().handle(&OpContext::new(&op));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].notify_type, NotificationType::Mention);
    assert_eq!(out[0].to_username, "alice");
    assert_eq!(out[0].from_username.as_deref(), Some("bob"));
    assert_eq!(out[0].payload, json!({"author": "bob", "permlink": "re-post"}));
}

#[test]
fn test_reply_to_post() {
    let op = comment("bob", "alice", "nice post");
    assert!(needs_parent(&op));

    let parent = ParentContent {
        author: "alice".into(),
        permlink: "post".into(),
        parent_author: String::new(),
    };
    let out = registry().handle(&OpContext::with_parent(&op, Some(&parent)));

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].notify_type, NotificationType::PostReply);
    assert_eq!(out[0].to_username, "alice");
    assert_eq!(out[0].from_username.as_deref(), Some("bob"));
}

#[test]
fn test_reply_to_comment() {
    let op = comment("bob", "alice", "agreed");
    let parent = ParentContent {
        author: "alice".into(),
        permlink: "post".into(),
        parent_author: "carol".into(),
    };
    let out = registry().handle(&OpContext::with_parent(&op, Some(&parent)));

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].notify_type, NotificationType::CommentReply);
}

#[test]
fn test_unresolved_parent_is_treated_as_post() {
    let op = comment("bob", "alice", "orphan");
    let out = registry().handle(&OpContext::new(&op));

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].notify_type, NotificationType::PostReply);
}

#[test]
fn test_reply_with_mention_produces_both() {
    let op = comment("bob", "alice", "cc @carol please");
    let out = registry().handle(&OpContext::new(&op));

    let types: Vec<NotificationType> = out.iter().map(|n| n.notify_type).collect();
    assert_eq!(
        types,
        vec![NotificationType::Mention, NotificationType::PostReply]
    );
}

// ═══════════════════════════════════════════════════════════════════
//  HandlerRegistry routing
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_unhandled_op_type_yields_nothing() {
    let op = build_op("claim_reward_balance", json!({"account": "alice"}));
    let registry = registry();
    assert!(!registry.handles("claim_reward_balance"));
    assert!(registry.handle(&OpContext::new(&op)).is_empty());
}

#[test]
fn test_standard_registry_covers_op_types() {
    let registry = registry();
    for op_type in [
        "vote",
        "transfer",
        "custom_json",
        "withdraw_vesting",
        "account_update",
        "comment",
    ] {
        assert!(registry.handles(op_type), "missing handler for {}", op_type);
    }
    assert_eq!(registry.len(), 8);
}

#[test]
fn test_custom_registration() {
    fn always_alice(ctx: &OpContext<'_>) -> Vec<yo_common::types::NewNotification> {
        vec![ctx.notify(
            NotificationType::Reward,
            "alice",
            None,
            json!({}),
            Priority::Marketing,
        )]
    }

    let mut registry = HandlerRegistry::empty();
    assert!(registry.is_empty());
    registry.register("author_reward", "reward", always_alice);

    let op = build_op("author_reward", json!({}));
    let out = registry.handle(&OpContext::new(&op));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].notify_type, NotificationType::Reward);
}
