//! Integration tests for the block follower.
//!
//! Requires a running PostgreSQL database with `DATABASE_URL` env var set.
//! Run with:
//!
//! ```bash
//! DATABASE_URL="postgres://yo:yo@localhost:5432/yo" \
//!   cargo test -p yo-follower --test integration -- --ignored --nocapture
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use yo_common::error::AppError;
use yo_common::types::{ChainOp, NotificationType, ParentContent, TransportKind, UserTransports};
use yo_engine::{NotificationStore, UserStore, WorkQueue};
use yo_follower::follower::{BlockFollower, FollowerConfig, Step, get_last_block, set_last_block};
use yo_follower::source::ChainSource;
use yo_handlers::HandlerRegistry;

// ============================================================
// Helpers
// ============================================================

async fn setup(pool: &PgPool) {
    sqlx::migrate!("../../migrations").run(pool).await.unwrap();
}

/// In-memory chain with a fixed irreversible head.
#[derive(Default)]
struct FakeChain {
    head: u64,
    blocks: HashMap<u64, Vec<ChainOp>>,
    content: HashMap<(String, String), ParentContent>,
    /// Number of `ops_in_block` calls that fail before succeeding.
    failures: Mutex<u32>,
}

impl FakeChain {
    fn with_head(head: u64) -> Self {
        Self {
            head,
            ..Default::default()
        }
    }

    fn op(&mut self, block: u64, op_type: &str, op_fields: serde_json::Value) -> &mut Self {
        let ops = self.blocks.entry(block).or_default();
        ops.push(ChainOp {
            block,
            trx_in_block: ops.len() as u64,
            op_in_trx: 0,
            virtual_op: 0,
            op_type: op_type.to_string(),
            op_fields,
        });
        self
    }
}

#[async_trait]
impl ChainSource for FakeChain {
    async fn head_block_number(&self) -> Result<u64, AppError> {
        Ok(self.head)
    }

    async fn ops_in_block(&self, block_num: u64) -> Result<Vec<ChainOp>, AppError> {
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::Rpc("connection reset".into()));
            }
        }
        Ok(self.blocks.get(&block_num).cloned().unwrap_or_default())
    }

    async fn get_content(
        &self,
        author: &str,
        permlink: &str,
    ) -> Result<Option<ParentContent>, AppError> {
        Ok(self
            .content
            .get(&(author.to_string(), permlink.to_string()))
            .cloned())
    }
}

fn config(start_block: i64, batch_blocks: u64) -> FollowerConfig {
    FollowerConfig {
        start_block,
        poll_interval: Duration::from_millis(20),
        batch_blocks,
        state_name: "test_follower".to_string(),
    }
}

fn vote_fields() -> serde_json::Value {
    json!({"voter": "bob", "author": "alice", "permlink": "p", "weight": 10000})
}

async fn subscribe_alice_to_votes_on_poll(pool: &PgPool) {
    let transports = UserTransports::from_value(json!({
        "poll": {"notification_types": ["vote"]}
    }))
    .unwrap();
    UserStore::set_user_transports(pool, "alice", &transports)
        .await
        .unwrap();
}

async fn notification_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM notifications")
        .fetch_one(pool)
        .await
        .unwrap()
}

// ============================================================
// Stepping
// ============================================================

#[sqlx::test]
#[ignore]
async fn test_vote_creates_one_poll_job(pool: PgPool) {
    setup(&pool).await;
    subscribe_alice_to_votes_on_poll(&pool).await;

    let mut chain = FakeChain::with_head(10);
    chain.op(10, "vote", vote_fields());
    let follower = BlockFollower::new(chain, pool.clone(), HandlerRegistry::standard(), config(10, 1));

    let step = follower.step(10).await.unwrap();
    let Step::Processed { last_block, summary, .. } = step else {
        panic!("expected a processed step, got {:?}", step);
    };
    assert_eq!(last_block, 10);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.jobs, 1);

    let queue = WorkQueue::new(pool.clone());
    assert_eq!(queue.size(Some(TransportKind::Poll)).await.unwrap(), 1);
    assert_eq!(queue.size(None).await.unwrap(), 1);

    let stored = NotificationStore::list_for_user(&pool, "alice", 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].notify_type, NotificationType::Vote);
    assert_eq!(stored[0].from_username.as_deref(), Some("bob"));
    assert_eq!(stored[0].payload["weight"], 10000);

    assert_eq!(get_last_block(&pool, "test_follower").await.unwrap(), Some(10));
}

#[sqlx::test]
#[ignore]
async fn test_replayed_block_adds_nothing(pool: PgPool) {
    setup(&pool).await;
    subscribe_alice_to_votes_on_poll(&pool).await;

    let mut chain = FakeChain::with_head(10);
    chain.op(10, "vote", vote_fields());
    let follower = BlockFollower::new(chain, pool.clone(), HandlerRegistry::standard(), config(10, 1));

    follower.step(10).await.unwrap();
    let replay = follower.step(10).await.unwrap();

    let Step::Processed { summary, .. } = replay else {
        panic!("expected a processed step, got {:?}", replay);
    };
    assert_eq!(summary.created, 0);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.jobs, 0);
    assert_eq!(notification_count(&pool).await, 1);
    assert_eq!(WorkQueue::new(pool).size(None).await.unwrap(), 1);
}

#[sqlx::test]
#[ignore]
async fn test_caught_up_stores_nothing(pool: PgPool) {
    setup(&pool).await;
    let follower = BlockFollower::new(
        FakeChain::with_head(10),
        pool.clone(),
        HandlerRegistry::standard(),
        config(0, 1),
    );

    assert_eq!(follower.step(11).await.unwrap(), Step::CaughtUp { head: 10 });
    assert_eq!(get_last_block(&pool, "test_follower").await.unwrap(), None);
}

#[sqlx::test]
#[ignore]
async fn test_batch_is_bounded_by_head(pool: PgPool) {
    setup(&pool).await;
    let mut chain = FakeChain::with_head(12);
    chain
        .op(10, "vote", vote_fields())
        .op(11, "transfer", json!({"from": "bob", "to": "alice", "amount": "1.000 STEEM", "memo": ""}))
        .op(12, "withdraw_vesting", json!({"account": "carol", "vesting_shares": "10.000000 VESTS"}));
    let follower = BlockFollower::new(chain, pool.clone(), HandlerRegistry::standard(), config(10, 5));

    let step = follower.step(10).await.unwrap();
    let Step::Processed { first_block, last_block, summary } = step else {
        panic!("expected a processed step, got {:?}", step);
    };
    assert_eq!((first_block, last_block), (10, 12));
    // vote + send + receive + power_down
    assert_eq!(summary.created, 4);
    // Recipients without settings get the default poll transport.
    assert_eq!(summary.jobs, 4);
    assert_eq!(get_last_block(&pool, "test_follower").await.unwrap(), Some(12));
}

#[sqlx::test]
#[ignore]
async fn test_reply_uses_resolved_parent(pool: PgPool) {
    setup(&pool).await;
    let mut chain = FakeChain::with_head(5);
    chain.op(
        5,
        "comment",
        json!({
            "author": "bob",
            "permlink": "re-c",
            "parent_author": "alice",
            "parent_permlink": "c",
            "title": "",
            "body": "agreed @carol "
        }),
    );
    chain.content.insert(
        ("alice".to_string(), "c".to_string()),
        ParentContent {
            author: "alice".to_string(),
            permlink: "c".to_string(),
            parent_author: "dave".to_string(),
        },
    );
    let follower = BlockFollower::new(chain, pool.clone(), HandlerRegistry::standard(), config(5, 1));
    follower.step(5).await.unwrap();

    let alice = NotificationStore::list_for_user(&pool, "alice", 10).await.unwrap();
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].notify_type, NotificationType::CommentReply);

    let carol = NotificationStore::list_for_user(&pool, "carol", 10).await.unwrap();
    assert_eq!(carol.len(), 1);
    assert_eq!(carol[0].notify_type, NotificationType::Mention);
}

#[sqlx::test]
#[ignore]
async fn test_failed_step_leaves_resume_point(pool: PgPool) {
    setup(&pool).await;
    set_last_block(&pool, "test_follower", 9).await.unwrap();

    let mut chain = FakeChain::with_head(10);
    chain.op(10, "vote", vote_fields());
    *chain.failures.lock().unwrap() = 1;
    let follower = BlockFollower::new(chain, pool.clone(), HandlerRegistry::standard(), config(0, 1));

    let err = follower.step(10).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(notification_count(&pool).await, 0);
    assert_eq!(get_last_block(&pool, "test_follower").await.unwrap(), Some(9));
}

// ============================================================
// Start block and run loop
// ============================================================

#[sqlx::test]
#[ignore]
async fn test_start_block_resumes_after_stored_block(pool: PgPool) {
    setup(&pool).await;
    let follower = BlockFollower::new(
        FakeChain::with_head(1_000),
        pool.clone(),
        HandlerRegistry::standard(),
        config(-100, 1),
    );
    assert_eq!(follower.start_block().await.unwrap(), 900);

    set_last_block(&pool, "test_follower", 950).await.unwrap();
    assert_eq!(follower.start_block().await.unwrap(), 951);
}

#[sqlx::test]
#[ignore]
async fn test_run_follows_to_head_and_retries(pool: PgPool) {
    setup(&pool).await;
    let mut chain = FakeChain::with_head(3);
    chain
        .op(1, "vote", vote_fields())
        .op(3, "account_update", json!({"account": "alice"}));
    *chain.failures.lock().unwrap() = 1;

    let follower = BlockFollower::new(chain, pool.clone(), HandlerRegistry::standard(), config(1, 2));
    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        stopper.cancel();
    });

    follower.run(&cancel).await.unwrap();

    assert_eq!(get_last_block(&pool, "test_follower").await.unwrap(), Some(3));
    assert_eq!(notification_count(&pool).await, 2);
}
