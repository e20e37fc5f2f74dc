use std::time::Duration;

use sqlx::{PgExecutor, PgPool};
use tokio_util::sync::CancellationToken;

use yo_common::config::AppConfig;
use yo_common::error::AppError;
use yo_common::types::{NewNotification, ParentContent};
use yo_engine::{BatchSummary, NotificationStore};
use yo_handlers::{HandlerRegistry, OpContext, needs_parent};

use crate::retry::backoff_delay;
use crate::source::ChainSource;

/// Settings for one follower.
#[derive(Debug, Clone)]
pub struct FollowerConfig {
    /// Where to start when no resume point is stored. Positive is an absolute
    /// block, negative is that many blocks behind the head, zero is the head.
    pub start_block: i64,
    pub poll_interval: Duration,
    pub batch_blocks: u64,
    /// Key of the resume point in `follower_state`.
    pub state_name: String,
}

impl FollowerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            start_block: config.follower_start_block,
            poll_interval: Duration::from_millis(config.follower_poll_interval_ms),
            batch_blocks: config.follower_batch_blocks.max(1),
            state_name: "blockchain_follower".to_string(),
        }
    }
}

/// Result of one follower step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Blocks up to and including `last_block` were stored.
    Processed {
        first_block: u64,
        last_block: u64,
        summary: BatchSummary,
    },
    /// The next block is not irreversible yet.
    CaughtUp { head: u64 },
}

/// Map the configured start block onto an actual block number.
pub fn resolve_start(configured: i64, head: u64) -> u64 {
    match configured {
        n if n > 0 => n as u64,
        0 => head,
        n => head.saturating_sub(n.unsigned_abs()).max(1),
    }
}

/// Streams irreversible blocks, maps their ops to notifications and stores
/// them together with the resume point.
pub struct BlockFollower<S: ChainSource> {
    source: S,
    pool: PgPool,
    registry: HandlerRegistry,
    config: FollowerConfig,
}

impl<S: ChainSource> BlockFollower<S> {
    pub fn new(source: S, pool: PgPool, registry: HandlerRegistry, config: FollowerConfig) -> Self {
        Self {
            source,
            pool,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &FollowerConfig {
        &self.config
    }

    /// First block to process: one past the stored resume point, or the
    /// configured start.
    pub async fn start_block(&self) -> Result<u64, AppError> {
        if let Some(last) = get_last_block(&self.pool, &self.config.state_name).await? {
            tracing::info!(last_block = last, "Resuming after stored block");
            return Ok(last + 1);
        }

        let head = self.source.head_block_number().await?;
        let start = resolve_start(self.config.start_block, head);
        tracing::info!(
            configured = self.config.start_block,
            head,
            start_block = start,
            "No resume point stored"
        );
        Ok(start)
    }

    /// Process up to `batch_blocks` blocks starting at `next`.
    ///
    /// Notifications, their jobs and the new resume point are committed in
    /// one transaction, so a crash replays whole batches only.
    pub async fn step(&self, next: u64) -> Result<Step, AppError> {
        let head = self.source.head_block_number().await?;
        if next > head {
            return Ok(Step::CaughtUp { head });
        }
        let last = head.min(next + self.config.batch_blocks - 1);

        let mut notifications = Vec::new();
        for block_num in next..=last {
            notifications.extend(self.map_block(block_num).await?);
        }

        let mut summary = BatchSummary::default();
        let mut tx = self.pool.begin().await?;
        for notification in &notifications {
            summary.add(NotificationStore::create_in(&mut tx, notification).await?);
        }
        set_last_block(&mut *tx, &self.config.state_name, last).await?;
        tx.commit().await?;

        if summary.created > 0 || summary.duplicates > 0 {
            tracing::info!(
                first_block = next,
                last_block = last,
                created = summary.created,
                duplicates = summary.duplicates,
                jobs = summary.jobs,
                "Stored notifications from blocks"
            );
        } else {
            tracing::debug!(first_block = next, last_block = last, "No notifications in blocks");
        }

        Ok(Step::Processed {
            first_block: next,
            last_block: last,
            summary,
        })
    }

    /// Run handlers over every interesting op of one block.
    async fn map_block(&self, block_num: u64) -> Result<Vec<NewNotification>, AppError> {
        let ops = self.source.ops_in_block(block_num).await?;
        let mut out = Vec::new();

        for op in ops.iter().filter(|op| self.registry.handles(&op.op_type)) {
            let parent = if needs_parent(op) {
                self.resolve_parent(op.field_str("parent_author"), op.field_str("parent_permlink"))
                    .await?
            } else {
                None
            };
            out.extend(self.registry.handle(&OpContext::with_parent(op, parent.as_ref())));
        }

        Ok(out)
    }

    async fn resolve_parent(
        &self,
        author: &str,
        permlink: &str,
    ) -> Result<Option<ParentContent>, AppError> {
        let parent = self.source.get_content(author, permlink).await?;
        if parent.is_none() {
            tracing::warn!(author, permlink, "Parent not found, treating as a post");
        }
        Ok(parent)
    }

    /// Follow the chain until `cancel` fires.
    ///
    /// Transient errors are retried with backoff. Anything else ends the
    /// loop with an error.
    pub async fn run(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let mut next: Option<u64> = None;
        let mut failures: u32 = 0;

        tracing::info!(
            state_name = %self.config.state_name,
            batch_blocks = self.config.batch_blocks,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Block follower started"
        );

        while !cancel.is_cancelled() {
            let result = match next {
                None => self.start_block().await.map(|start| {
                    next = Some(start);
                    None
                }),
                Some(block_num) => self.step(block_num).await.map(|step| match step {
                    Step::Processed { last_block, .. } => {
                        next = Some(last_block + 1);
                        None
                    }
                    Step::CaughtUp { .. } => Some(self.config.poll_interval),
                }),
            };

            let wait = match result {
                Ok(wait) => {
                    failures = 0;
                    wait
                }
                Err(e) if e.is_transient() => {
                    let delay = backoff_delay(failures);
                    failures = failures.saturating_add(1);
                    tracing::warn!(
                        block = next,
                        error = %e,
                        attempt = failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "Follower step failed, retrying"
                    );
                    Some(delay)
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(wait) = wait {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }

        tracing::info!(next_block = next, "Block follower stopped");
        Ok(())
    }
}

/// Stored resume point for `name`.
pub async fn get_last_block<'e, E>(executor: E, name: &str) -> Result<Option<u64>, AppError>
where
    E: PgExecutor<'e>,
{
    let row: Option<(i64,)> = sqlx::query_as("SELECT last_block FROM follower_state WHERE name = $1")
        .bind(name)
        .fetch_optional(executor)
        .await?;

    Ok(row.map(|(b,)| b as u64))
}

/// Record `block_num` as the last fully processed block for `name`.
pub async fn set_last_block<'e, E>(executor: E, name: &str, block_num: u64) -> Result<(), AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO follower_state (name, last_block)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET last_block = $2, updated_at = NOW()
        "#,
    )
    .bind(name)
    .bind(block_num as i64)
    .execute(executor)
    .await?;

    Ok(())
}
