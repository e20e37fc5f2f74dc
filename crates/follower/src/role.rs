use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use yo_supervisor::ServiceRole;

use crate::follower::BlockFollower;
use crate::source::ChainSource;

/// Election key of the follower role.
pub const SERVICE_NAME: &str = "blockchain_follower";

/// Runs a [`BlockFollower`] while this instance holds the follower role.
pub struct FollowerRole<S: ChainSource> {
    follower: BlockFollower<S>,
}

impl<S: ChainSource> FollowerRole<S> {
    pub fn new(follower: BlockFollower<S>) -> Self {
        Self { follower }
    }
}

#[async_trait]
impl<S: ChainSource + 'static> ServiceRole for FollowerRole<S> {
    fn name(&self) -> String {
        SERVICE_NAME.to_string()
    }

    fn extra(&self) -> serde_json::Value {
        let config = self.follower.config();
        json!({
            "state_name": config.state_name,
            "batch_blocks": config.batch_blocks,
        })
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        self.follower.run(&cancel).await
    }
}
