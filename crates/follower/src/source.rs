//! Chain data source.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use yo_common::error::AppError;
use yo_common::rpc::JsonRpcClient;
use yo_common::types::{ChainOp, ParentContent};

/// Read access to the chain, as needed by the follower.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Highest block that can no longer be reverted.
    async fn head_block_number(&self) -> Result<u64, AppError>;

    /// Every operation in block `block_num`, in chain order.
    async fn ops_in_block(&self, block_num: u64) -> Result<Vec<ChainOp>, AppError>;

    /// The post or comment at `author/permlink`, if it exists.
    async fn get_content(
        &self,
        author: &str,
        permlink: &str,
    ) -> Result<Option<ParentContent>, AppError>;
}

#[derive(Debug, Deserialize)]
struct DynamicGlobalProperties {
    last_irreversible_block_num: u64,
}

#[derive(Debug, Deserialize)]
struct RawOp {
    block: u64,
    trx_in_block: u64,
    op_in_trx: u64,
    #[serde(default)]
    virtual_op: u64,
    op: (String, serde_json::Value),
}

impl From<RawOp> for ChainOp {
    fn from(raw: RawOp) -> Self {
        let (op_type, op_fields) = raw.op;
        ChainOp {
            block: raw.block,
            trx_in_block: raw.trx_in_block,
            op_in_trx: raw.op_in_trx,
            virtual_op: raw.virtual_op,
            op_type,
            op_fields,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawContent {
    #[serde(default)]
    author: String,
    #[serde(default)]
    permlink: String,
    #[serde(default)]
    parent_author: String,
}

/// [`ChainSource`] backed by a steemd node's `condenser_api`.
#[derive(Debug, Clone)]
pub struct SteemdClient {
    rpc: JsonRpcClient,
}

impl SteemdClient {
    pub fn new(url: &str) -> Result<Self, AppError> {
        Ok(Self {
            rpc: JsonRpcClient::new(url, Duration::from_secs(30))?,
        })
    }
}

#[async_trait]
impl ChainSource for SteemdClient {
    async fn head_block_number(&self) -> Result<u64, AppError> {
        let props: DynamicGlobalProperties = self
            .rpc
            .call("condenser_api.get_dynamic_global_properties", json!([]))
            .await?;
        Ok(props.last_irreversible_block_num)
    }

    async fn ops_in_block(&self, block_num: u64) -> Result<Vec<ChainOp>, AppError> {
        let ops: Vec<RawOp> = self
            .rpc
            .call("condenser_api.get_ops_in_block", json!([block_num, false]))
            .await?;
        Ok(ops.into_iter().map(ChainOp::from).collect())
    }

    async fn get_content(
        &self,
        author: &str,
        permlink: &str,
    ) -> Result<Option<ParentContent>, AppError> {
        let content: RawContent = self
            .rpc
            .call("condenser_api.get_content", json!([author, permlink]))
            .await?;

        // Unknown content comes back as an empty object.
        if content.author.is_empty() {
            return Ok(None);
        }
        Ok(Some(ParentContent {
            author: content.author,
            permlink: content.permlink,
            parent_author: content.parent_author,
        }))
    }
}
