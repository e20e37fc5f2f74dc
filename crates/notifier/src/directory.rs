//! Lookup of contact details that are not stored with the user's settings.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use yo_common::error::AppError;
use yo_common::rpc::JsonRpcClient;

/// Contact details known to the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserData {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[async_trait]
pub trait Directory: Send + Sync {
    /// Contact details for `username`, or `None` if the directory has none.
    async fn lookup(&self, username: &str) -> Result<Option<UserData>, AppError>;
}

/// Directory backed by conveyor's `get_user_data` JSON-RPC method.
pub struct ConveyorDirectory {
    rpc: JsonRpcClient,
}

impl ConveyorDirectory {
    pub fn new(url: &str) -> Result<Self, AppError> {
        Ok(Self {
            rpc: JsonRpcClient::new(url, Duration::from_secs(3))?,
        })
    }
}

#[async_trait]
impl Directory for ConveyorDirectory {
    async fn lookup(&self, username: &str) -> Result<Option<UserData>, AppError> {
        self.rpc
            .call("conveyor.get_user_data", json!({"username": username}))
            .await
    }
}

/// Used when no directory is configured.
pub struct NoDirectory;

#[async_trait]
impl Directory for NoDirectory {
    async fn lookup(&self, _username: &str) -> Result<Option<UserData>, AppError> {
        Ok(None)
    }
}
