//! Minimal JSON-RPC 2.0 client over HTTP.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// JSON-RPC client bound to one endpoint.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    url: String,
    http_client: reqwest::Client,
}

impl JsonRpcClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.to_string(),
            http_client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` and decode its `result`.
    ///
    /// Transport failures, non-2xx responses and JSON-RPC error objects all
    /// map to [`AppError::Rpc`]. A body that is not valid JSON-RPC maps to
    /// [`AppError::Decode`].
    pub async fn call<P, T>(&self, method: &str, params: P) -> Result<T, AppError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Rpc(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Rpc(format!("{} returned HTTP {}", method, status)));
        }

        let body: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| AppError::Decode(format!("{} response: {}", method, e)))?;

        if let Some(error) = body.error {
            return Err(AppError::Rpc(format!(
                "{} failed with code {}: {}",
                method, error.code, error.message
            )));
        }

        match body.result {
            Some(result) => Ok(result),
            // A null result is only acceptable when `T` can represent it.
            None => serde_json::from_value(serde_json::Value::Null)
                .map_err(|_| AppError::Decode(format!("{} response has no result", method))),
        }
    }
}
