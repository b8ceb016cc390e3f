use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::failover::Endpoint;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 client; the endpoint to talk to is chosen per call
///
/// Cloneable so it can be moved into router operations. Clones share the
/// HTTP connection pool and request id counter.
#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// POST one request to `endpoint`
    ///
    /// Non-2xx statuses, JSON-RPC error objects and missing results are all
    /// errors so the router can fail over on them.
    pub async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        method: &str,
        params: Value,
    ) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        tracing::trace!(endpoint = %endpoint.name(), method, id = request.id, "RPC request");

        let response = self
            .client
            .post(endpoint.url())
            .json(&request)
            .send()
            .await
            .with_context(|| format!("{} request to {} failed", method, endpoint.name()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("{} returned HTTP {}: {}", endpoint.name(), status, body);
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;

        if let Some(error) = body.error {
            anyhow::bail!("{} RPC error {}: {}", method, error.code, error.message);
        }

        body.result
            .with_context(|| format!("{} response has no result", method))
    }

    pub async fn get_slot(&self, endpoint: &Endpoint) -> Result<u64> {
        self.call(endpoint, "getSlot", Value::Array(Vec::new())).await
    }

    /// Solana node health; "ok" when the node is caught up
    pub async fn get_health(&self, endpoint: &Endpoint) -> Result<String> {
        self.call(endpoint, "getHealth", Value::Array(Vec::new())).await
    }
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use mockito::Matcher;

    fn endpoint_for(url: String) -> Endpoint {
        Endpoint::new(&EndpointConfig::new("mock", url, 0))
    }

    #[tokio::test]
    async fn test_get_slot() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "jsonrpc": "2.0",
                "method": "getSlot"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","result":289347112,"id":1}"#)
            .create_async()
            .await;

        let client = RpcClient::new();
        let slot = client.get_slot(&endpoint_for(server.url())).await.unwrap();

        assert_eq!(slot, 289347112);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rpc_error_object_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"jsonrpc":"2.0","error":{"code":-32005,"message":"Node is behind by 42 slots"},"id":1}"#,
            )
            .create_async()
            .await;

        let client = RpcClient::new();
        let err = client
            .get_health(&endpoint_for(server.url()))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("-32005"));
    }

    #[tokio::test]
    async fn test_http_error_status_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(429)
            .with_body("Too many requests")
            .create_async()
            .await;

        let client = RpcClient::new();
        let err = client
            .get_slot(&endpoint_for(server.url()))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("429"));
    }

    #[test]
    fn test_client_creation() {
        let client = RpcClient::default();
        assert_eq!(client.next_id.load(Ordering::Relaxed), 1);
    }
}
