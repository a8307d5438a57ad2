/// JSON-RPC provider reached over HTTP.
///
/// Talks to a node or remote signer that keeps accounts unlocked. There is no
/// push channel, so subscribers never see events from this backend.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use super::{
    Provider, ProviderError, ProviderEvent, ProviderKind, ProviderResult, EVENT_CHANNEL_CAPACITY,
};
use crate::errors::{WalletError, WalletResult};

pub struct HttpProvider {
    client: Client,
    endpoint: String,
    next_id: AtomicU64,
    closed: AtomicBool,
    events: broadcast::Sender<ProviderEvent>,
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// JSON-RPC error structure
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl HttpProvider {
    pub fn new(endpoint: &str, timeout: Duration) -> WalletResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            WalletError::NetworkError(format!("Failed to create HTTP client: {}", e))
        })?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(HttpProvider {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            events,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn rpc_call(&self, method: &str, params: Value) -> ProviderResult<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::internal(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ProviderError::internal(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::internal(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = rpc_response.error {
            return Err(ProviderError::new(error.code, error.message));
        }

        Ok(rpc_response.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Http
    }

    async fn request(&self, method: &str, params: Value) -> ProviderResult<Value> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ProviderError::disconnected());
        }
        log::debug!("http provider request {} -> {}", method, self.endpoint);
        self.rpc_call(method, params).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_body_parses() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":4902,"message":"Unrecognized chain"}}"#;
        let parsed: JsonRpcResponse = serde_json::from_str(body).unwrap();
        let error = parsed.error.unwrap();
        assert_eq!(error.code, 4902);
        assert!(parsed.result.is_none());
    }

    #[tokio::test]
    async fn closed_provider_short_circuits() {
        let provider = HttpProvider::new("http://127.0.0.1:9/", Duration::from_secs(1)).unwrap();
        assert_eq!(provider.endpoint(), "http://127.0.0.1:9");
        provider.close().await;
        let err = provider
            .request("eth_chainId", Value::Array(vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.code, ProviderError::DISCONNECTED);
    }

    #[tokio::test]
    #[ignore = "requires a JSON-RPC node at localhost:8545"]
    async fn test_real_chain_id_call() {
        let provider =
            HttpProvider::new("http://localhost:8545", Duration::from_secs(30)).unwrap();
        let result = provider.request("eth_chainId", Value::Array(vec![])).await;
        assert!(result.is_ok(), "chain id call should succeed");
    }
}
