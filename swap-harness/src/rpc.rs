//! Minimal JSON-RPC client shared by the bitcoind and geth integrations.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::{HarnessError, Result};

/// JSON-RPC client over HTTP.
#[derive(Clone, Debug)]
pub struct JsonRpcClient {
    url: String,
    version: &'static str,
    auth: Option<(String, String)>,
    timeout_secs: u64,
    client: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

impl JsonRpcClient {
    /// Create a JSON-RPC 2.0 client (geth).
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| HarnessError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into().trim_end_matches('/').to_string(),
            version: "2.0",
            auth: None,
            timeout_secs,
            client,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Create a bitcoind-style JSON-RPC 1.0 client with basic auth.
    pub fn bitcoind(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let mut client = Self::new(url, timeout_secs)?;
        client.version = "1.0";
        client.auth = Some((username.into(), password.into()));
        Ok(client)
    }

    /// Same client, addressing a sub-path (e.g. `wallet/<name>`).
    pub fn with_path(&self, path: &str) -> Self {
        Self {
            url: format!("{}/{}", self.url, path.trim_start_matches('/')),
            ..self.clone()
        }
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` and deserialize its result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: self.version,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        tracing::trace!(url = %self.url, method, "rpc request");

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some((username, password)) = &self.auth {
            builder = builder.basic_auth(username, Some(password));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(method, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| HarnessError::Serialization(format!("failed to read response: {}", e)))?;

        // bitcoind reports RPC errors with a 500 status and a JSON body
        let parsed = match serde_json::from_str::<RpcResponse>(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(self.map_status_error(method, status.as_u16(), &body))
            }
            Err(e) => {
                return Err(HarnessError::Serialization(format!(
                    "invalid {} response: {}",
                    method, e
                )))
            }
        };

        if let Some(error) = parsed.error {
            return Err(HarnessError::Rpc {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            });
        }

        serde_json::from_value(parsed.result.unwrap_or(serde_json::Value::Null)).map_err(|e| {
            HarnessError::Serialization(format!("unexpected {} result: {}", method, e))
        })
    }

    fn map_status_error(&self, method: &str, status: u16, body: &str) -> HarnessError {
        match status {
            401 | 403 => HarnessError::ConnectionFailed {
                target: self.url.clone(),
                reason: format!("{} rejected credentials ({})", method, status),
            },
            _ => HarnessError::Transport(format!(
                "rpc {} failed ({}): {}",
                method, status, body
            )),
        }
    }

    fn map_reqwest_error(&self, method: &str, e: reqwest::Error) -> HarnessError {
        if e.is_timeout() {
            HarnessError::timeout(
                format!("rpc {}", method),
                Duration::from_secs(self.timeout_secs),
            )
        } else if e.is_connect() {
            HarnessError::ConnectionFailed {
                target: self.url.clone(),
                reason: e.to_string(),
            }
        } else {
            HarnessError::Transport(format!("rpc {} failed: {}", method, e))
        }
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_call_returns_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "getblockcount", "jsonrpc": "1.0" })))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": 101, "error": null, "id": 1
            })))
            .mount(&server)
            .await;

        let client = JsonRpcClient::bitcoind(server.uri(), "user", "pass", 5).unwrap();
        let height: u64 = client.call("getblockcount", json!([])).await.unwrap();
        assert_eq!(height, 101);
    }

    #[tokio::test]
    async fn test_error_object_with_500_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wallet/abc"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "result": null,
                "error": { "code": -6, "message": "Insufficient funds" },
                "id": 1
            })))
            .mount(&server)
            .await;

        let client = JsonRpcClient::bitcoind(server.uri(), "user", "pass", 5)
            .unwrap()
            .with_path("wallet/abc");
        let err = client
            .call::<String>("sendtoaddress", json!(["bcrt1q", 1.0]))
            .await
            .unwrap_err();
        match err {
            HarnessError::Rpc { code, message, .. } => {
                assert_eq!(code, -6);
                assert_eq!(message, "Insufficient funds");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_connection_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = JsonRpcClient::new(server.uri(), 5).unwrap();
        let err = client
            .call::<u64>("eth_blockNumber", json!([]))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::ConnectionFailed { .. }));
    }
}
