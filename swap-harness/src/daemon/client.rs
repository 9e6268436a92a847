//! HTTP client for the daemon API.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::payload::{BtcDaiOrder, LedgerAction, SwapEntity};
use super::siren::{Action, Entity, FieldValues, Method};
use crate::{HarnessError, Result};

/// `GET /` of the daemon.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    /// libp2p peer id.
    pub id: String,
    /// Multiaddresses the daemon listens on.
    #[serde(default)]
    pub listen_addresses: Vec<String>,
}

/// One connected peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// libp2p peer id.
    pub id: String,
    /// Known multiaddresses.
    #[serde(default)]
    pub endpoints: Vec<String>,
}

#[derive(Deserialize)]
struct Peers {
    #[serde(default)]
    peers: Vec<PeerInfo>,
}

/// Client for one daemon's HTTP API.
#[derive(Clone, Debug)]
pub struct CndClient {
    base_url: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl CndClient {
    /// Client for the API at `base_url` (e.g. "http://127.0.0.1:8000").
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, 10)
    }

    /// Client with a custom request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| HarnessError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_secs,
            client,
        })
    }

    /// Base URL of the API.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            format!("{}/{}", self.base_url, href.trim_start_matches('/'))
        }
    }

    /// GET `href` and parse the JSON body.
    pub async fn fetch<T: DeserializeOwned>(&self, href: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(href))
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(href, e))?;
        self.handle_response(&format!("GET {}", href), response).await
    }

    /// Peer id and listen addresses.
    pub async fn get_root(&self) -> Result<Root> {
        self.fetch("/").await
    }

    /// Our libp2p peer id.
    pub async fn get_peer_id(&self) -> Result<String> {
        Ok(self.get_root().await?.id)
    }

    /// Currently connected peers.
    pub async fn get_peers(&self) -> Result<Vec<PeerInfo>> {
        let peers: Peers = self.fetch("/peers").await?;
        Ok(peers.peers)
    }

    /// Ask the daemon to dial `addresses`.
    pub async fn dial(&self, addresses: &[String]) -> Result<()> {
        let request = "POST /dial".to_string();
        let response = self
            .client
            .post(self.url("/dial"))
            .json(&serde_json::json!({ "addresses": addresses }))
            .send()
            .await
            .map_err(|e| self.map_reqwest_error("/dial", e))?;
        self.ensure_success(&request, response).await?;
        Ok(())
    }

    /// Create a swap at `path` (e.g. "/swaps/herc20/hbit") and return the
    /// swap's location.
    pub async fn create_swap<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<String> {
        self.post_for_location(path, body).await
    }

    /// Publish a BTC/DAI order and return the order's location.
    pub async fn create_order(&self, body: &BtcDaiOrder) -> Result<String> {
        self.post_for_location("/orders/BTC-DAI", body).await
    }

    /// Swap resource at `href`.
    pub async fn fetch_swap(&self, href: &str) -> Result<SwapEntity> {
        self.fetch(href).await
    }

    /// `GET /swaps`.
    pub async fn list_swaps(&self) -> Result<Entity> {
        self.fetch("/swaps").await
    }

    /// Execute `action` with resolved field `values`.
    ///
    /// GET actions carry the values as query parameters, all other methods as
    /// a JSON body. Returns the ledger action the daemon asks for, if any.
    pub async fn execute_action(
        &self,
        action: &Action,
        values: &FieldValues,
    ) -> Result<Option<LedgerAction>> {
        let request = format!("{:?} {}", action.method, action.href);
        let mut builder = self
            .client
            .request(action.method.into(), self.url(&action.href));

        builder = match action.method {
            Method::Get | Method::Delete => builder.query(values),
            _ => builder.json(values),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(&action.href, e))?;
        let body = self.ensure_success(&request, response).await?;

        if body.trim().is_empty() {
            return Ok(None);
        }
        let value: serde_json::Value = serde_json::from_str(&body)?;
        if value.get("type").is_none() {
            return Ok(None);
        }
        match serde_json::from_value(value)? {
            LedgerAction::None => Ok(None),
            action => Ok(Some(action)),
        }
    }

    async fn post_for_location<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<String> {
        let request = format!("POST {}", path);
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(path, e))?;

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.ensure_success(&request, response).await?;

        let location = location.ok_or_else(|| {
            HarnessError::invalid_data("location", format!("{} returned no Location header", request))
        })?;
        tracing::info!(location = %location, "created resource");
        Ok(location)
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        request: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let body = self.ensure_success(request, response).await?;
        serde_json::from_str(&body).map_err(|e| {
            HarnessError::Serialization(format!("invalid response to {}: {}", request, e))
        })
    }

    /// Return the body of a successful response or a `Daemon` error.
    async fn ensure_success(&self, request: &str, response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| HarnessError::Transport(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(HarnessError::Daemon {
                request: request.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        tracing::debug!(request, status = status.as_u16(), "daemon request");
        Ok(body)
    }

    fn map_reqwest_error(&self, href: &str, e: reqwest::Error) -> HarnessError {
        if e.is_timeout() {
            HarnessError::timeout(
                format!("daemon request {}", href),
                Duration::from_secs(self.timeout_secs),
            )
        } else if e.is_connect() {
            HarnessError::ConnectionFailed {
                target: self.base_url.clone(),
                reason: e.to_string(),
            }
        } else {
            HarnessError::Transport(format!("daemon request {} failed: {}", href, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_create_swap_returns_location() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/swaps/herc20/hbit"))
            .respond_with(ResponseTemplate::new(201).insert_header("Location", "/swaps/1234"))
            .mount(&server)
            .await;

        let client = CndClient::new(server.uri()).unwrap();
        let location = client
            .create_swap("/swaps/herc20/hbit", &json!({ "role": "Alice" }))
            .await
            .unwrap();
        assert_eq!(location, "/swaps/1234");
    }

    #[tokio::test]
    async fn test_error_status_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/swaps/hbit/herc20"))
            .respond_with(ResponseTemplate::new(400).set_body_string("{\"title\":\"invalid body\"}"))
            .mount(&server)
            .await;

        let client = CndClient::new(server.uri()).unwrap();
        let err = client
            .create_swap("/swaps/hbit/herc20", &json!({}))
            .await
            .unwrap_err();
        match err {
            HarnessError::Daemon { status, body, .. } => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid body"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_get_action_sends_fields_as_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/swaps/1/fund"))
            .and(query_param("address", "bcrt1qxyz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "bitcoin-send-amount-to-address",
                "payload": { "to": "bcrt1qhtlc", "amount": "10000", "network": "regtest" }
            })))
            .mount(&server)
            .await;

        let client = CndClient::new(server.uri()).unwrap();
        let action: Action = serde_json::from_value(json!({
            "name": "fund", "href": "/swaps/1/fund", "method": "GET"
        }))
        .unwrap();
        let mut values = FieldValues::new();
        values.insert("address".to_string(), "bcrt1qxyz".to_string());

        let ledger_action = client.execute_action(&action, &values).await.unwrap();
        assert!(matches!(
            ledger_action,
            Some(LedgerAction::BitcoinSendAmountToAddress { amount: 10_000, .. })
        ));
    }

    #[tokio::test]
    async fn test_action_without_ledger_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/swaps/1/accept"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = CndClient::new(server.uri()).unwrap();
        let action: Action = serde_json::from_value(json!({
            "name": "accept", "href": "/swaps/1/accept", "method": "POST"
        }))
        .unwrap();
        assert!(client
            .execute_action(&action, &FieldValues::new())
            .await
            .unwrap()
            .is_none());
    }
}
