//! Lightning wallet over the LND REST API.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use super::bitcoin::BitcoinFaucet;
use super::{poll_until_balance, MintPolling, Wallet};
use crate::asset::{Asset, AssetKind, LedgerKind};
use crate::ledgers::LightningNodeConfig;
use crate::{HarnessError, Result};

/// Header carrying the hex-encoded macaroon.
const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";

/// Attempts at `openchannel` while a node may be busy syncing a block.
const OPEN_CHANNEL_ATTEMPTS: u32 = 5;

/// How long a freshly opened channel may take to be listed.
const CHANNEL_LISTED_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Bound on waiting for both nodes to sync before opening a channel.
const SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Bound on waiting for a payment to be reported in flight.
const IN_FLIGHT_TIMEOUT: Duration = Duration::from_secs(30);

/// Deserialize LND's int64 fields, which REST renders as strings.
fn amount<'de, D>(deserializer: D) -> std::result::Result<u128, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(0),
        Some(Raw::Num(n)) => Ok(n as u128),
        Some(Raw::Str(s)) if s.is_empty() => Ok(0),
        Some(Raw::Str(s)) => s.parse().map_err(serde::de::Error::custom),
    }
}

// ============================================================================
// REST payloads
// ============================================================================

/// `GET /v1/getinfo`.
#[derive(Clone, Debug, Deserialize)]
pub struct GetInfo {
    /// Node public key (hex).
    pub identity_pubkey: String,
    /// Whether the node has caught up with the chain backend.
    #[serde(default)]
    pub synced_to_chain: bool,
    /// Chains the node is connected to.
    #[serde(default)]
    pub chains: Vec<Chain>,
    /// Timestamp of the best header.
    #[serde(default, deserialize_with = "amount")]
    pub best_header_timestamp: u128,
}

/// Chain/network pair reported by `getinfo`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    /// e.g. "bitcoin".
    pub chain: String,
    /// e.g. "regtest".
    pub network: String,
}

/// An open channel.
#[derive(Clone, Debug, Deserialize)]
pub struct Channel {
    /// Short channel id.
    #[serde(default)]
    pub chan_id: String,
    /// `txid:index` of the funding output.
    #[serde(default)]
    pub channel_point: String,
    /// Our side of the channel, absent for the counterparty.
    #[serde(default, deserialize_with = "amount")]
    pub local_balance: u128,
}

#[derive(Deserialize)]
struct ChannelPoint {
    #[serde(default)]
    funding_txid_bytes: Option<String>,
    #[serde(default)]
    funding_txid_str: Option<String>,
    #[serde(default)]
    output_index: u32,
}

/// Payment as listed by `/v1/payments`.
#[derive(Clone, Debug, Deserialize)]
pub struct Payment {
    /// Payment hash (hex).
    pub payment_hash: String,
    /// IN_FLIGHT, SUCCEEDED, FAILED, UNKNOWN.
    #[serde(default)]
    pub status: String,
}

/// Outcome of a synchronous send.
#[derive(Clone, Debug, Deserialize)]
pub struct SendResponse {
    /// Non-empty when the payment failed.
    #[serde(default)]
    pub payment_error: String,
    /// Preimage revealed by the recipient (base64).
    #[serde(default)]
    pub payment_preimage: Option<String>,
}

/// Turn an `openchannel` response into the `txid:index` form used by
/// `listchannels`.
fn serialize_channel_point(point: &ChannelPoint) -> Result<String> {
    let txid = match (&point.funding_txid_str, &point.funding_txid_bytes) {
        (Some(txid), _) => txid.clone(),
        (None, Some(bytes)) => {
            let mut bytes = BASE64
                .decode(bytes)
                .map_err(|e| HarnessError::invalid_data("funding_txid_bytes", e.to_string()))?;
            // txids are displayed byte-reversed
            bytes.reverse();
            hex::encode(bytes)
        }
        (None, None) => {
            return Err(HarnessError::invalid_data(
                "channel_point",
                "no funding txid",
            ))
        }
    };
    Ok(format!("{}:{}", txid, point.output_index))
}

fn hex_to_base64(field: &str, value: &str) -> Result<String> {
    let bytes = hex::decode(value).map_err(|e| HarnessError::invalid_data(field, e.to_string()))?;
    Ok(BASE64.encode(bytes))
}

// ============================================================================
// REST client
// ============================================================================

/// Thin client for the LND REST API.
#[derive(Clone, Debug)]
pub struct LndClient {
    rest_url: String,
    macaroon: Option<String>,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl LndClient {
    /// Authenticated client for the node described by `config`.
    pub fn new(config: &LightningNodeConfig) -> Result<Self> {
        let mut client = Self::unauthenticated(
            &config.rest_url,
            config.tls_cert_path.as_deref(),
            config.timeout_secs,
        )?;
        if let Some(path) = &config.macaroon_path {
            client.macaroon = Some(hex::encode(std::fs::read(path)?));
        }
        Ok(client)
    }

    /// Client without macaroon, for the wallet unlocker endpoints.
    pub fn unauthenticated(
        rest_url: &str,
        tls_cert: Option<&Path>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(timeout_secs));
        if let Some(path) = tls_cert {
            let pem = std::fs::read(path)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| HarnessError::invalid_data("tls.cert", e.to_string()))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|e| HarnessError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            rest_url: rest_url.trim_end_matches('/').to_string(),
            macaroon: None,
            timeout_secs,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.rest_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.macaroon {
            Some(macaroon) => builder.header(MACAROON_HEADER, macaroon),
            None => builder,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(path, e))?;
        self.handle_response(path, response).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T> {
        let response = self
            .request(reqwest::Method::POST, path)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(path, e))?;
        self.handle_response(path, response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        path: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarnessError::Rpc {
                method: path.to_string(),
                code: status.as_u16() as i64,
                message: body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| HarnessError::Serialization(format!("invalid {} response: {}", path, e)))
    }

    fn map_reqwest_error(&self, path: &str, e: reqwest::Error) -> HarnessError {
        if e.is_timeout() {
            HarnessError::timeout(format!("lnd {}", path), Duration::from_secs(self.timeout_secs))
        } else if e.is_connect() {
            HarnessError::ConnectionFailed {
                target: self.rest_url.clone(),
                reason: e.to_string(),
            }
        } else {
            HarnessError::Transport(format!("lnd {} failed: {}", path, e))
        }
    }

    /// Generate a cipher seed mnemonic.
    pub async fn gen_seed(&self) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct GenSeed {
            cipher_seed_mnemonic: Vec<String>,
        }
        let seed: GenSeed = self.get("/v1/genseed").await?;
        Ok(seed.cipher_seed_mnemonic)
    }

    /// Create the node wallet from `mnemonic`.
    pub async fn init_wallet(&self, mnemonic: &[String], password: &str) -> Result<()> {
        let _: serde_json::Value = self
            .post(
                "/v1/initwallet",
                json!({
                    "wallet_password": BASE64.encode(password),
                    "cipher_seed_mnemonic": mnemonic,
                }),
            )
            .await?;
        Ok(())
    }

    /// Node info.
    pub async fn get_info(&self) -> Result<GetInfo> {
        self.get("/v1/getinfo").await
    }

    /// New nested-segwit funding address.
    pub async fn new_address(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct NewAddress {
            address: String,
        }
        // type 1 = NESTED_PUBKEY_HASH
        let address: NewAddress = self.get("/v1/newaddress?type=1").await?;
        Ok(address.address)
    }

    /// Confirmed on-chain balance in satoshis.
    pub async fn wallet_balance(&self) -> Result<u128> {
        #[derive(Deserialize)]
        struct WalletBalance {
            #[serde(default, deserialize_with = "amount")]
            confirmed_balance: u128,
        }
        let balance: WalletBalance = self.get("/v1/balance/blockchain").await?;
        Ok(balance.confirmed_balance)
    }

    /// Aggregate local channel balance in satoshis.
    pub async fn channel_balance(&self) -> Result<u128> {
        #[derive(Deserialize)]
        struct ChannelBalance {
            #[serde(default, deserialize_with = "amount")]
            balance: u128,
        }
        let balance: ChannelBalance = self.get("/v1/balance/channels").await?;
        Ok(balance.balance)
    }

    /// Connect to `pubkey@host`.
    pub async fn connect_peer(&self, pubkey: &str, host: &str) -> Result<()> {
        let _: serde_json::Value = self
            .post("/v1/peers", json!({ "addr": { "pubkey": pubkey, "host": host } }))
            .await?;
        Ok(())
    }

    /// Connected peers' public keys.
    pub async fn list_peers(&self) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct Peer {
            pub_key: String,
        }
        #[derive(Deserialize)]
        struct Peers {
            #[serde(default)]
            peers: Vec<Peer>,
        }
        let peers: Peers = self.get("/v1/peers").await?;
        Ok(peers.peers.into_iter().map(|p| p.pub_key).collect())
    }

    /// Open a channel and return its channel point.
    pub async fn open_channel_sync(&self, pubkey: &str, local_funding_amount: u128) -> Result<String> {
        let point: ChannelPoint = self
            .post(
                "/v1/channels",
                json!({
                    "node_pubkey_string": pubkey,
                    "local_funding_amount": local_funding_amount.to_string(),
                }),
            )
            .await?;
        serialize_channel_point(&point)
    }

    /// Open channels.
    pub async fn list_channels(&self) -> Result<Vec<Channel>> {
        #[derive(Deserialize)]
        struct Channels {
            #[serde(default)]
            channels: Vec<Channel>,
        }
        let channels: Channels = self.get("/v1/channels").await?;
        Ok(channels.channels)
    }

    /// Add a hold invoice and return its payment request.
    pub async fn add_hold_invoice(
        &self,
        sats: u128,
        secret_hash: &str,
        expiry: u64,
        cltv_expiry: u64,
    ) -> Result<String> {
        #[derive(Deserialize)]
        struct AddHoldInvoice {
            payment_request: String,
        }
        let invoice: AddHoldInvoice = self
            .post(
                "/v2/invoices/hodl",
                json!({
                    "hash": hex_to_base64("secret_hash", secret_hash)?,
                    "value": sats.to_string(),
                    "expiry": expiry.to_string(),
                    "cltv_expiry": cltv_expiry.to_string(),
                }),
            )
            .await?;
        Ok(invoice.payment_request)
    }

    /// Settle a hold invoice with its preimage.
    pub async fn settle_invoice(&self, secret: &str) -> Result<()> {
        let _: serde_json::Value = self
            .post(
                "/v2/invoices/settle",
                json!({ "preimage": hex_to_base64("secret", secret)? }),
            )
            .await?;
        Ok(())
    }

    /// Blocking send; returns once the payment settles or fails.
    ///
    /// A non-empty `payment_error` in a successful response is an error too.
    pub async fn send_payment_sync(
        &self,
        dest: &str,
        sats: u128,
        payment_hash: &str,
        final_cltv_delta: u32,
    ) -> Result<SendResponse> {
        const PATH: &str = "/v1/channels/transactions";

        let response: SendResponse = self
            .post(
                PATH,
                json!({
                    "dest": hex_to_base64("dest", dest)?,
                    "amt": sats.to_string(),
                    "payment_hash": hex_to_base64("payment_hash", payment_hash)?,
                    "final_cltv_delta": final_cltv_delta,
                }),
            )
            .await?;
        if !response.payment_error.is_empty() {
            return Err(HarnessError::Rpc {
                method: PATH.to_string(),
                code: 0,
                message: response.payment_error,
            });
        }
        Ok(response)
    }

    /// Payments, including in-flight ones.
    pub async fn list_payments(&self) -> Result<Vec<Payment>> {
        #[derive(Deserialize)]
        struct Payments {
            #[serde(default)]
            payments: Vec<Payment>,
        }
        let payments: Payments = self.get("/v1/payments?include_incomplete=true").await?;
        Ok(payments.payments)
    }
}

// ============================================================================
// Wallet
// ============================================================================

/// A payment handed to LND by [`LightningWallet::send_payment`].
#[derive(Debug)]
pub enum PendingPayment {
    /// Reported IN_FLIGHT; the task resolves once the payment settles or
    /// fails.
    InFlight(JoinHandle<Result<SendResponse>>),
    /// Settled before it was seen in flight.
    Settled(SendResponse),
}

impl PendingPayment {
    /// Wait for the payment to settle.
    pub async fn wait(self) -> Result<SendResponse> {
        match self {
            Self::InFlight(task) => join_payment(task).await,
            Self::Settled(response) => Ok(response),
        }
    }
}

async fn join_payment(task: JoinHandle<Result<SendResponse>>) -> Result<SendResponse> {
    task.await
        .map_err(|e| HarnessError::invalid_data("payment", format!("payment task failed: {}", e)))?
}

/// An actor's LND node.
#[derive(Debug)]
pub struct LightningWallet {
    client: Arc<LndClient>,
    p2p_socket: String,
    faucet: BitcoinFaucet,
    polling: MintPolling,
}

impl LightningWallet {
    /// Wallet for the node described by `config`.
    pub async fn new_instance(config: &LightningNodeConfig, faucet: BitcoinFaucet) -> Result<Self> {
        let client = LndClient::new(config)?;
        let info = client.get_info().await?;
        tracing::debug!(pubkey = %info.identity_pubkey, synced = info.synced_to_chain, "lnd getinfo");

        Ok(Self {
            client: Arc::new(client),
            p2p_socket: config.p2p_socket.clone(),
            faucet,
            polling: MintPolling::default(),
        })
    }

    /// Wallet over an existing `client`, reachable by peers at `p2p_socket`.
    pub fn from_client(
        client: LndClient,
        p2p_socket: impl Into<String>,
        faucet: BitcoinFaucet,
    ) -> Self {
        Self {
            client: Arc::new(client),
            p2p_socket: p2p_socket.into(),
            faucet,
            polling: MintPolling::default(),
        }
    }

    /// Override the mint polling bounds.
    pub fn with_mint_polling(mut self, polling: MintPolling) -> Self {
        self.polling = polling;
        self
    }

    /// `host:port` peers connect to.
    pub fn p2p_socket(&self) -> &str {
        &self.p2p_socket
    }

    /// Underlying REST client.
    pub fn client(&self) -> &LndClient {
        &self.client
    }

    /// Node public key.
    pub async fn get_pubkey(&self) -> Result<String> {
        Ok(self.client.get_info().await?.identity_pubkey)
    }

    /// Whether the node caught up with the chain.
    pub async fn is_synced_to_chain(&self) -> Result<bool> {
        Ok(self.client.get_info().await?.synced_to_chain)
    }

    /// Connect to `to`. Already being connected is fine.
    pub async fn connect_peer(&self, to: &LightningWallet) -> Result<()> {
        let pubkey = to.get_pubkey().await?;
        if let Err(e) = self.client.connect_peer(&pubkey, to.p2p_socket()).await {
            tracing::warn!(host = %to.p2p_socket(), error = %e, "error while connecting to peer");
        }
        Ok(())
    }

    /// Open a channel to `to` funded with `quantity` sats from our side.
    ///
    /// Returns the channel point once the channel is listed.
    pub async fn open_channel(&self, to: &LightningWallet, quantity: u128) -> Result<String> {
        self.connect_peer(to).await?;

        let deadline = Instant::now() + SYNC_TIMEOUT;
        while !(self.is_synced_to_chain().await? && to.is_synced_to_chain().await?) {
            if Instant::now() >= deadline {
                return Err(HarnessError::timeout("lnd nodes to sync", SYNC_TIMEOUT));
            }
            tracing::info!("one of the lnd nodes is not yet synced, waiting");
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let pubkey = to.get_pubkey().await?;
        let mut attempt = 0;
        // a node busy processing a block rejects the request
        let channel_point = loop {
            attempt += 1;
            match self.client.open_channel_sync(&pubkey, quantity).await {
                Ok(point) => break point,
                Err(e) if attempt < OPEN_CHANNEL_ATTEMPTS => {
                    tracing::debug!(attempt, error = %e, "openchannel failed, retrying");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        };

        let deadline = Instant::now() + CHANNEL_LISTED_TIMEOUT;
        loop {
            let channels = self.client.list_channels().await?;
            if channels.iter().any(|c| c.channel_point == channel_point) {
                tracing::info!(channel_point = %channel_point, quantity, "channel opened");
                return Ok(channel_point);
            }
            if Instant::now() >= deadline {
                return Err(HarnessError::timeout(
                    format!("channel {} to be listed", channel_point),
                    CHANNEL_LISTED_TIMEOUT,
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Add a hold invoice locked to `secret_hash`.
    pub async fn add_hold_invoice(
        &self,
        sats: u128,
        secret_hash: &str,
        expiry: u64,
        cltv_expiry: u64,
    ) -> Result<String> {
        self.client
            .add_hold_invoice(sats, secret_hash, expiry, cltv_expiry)
            .await
    }

    /// Settle the hold invoice whose preimage is `secret`.
    pub async fn settle_invoice(&self, secret: &str) -> Result<()> {
        self.client.settle_invoice(secret).await
    }

    /// Start paying `sats` to `public_key` and return once LND reports the
    /// payment in flight.
    ///
    /// A payment that fails before it is seen in flight is an error.
    pub async fn send_payment(
        &self,
        public_key: &str,
        sats: u128,
        secret_hash: &str,
        final_cltv_delta: u32,
    ) -> Result<PendingPayment> {
        let client = self.client.clone();
        let dest = public_key.to_string();
        let hash = secret_hash.to_string();
        let pending = tokio::spawn(async move {
            client
                .send_payment_sync(&dest, sats, &hash, final_cltv_delta)
                .await
        });

        let deadline = Instant::now() + IN_FLIGHT_TIMEOUT;
        loop {
            let payments = self.client.list_payments().await?;
            let in_flight = payments
                .iter()
                .any(|p| p.payment_hash == secret_hash && p.status == "IN_FLIGHT");
            if in_flight {
                tracing::debug!(payment_hash = %secret_hash, "payment in flight");
                return Ok(PendingPayment::InFlight(pending));
            }
            if pending.is_finished() {
                let response = join_payment(pending).await?;
                tracing::debug!(payment_hash = %secret_hash, "payment settled before in flight");
                return Ok(PendingPayment::Settled(response));
            }
            if Instant::now() >= deadline {
                pending.abort();
                return Err(HarnessError::timeout(
                    format!("payment {} to be in flight", secret_hash),
                    IN_FLIGHT_TIMEOUT,
                ));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Check that this node is the one the daemon talks to.
    pub async fn assert_lnd_details(
        &self,
        self_public_key: &str,
        chain: &str,
        network: &str,
    ) -> Result<()> {
        let info = self.client.get_info().await?;

        if info.identity_pubkey != self_public_key {
            return Err(HarnessError::invalid_data(
                "self_public_key",
                format!(
                    "lnd public key does not match the daemon's: expected {}, actual {}",
                    self_public_key, info.identity_pubkey
                ),
            ));
        }

        let expected = Chain {
            chain: chain.to_string(),
            network: network.to_string(),
        };
        match info.chains.as_slice() {
            [actual] if *actual == expected => Ok(()),
            [actual] => Err(HarnessError::invalid_data(
                "chain",
                format!(
                    "lnd runs on {}/{}, daemon expects {}/{}",
                    actual.chain, actual.network, chain, network
                ),
            )),
            chains => Err(HarnessError::invalid_data(
                "chains",
                format!("lnd is connected to {} chains, expected one", chains.len()),
            )),
        }
    }

    /// Local balance of the channel at `channel_point`.
    pub async fn get_channel_balance(&self, channel_point: &str) -> Result<u128> {
        self.client
            .list_channels()
            .await?
            .into_iter()
            .find(|c| c.channel_point == channel_point)
            .map(|c| c.local_balance)
            .ok_or_else(|| {
                HarnessError::invalid_data("channel", format!("{} does not exist", channel_point))
            })
    }

    /// Confirmed on-chain balance.
    pub async fn get_onchain_balance(&self) -> Result<u128> {
        self.client.wallet_balance().await
    }

    /// On-chain plus channel balance.
    pub async fn get_balance(&self) -> Result<u128> {
        let onchain = self.client.wallet_balance().await?;
        let channels = self.client.channel_balance().await?;
        Ok(onchain + channels)
    }

    fn ensure_supported(&self, asset: &Asset) -> Result<()> {
        if asset.ledger == LedgerKind::Lightning && asset.kind == AssetKind::Bitcoin {
            Ok(())
        } else {
            Err(HarnessError::UnsupportedAsset {
                wallet: LedgerKind::Lightning.to_string(),
                asset: asset.to_string(),
            })
        }
    }
}

#[async_trait]
impl Wallet for LightningWallet {
    fn ledger(&self) -> LedgerKind {
        LedgerKind::Lightning
    }

    fn maximum_fee(&self) -> u128 {
        // routing over a direct channel is free; on-chain fees are paid at
        // channel open, before balances are snapshotted
        0
    }

    async fn mint(&self, asset: &Asset) -> Result<()> {
        self.ensure_supported(asset)?;

        let starting = self.get_balance().await?;
        let address = self.client.new_address().await?;
        self.faucet.mint_to_address(asset.quantity, &address).await?;

        poll_until_balance(
            &asset.key().to_string(),
            starting.saturating_add(asset.quantity),
            self.polling,
            || self.get_balance(),
        )
        .await
    }

    async fn get_balance_by_asset(&self, asset: &Asset) -> Result<u128> {
        self.ensure_supported(asset)?;
        self.get_balance().await
    }

    async fn get_blockchain_time(&self) -> Result<u64> {
        Ok(self.client.get_info().await?.best_header_timestamp as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> LndClient {
        let mut client = LndClient::unauthenticated(&server.uri(), None, 5).unwrap();
        client.macaroon = Some("0201036c6e64".to_string());
        client
    }

    #[test]
    fn test_channel_point_is_byte_reversed() {
        let point = ChannelPoint {
            funding_txid_bytes: Some(BASE64.encode([0x01, 0x02, 0x03, 0xff])),
            funding_txid_str: None,
            output_index: 0,
        };
        assert_eq!(serialize_channel_point(&point).unwrap(), "ff030201:0");
    }

    #[tokio::test]
    async fn test_balances_sum_onchain_and_channels() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/balance/blockchain"))
            .and(header(MACAROON_HEADER, "0201036c6e64"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_balance": "1000", "confirmed_balance": "900"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/balance/channels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "balance": "250" })))
            .mount(&server)
            .await;

        let client = client(&server);
        assert_eq!(client.wallet_balance().await.unwrap(), 900);
        assert_eq!(client.channel_balance().await.unwrap(), 250);
    }

    #[tokio::test]
    async fn test_missing_balance_fields_are_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/balance/channels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        assert_eq!(client(&server).channel_balance().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hold_invoice_encodes_hash_as_base64() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/invoices/hodl"))
            .and(body_partial_json(json!({ "hash": "AAEC/w==", "value": "1000" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "payment_request": "lnbcrt10u1p0"
            })))
            .mount(&server)
            .await;

        let request = client(&server)
            .add_hold_invoice(1000, "000102ff", 3600, 350)
            .await
            .unwrap();
        assert_eq!(request, "lnbcrt10u1p0");
    }

    fn wallet(server: &MockServer) -> LightningWallet {
        let bitcoin = crate::ledgers::BitcoinNodeConfig::new("127.0.0.1", 18443, "user", "pass");
        LightningWallet::from_client(
            client(server),
            "127.0.0.1:9735",
            BitcoinFaucet::new(&bitcoin).unwrap(),
        )
    }

    async fn mount_no_payments(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v1/payments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "payments": [] })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_send_payment_without_route_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/channels/transactions"))
            .respond_with(
                ResponseTemplate::new(500).set_body_string("unable to find a path to destination"),
            )
            .mount(&server)
            .await;
        mount_no_payments(&server).await;

        let err = wallet(&server)
            .send_payment("02aa", 1_000, "00112233", 40)
            .await
            .unwrap_err();
        match err {
            HarnessError::Rpc { code, message, .. } => {
                assert_eq!(code, 500);
                assert!(message.contains("unable to find a path"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_send_payment_error_in_response_body_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/channels/transactions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "payment_error": "insufficient local balance"
            })))
            .mount(&server)
            .await;
        mount_no_payments(&server).await;

        let err = wallet(&server)
            .send_payment("02aa", 1_000, "00112233", 40)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("insufficient local balance"));
    }

    #[tokio::test]
    async fn test_send_payment_returns_once_in_flight() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/channels/transactions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "payment_preimage": "AAEC" }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/payments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "payments": [{ "payment_hash": "00112233", "status": "IN_FLIGHT" }]
            })))
            .mount(&server)
            .await;

        let pending = wallet(&server)
            .send_payment("02aa", 1_000, "00112233", 40)
            .await
            .unwrap();
        assert!(matches!(pending, PendingPayment::InFlight(_)));

        let response = pending.wait().await.unwrap();
        assert_eq!(response.payment_preimage.as_deref(), Some("AAEC"));
    }

    #[tokio::test]
    async fn test_error_status_maps_to_rpc_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments"))
            .and(query_param("include_incomplete", "true"))
            .respond_with(ResponseTemplate::new(500).set_body_string("permission denied"))
            .mount(&server)
            .await;

        let err = client(&server).list_payments().await.unwrap_err();
        match err {
            HarnessError::Rpc { code, message, .. } => {
                assert_eq!(code, 500);
                assert!(message.contains("permission denied"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
