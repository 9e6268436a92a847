//! A swap as seen by one actor, and execution of its actions.
//!
//! The daemon decides which action is available next. Executing an action
//! means filling in the fields the daemon asks for (addresses, fee rates)
//! from the actor's wallets, calling the action, and then performing the
//! ledger action the daemon hands back (broadcast, deploy, pay invoice).

use serde_json::json;

use crate::daemon::payload::LedgerAction;
use crate::daemon::siren::{Action, Field, FieldValues};
use crate::daemon::{CndClient, SwapEntity};
use crate::ledgers::BitcoinNetwork;
use crate::wallets::Wallets;
use crate::{HarnessError, Result};

/// Handle on one swap resource of one daemon.
#[derive(Clone)]
pub struct Swap {
    client: CndClient,
    self_href: String,
    wallets: Wallets,
}

impl Swap {
    /// Swap at `self_href`, executing ledger actions with `wallets`.
    pub fn new(client: CndClient, self_href: impl Into<String>, wallets: Wallets) -> Self {
        Self {
            client,
            self_href: self_href.into(),
            wallets,
        }
    }

    /// Location of the swap resource.
    pub fn self_href(&self) -> &str {
        &self.self_href
    }

    /// Absolute URL of the swap resource. Unique across daemons.
    pub fn resource_url(&self) -> String {
        format!(
            "{}/{}",
            self.client.base_url(),
            self.self_href.trim_start_matches('/')
        )
    }

    /// Current state of the swap.
    pub async fn fetch_details(&self) -> Result<SwapEntity> {
        self.client.fetch_swap(&self.self_href).await
    }

    /// The action the daemon currently offers, if any.
    ///
    /// The daemon exposes at most one action at a time; anything else means
    /// the harness and the daemon disagree about the protocol.
    pub async fn next_action(&self) -> Result<Option<Action>> {
        let swap = self.fetch_details().await?;
        next_action_of(&swap)
    }

    /// Execute `action` and perform the resulting ledger action.
    ///
    /// Returns the transaction id (or payment reference) of the ledger action,
    /// `None` when the daemon asked for nothing on a ledger.
    pub async fn execute(&self, action: &Action) -> Result<Option<String>> {
        let values = self.resolve_fields(&action.fields).await?;
        tracing::debug!(action = %action.name, swap = %self.self_href, "executing action");

        match self.client.execute_action(action, &values).await? {
            Some(ledger_action) => self.do_ledger_action(ledger_action).await.map(Some),
            None => Ok(None),
        }
    }

    /// Fill in values for `fields` from our wallets.
    ///
    /// Fields we have no value for are left out, so the daemon applies its
    /// default.
    pub async fn resolve_fields(&self, fields: &[Field]) -> Result<FieldValues> {
        let mut values = FieldValues::new();
        for field in fields {
            match self.resolve_field(field).await? {
                Some(value) => {
                    values.insert(field.name.clone(), value);
                }
                None => tracing::debug!(
                    field = %field.name,
                    class = ?field.class,
                    "no value for field, leaving it to the daemon"
                ),
            }
        }
        Ok(values)
    }

    async fn resolve_field(&self, field: &Field) -> Result<Option<String>> {
        if field.has_classes(&["bitcoin", "feePerWU"]) {
            return Ok(Some(self.wallets.bitcoin()?.get_fee().to_string()));
        }
        if field.has_classes(&["bitcoin", "address"]) {
            return self.wallets.bitcoin()?.get_address().await.map(Some);
        }
        if field.has_classes(&["ethereum", "address"]) {
            return Ok(Some(self.wallets.ethereum()?.account().to_string()));
        }
        Ok(match &field.value {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        })
    }

    /// Perform `action` with the matching wallet.
    pub async fn do_ledger_action(&self, action: LedgerAction) -> Result<String> {
        let kind = action.kind();
        let params = serde_json::to_value(&action).unwrap_or_else(|_| json!({ "type": kind }));
        tracing::info!(action = kind, swap = %self.self_href, "performing ledger action");

        self.perform(action)
            .await
            .map_err(|e| HarnessError::wallet(kind, params, e))
    }

    async fn perform(&self, action: LedgerAction) -> Result<String> {
        match action {
            LedgerAction::BitcoinBroadcastSignedTransaction { hex, network } => {
                let network = parse_network(&network)?;
                self.wallets
                    .bitcoin()?
                    .broadcast_transaction(&hex, network)
                    .await
            }
            LedgerAction::BitcoinSendAmountToAddress {
                to,
                amount,
                network,
            } => {
                let network = parse_network(&network)?;
                self.wallets
                    .bitcoin()?
                    .send_to_address(&to, amount, network)
                    .await
            }
            LedgerAction::EthereumCallContract {
                contract_address,
                data,
                gas_limit,
                chain_id,
            } => {
                let receipt = self
                    .wallets
                    .ethereum()?
                    .call_contract(
                        data.as_deref().unwrap_or("0x"),
                        &contract_address,
                        gas_limit_u64(gas_limit)?,
                        chain_id,
                    )
                    .await?;
                Ok(receipt.transaction_hash)
            }
            LedgerAction::EthereumDeployContract {
                data,
                amount,
                gas_limit,
                chain_id,
            } => {
                let receipt = self
                    .wallets
                    .ethereum()?
                    .deploy_contract(&data, amount, gas_limit_u64(gas_limit)?, chain_id)
                    .await?;
                Ok(receipt.transaction_hash)
            }
            LedgerAction::LndSendPayment {
                self_public_key,
                to_public_key,
                amount,
                secret_hash,
                final_cltv_delta,
                chain,
                network,
            } => {
                let wallet = self.wallets.lightning()?;
                wallet
                    .assert_lnd_details(&self_public_key, &chain, &network)
                    .await?;
                // the payment settles only once the receiver settles the
                // hold invoice, so we return as soon as it is in flight
                let pending = wallet
                    .send_payment(&to_public_key, amount, &secret_hash, final_cltv_delta)
                    .await?;
                tracing::debug!(payment = ?pending, "lnd payment handed off");
                Ok(secret_hash)
            }
            LedgerAction::LndAddHoldInvoice {
                self_public_key,
                amount,
                secret_hash,
                expiry,
                cltv_expiry,
                chain,
                network,
            } => {
                let wallet = self.wallets.lightning()?;
                wallet
                    .assert_lnd_details(&self_public_key, &chain, &network)
                    .await?;
                wallet
                    .add_hold_invoice(amount, &secret_hash, expiry, cltv_expiry)
                    .await
            }
            LedgerAction::LndSettleInvoice {
                self_public_key,
                secret,
                chain,
                network,
            } => {
                let wallet = self.wallets.lightning()?;
                wallet
                    .assert_lnd_details(&self_public_key, &chain, &network)
                    .await?;
                wallet.settle_invoice(&secret).await?;
                Ok(secret)
            }
            LedgerAction::None => Err(HarnessError::invalid_data(
                "ledger action",
                "nothing to perform",
            )),
        }
    }
}

/// The single action offered by `swap`, if any.
pub fn next_action_of(swap: &SwapEntity) -> Result<Option<Action>> {
    match swap.actions.as_slice() {
        [] => Ok(None),
        [action] => Ok(Some(action.clone())),
        actions => Err(HarnessError::invalid_data(
            "actions",
            format!(
                "expected at most one action, got {:?}",
                actions.iter().map(|a| a.name.as_str()).collect::<Vec<_>>()
            ),
        )),
    }
}

fn parse_network(network: &str) -> Result<BitcoinNetwork> {
    BitcoinNetwork::parse(network).ok_or_else(|| {
        HarnessError::invalid_data("network", format!("unknown bitcoin network {}", network))
    })
}

fn gas_limit_u64(gas_limit: u128) -> Result<u64> {
    u64::try_from(gas_limit)
        .map_err(|_| HarnessError::invalid_data("gas_limit", format!("{} exceeds u64", gas_limit)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn swap_with_actions(actions: serde_json::Value) -> SwapEntity {
        serde_json::from_value(json!({
            "properties": {
                "role": "Alice",
                "alpha": { "protocol": "herc20" },
                "beta": { "protocol": "hbit" },
                "events": []
            },
            "actions": actions,
            "links": [{ "rel": ["self"], "href": "/swaps/1" }]
        }))
        .unwrap()
    }

    #[test]
    fn test_no_action() {
        let swap = swap_with_actions(json!([]));
        assert!(next_action_of(&swap).unwrap().is_none());
    }

    #[test]
    fn test_single_action() {
        let swap = swap_with_actions(json!([{ "name": "deploy", "href": "/swaps/1/deploy" }]));
        let action = next_action_of(&swap).unwrap().unwrap();
        assert_eq!(action.name, "deploy");
    }

    #[test]
    fn test_more_than_one_action_is_rejected() {
        let swap = swap_with_actions(json!([
            { "name": "accept", "href": "/swaps/1/accept" },
            { "name": "decline", "href": "/swaps/1/decline" }
        ]));
        let err = next_action_of(&swap).unwrap_err();
        assert!(err.to_string().contains("accept"));
    }

    #[test]
    fn test_gas_limit_conversion() {
        assert_eq!(gas_limit_u64(0x3D0900).unwrap(), 0x3D0900);
        assert!(gas_limit_u64(u128::MAX).is_err());
    }

    #[test]
    fn test_unknown_network() {
        assert!(parse_network("regtest").is_ok());
        assert!(parse_network("signet-ish").is_err());
    }

    #[tokio::test]
    async fn test_field_with_preset_value() {
        let swap = Swap::new(
            CndClient::new("http://127.0.0.1:1").unwrap(),
            "/swaps/1",
            Wallets::new(),
        );
        let field: Field = serde_json::from_value(json!({
            "name": "secret", "class": [], "value": "abc"
        }))
        .unwrap();
        let values = swap.resolve_fields(&[field]).await.unwrap();
        assert_eq!(values["secret"], "abc");
    }

    #[tokio::test]
    async fn test_field_without_value_is_left_out() {
        let swap = Swap::new(
            CndClient::new("http://127.0.0.1:1").unwrap(),
            "/swaps/1",
            Wallets::new(),
        );
        let fields: Vec<Field> = serde_json::from_value(json!([
            { "name": "secret", "class": [], "value": "abc" },
            { "name": "expiry_hint", "class": ["optional"] }
        ]))
        .unwrap();

        let values = swap.resolve_fields(&fields).await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values["secret"], "abc");
        assert!(!values.contains_key("expiry_hint"));
    }

    #[tokio::test]
    async fn test_failed_lnd_payment_is_a_wallet_error() {
        use crate::wallets::bitcoin::BitcoinFaucet;
        use crate::wallets::lightning::{LightningWallet, LndClient};
        use std::sync::Arc;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let lnd = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/getinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "identity_pubkey": "02aa",
                "synced_to_chain": true,
                "chains": [{ "chain": "bitcoin", "network": "regtest" }]
            })))
            .mount(&lnd)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/channels/transactions"))
            .respond_with(
                ResponseTemplate::new(500).set_body_string("unable to find a path to destination"),
            )
            .mount(&lnd)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/payments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "payments": [] })))
            .mount(&lnd)
            .await;

        let bitcoin = crate::ledgers::BitcoinNodeConfig::new("127.0.0.1", 18443, "user", "pass");
        let wallet = LightningWallet::from_client(
            LndClient::unauthenticated(&lnd.uri(), None, 5).unwrap(),
            "127.0.0.1:9735",
            BitcoinFaucet::new(&bitcoin).unwrap(),
        );
        let swap = Swap::new(
            CndClient::new("http://127.0.0.1:1").unwrap(),
            "/swaps/1",
            Wallets::new().with_lightning(Arc::new(wallet)),
        );

        let result = swap
            .do_ledger_action(LedgerAction::LndSendPayment {
                self_public_key: "02aa".to_string(),
                to_public_key: "02bb".to_string(),
                amount: 10_000,
                secret_hash: "00112233".to_string(),
                final_cltv_delta: 40,
                chain: "bitcoin".to_string(),
                network: "regtest".to_string(),
            })
            .await;

        match result {
            Err(HarnessError::Wallet {
                attempted_action,
                source,
                ..
            }) => {
                assert_eq!(attempted_action, "lnd-send-payment");
                assert!(source.to_string().contains("unable to find a path"));
            }
            other => panic!("expected a wallet error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_wallet_for_field() {
        let swap = Swap::new(
            CndClient::new("http://127.0.0.1:1").unwrap(),
            "/swaps/1",
            Wallets::new(),
        );
        let field: Field = serde_json::from_value(json!({
            "name": "address", "class": ["ethereum", "address"]
        }))
        .unwrap();
        assert!(matches!(
            swap.resolve_fields(&[field]).await,
            Err(HarnessError::MissingWallet(_))
        ));
    }
}
