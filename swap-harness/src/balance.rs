//! Post-swap balance checks.
//!
//! Fees are never assumed to be exact: every bound that involves paying a
//! fee is widened by the wallet's maximum fee.

use crate::asset::{Asset, AssetKey};
use crate::wallets::Wallet;
use crate::{HarnessError, Result};

/// Checks one asset's balance against a starting snapshot and an expected
/// delta.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BalanceAsserter {
    asset: Asset,
    starting_balance: u128,
    delta: u128,
    maximum_fee: u128,
}

impl BalanceAsserter {
    /// Asserter for `asset`, which started at `starting_balance` and is
    /// expected to move by `delta`.
    pub fn new(asset: Asset, starting_balance: u128, delta: u128, maximum_fee: u128) -> Self {
        Self {
            asset,
            starting_balance,
            delta,
            maximum_fee,
        }
    }

    /// Key of the asset under test.
    pub fn key(&self) -> AssetKey {
        self.asset.key()
    }

    /// Balance before the swap.
    pub fn starting_balance(&self) -> u128 {
        self.starting_balance
    }

    /// We received `delta`, minus at most the fee of claiming it.
    pub async fn assert_received(&self, wallet: &dyn Wallet) -> Result<()> {
        let current = self.current(wallet).await?;
        check_received(
            self.key(),
            self.starting_balance,
            self.delta,
            self.maximum_fee,
            current,
        )
    }

    /// We paid `delta`, plus at most the fee of paying it.
    pub async fn assert_spent(&self, wallet: &dyn Wallet) -> Result<()> {
        let current = self.current(wallet).await?;
        check_spent(
            self.key(),
            self.starting_balance,
            self.delta,
            self.maximum_fee,
            current,
        )
    }

    /// We got our funds back, minus at most the fees of funding and
    /// refunding.
    pub async fn assert_refunded(&self, wallet: &dyn Wallet) -> Result<()> {
        let current = self.current(wallet).await?;
        check_refunded(self.key(), self.starting_balance, self.maximum_fee, current)
    }

    /// Nothing arrived.
    pub async fn assert_nothing_received(&self, wallet: &dyn Wallet) -> Result<()> {
        let current = self.current(wallet).await?;
        check_nothing_received(self.key(), self.starting_balance, current)
    }

    async fn current(&self, wallet: &dyn Wallet) -> Result<u128> {
        let balance = wallet.get_balance_by_asset(&self.asset).await?;
        tracing::debug!(
            asset = %self.key(),
            start = self.starting_balance,
            delta = self.delta,
            balance,
            "checking balance"
        );
        Ok(balance)
    }
}

/// `current >= start + delta - fee`
pub fn check_received(
    asset: AssetKey,
    start: u128,
    delta: u128,
    fee: u128,
    current: u128,
) -> Result<()> {
    at_least(asset, start.saturating_add(delta).saturating_sub(fee), current)
}

/// `start - delta - fee <= current <= start - delta`
pub fn check_spent(
    asset: AssetKey,
    start: u128,
    delta: u128,
    fee: u128,
    current: u128,
) -> Result<()> {
    let upper = start.saturating_sub(delta);
    at_least(asset, upper.saturating_sub(fee), current)?;
    at_most(asset, upper, current)
}

/// `current >= start - fee`
pub fn check_refunded(asset: AssetKey, start: u128, fee: u128, current: u128) -> Result<()> {
    at_least(asset, start.saturating_sub(fee), current)
}

/// `current <= start`
pub fn check_nothing_received(asset: AssetKey, start: u128, current: u128) -> Result<()> {
    at_most(asset, start, current)
}

fn at_least(asset: AssetKey, expected: u128, actual: u128) -> Result<()> {
    if actual >= expected {
        Ok(())
    } else {
        Err(mismatch(asset, "at least", expected, actual))
    }
}

fn at_most(asset: AssetKey, expected: u128, actual: u128) -> Result<()> {
    if actual <= expected {
        Ok(())
    } else {
        Err(mismatch(asset, "at most", expected, actual))
    }
}

fn mismatch(asset: AssetKey, comparison: &'static str, expected: u128, actual: u128) -> HarnessError {
    HarnessError::BalanceMismatch {
        asset: asset.to_string(),
        comparison,
        expected,
        actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::LedgerKind;
    use async_trait::async_trait;

    fn btc() -> AssetKey {
        Asset::bitcoin(1).key()
    }

    #[test]
    fn test_received_within_fee() {
        assert!(check_received(btc(), 1_000, 500, 100, 1_400).is_ok());
        assert!(check_received(btc(), 1_000, 500, 100, 1_500).is_ok());

        let err = check_received(btc(), 1_000, 500, 100, 1_399).unwrap_err();
        match err {
            HarnessError::BalanceMismatch {
                comparison,
                expected,
                actual,
                ..
            } => {
                assert_eq!(comparison, "at least");
                assert_eq!(expected, 1_400);
                assert_eq!(actual, 1_399);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_spent_is_bounded_both_ways() {
        assert!(check_spent(btc(), 1_000, 500, 100, 450).is_ok());
        assert!(check_spent(btc(), 1_000, 500, 100, 400).is_ok());
        assert!(check_spent(btc(), 1_000, 500, 100, 399).is_err());
        // more than start - delta means the payment never happened
        assert!(check_spent(btc(), 1_000, 500, 100, 501).is_err());
    }

    #[test]
    fn test_refunded_and_nothing_received() {
        assert!(check_refunded(btc(), 1_000, 100, 900).is_ok());
        assert!(check_refunded(btc(), 1_000, 100, 899).is_err());

        assert!(check_nothing_received(btc(), 1_000, 1_000).is_ok());
        assert!(check_nothing_received(btc(), 1_000, 1_001).is_err());
    }

    #[test]
    fn test_subtraction_saturates() {
        assert!(check_received(btc(), 0, 10, 1_000, 0).is_ok());
        assert!(check_spent(btc(), 10, 1_000, 5, 0).is_ok());
        assert!(check_refunded(btc(), 10, 1_000, 0).is_ok());
    }

    struct FixedBalance(u128);

    #[async_trait]
    impl Wallet for FixedBalance {
        fn ledger(&self) -> LedgerKind {
            LedgerKind::Bitcoin
        }

        fn maximum_fee(&self) -> u128 {
            0
        }

        async fn mint(&self, _asset: &Asset) -> Result<()> {
            Ok(())
        }

        async fn get_balance_by_asset(&self, _asset: &Asset) -> Result<u128> {
            Ok(self.0)
        }

        async fn get_blockchain_time(&self) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_asserter_reads_wallet_balance() {
        let asserter = BalanceAsserter::new(Asset::bitcoin(100_000), 1_000_000, 100_000, 10_000);

        asserter.assert_received(&FixedBalance(1_095_000)).await.unwrap();
        asserter.assert_spent(&FixedBalance(895_000)).await.unwrap();
        asserter.assert_refunded(&FixedBalance(995_000)).await.unwrap();
        asserter
            .assert_nothing_received(&FixedBalance(1_000_000))
            .await
            .unwrap();

        assert!(asserter
            .assert_received(&FixedBalance(1_000_000))
            .await
            .is_err());
    }
}
