//! The seam to an external wallet process for the ring side of a swap.
//!
//! All RPC specifics live behind [`WalletClient`]. [`Wallet`] layers the swap
//! semantics on top: funds are only moved while holding the wallet lock, since
//! the wallet process can only have one wallet open at a time and a sweep of a
//! joint wallet spans several calls.

use crate::{
    coins::PiconeroAmount,
    crypto::monero::{Address, PrivateKeyPair},
    swap::SwapId,
};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Number of confirmations before swept or transferred outputs are considered
/// final. Doubles as the distance we walk back when recording the chain height
/// at swap start, so a reorg cannot hide the lock transaction from a restored
/// wallet.
pub const MIN_CONFIRMATIONS: u64 = 10;

/// An outgoing transfer as reported by the wallet.
#[derive(Clone, Debug, PartialEq)]
pub struct Transfer {
    pub tx_hash: String,
    pub height: u64,
    pub fee: PiconeroAmount,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Balance {
    pub total: u64,
    pub unlocked: u64,
    pub blocks_to_unlock: u64,
}

/// Raw operations of the external wallet process.
#[async_trait::async_trait]
pub trait WalletClient: Send + Sync {
    /// Address of the daemon's own funding wallet.
    fn primary_address(&self) -> Address;

    async fn chain_height(&self) -> Result<u64>;

    /// Balance of the currently open wallet, in piconero.
    async fn balance(&self) -> Result<Balance>;

    async fn transfer(&self, to: &Address, amount: PiconeroAmount) -> Result<Transfer>;

    /// Creates (or reopens) a wallet from the given keys and scans the chain
    /// from `restore_height`. Returns the wallet's primary address.
    async fn open_wallet_from_keys(
        &self,
        name: &str,
        keys: &PrivateKeyPair,
        restore_height: u64,
    ) -> Result<Address>;

    /// Sweeps the full balance of the open wallet to the given address.
    async fn sweep_all(&self, to: &Address) -> Result<Vec<Transfer>>;

    /// Blocks until the open wallet's full balance is unlocked.
    async fn wait_for_unlock(&self) -> Result<()>;

    /// Reopens the daemon's own funding wallet.
    async fn open_primary_wallet(&self) -> Result<()>;
}

/// The daemon's view of the wallet process, shared between swaps.
#[derive(Clone)]
pub struct Wallet {
    inner: Arc<dyn WalletClient>,
    lock: Arc<Mutex<()>>,
}

impl Wallet {
    pub fn new(inner: Arc<dyn WalletClient>) -> Self {
        Wallet {
            inner,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn primary_address(&self) -> Address {
        self.inner.primary_address()
    }

    pub async fn chain_height(&self) -> Result<u64> {
        self.inner.chain_height().await
    }

    /// The chain height a new swap records as its restore height, a
    /// confirmation window below the current tip.
    pub async fn restore_height(&self) -> Result<u64> {
        let height = self.inner.chain_height().await?;
        Ok(height.saturating_sub(MIN_CONFIRMATIONS))
    }

    /// Checks that the unlocked balance covers the given amount.
    pub async fn ensure_balance(&self, amount: PiconeroAmount) -> Result<()> {
        let balance = self.inner.balance().await?;
        if balance.unlocked < amount.as_piconero() {
            bail!(
                "balance of {} piconero is too low to provide {}",
                balance.unlocked,
                amount
            );
        }
        Ok(())
    }

    /// Locks funds into the joint wallet address of a swap.
    pub async fn lock_funds(&self, to: &Address, amount: PiconeroAmount) -> Result<Transfer> {
        let _guard = self.lock.lock().await;

        self.ensure_balance(amount).await?;
        let transfer = self
            .inner
            .transfer(to, amount)
            .await
            .context("failed to lock funds")?;

        tracing::info!(
            "locked {} in joint wallet, tx hash {}, fee {}",
            amount,
            transfer.tx_hash,
            transfer.fee
        );

        Ok(transfer)
    }

    /// Claims the balance of a joint wallet by restoring it from the combined
    /// keys and sweeping everything back into our own wallet.
    ///
    /// Holds the wallet lock across the whole sequence: another swap switching
    /// wallets mid-sweep would lose the funds in limbo.
    pub async fn sweep_joint_wallet(
        &self,
        swap_id: SwapId,
        keys: &PrivateKeyPair,
        restore_height: u64,
    ) -> Result<(Address, Vec<Transfer>)> {
        let _guard = self.lock.lock().await;

        let our_address = self.inner.primary_address();
        let wallet_name = format!("swap-wallet-{}", swap_id);

        let joint_address = self
            .inner
            .open_wallet_from_keys(&wallet_name, keys, restore_height)
            .await
            .context("failed to open joint wallet")?;

        let expected = keys.address();
        if joint_address != expected {
            // Close before erroring so the primary wallet can be reopened.
            let _ = self.inner.open_primary_wallet().await;
            bail!(
                "joint wallet address {} does not match derived address {}",
                joint_address,
                expected
            );
        }

        self.inner.wait_for_unlock().await?;

        let result = self.inner.sweep_all(&our_address).await;
        self.inner
            .open_primary_wallet()
            .await
            .context("failed to reopen primary wallet after sweep")?;

        let transfers = result.context("failed to sweep joint wallet")?;
        for transfer in &transfers {
            tracing::info!(
                "swept joint wallet of swap {}: tx hash {}, fee {}",
                swap_id,
                transfer.tx_hash,
                transfer.fee
            );
        }

        Ok((joint_address, transfers))
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Wallet({})", self.inner.primary_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::testutils::FakeWallet;

    #[tokio::test]
    async fn restore_height_is_a_confirmation_window_behind_the_tip() {
        let wallet = Wallet::new(FakeWallet::new());
        let tip = wallet.chain_height().await.unwrap();

        let height = wallet.restore_height().await.unwrap();

        assert_eq!(height, tip - MIN_CONFIRMATIONS);
    }
}
