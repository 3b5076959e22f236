//! Standalone resolution of swaps that were interrupted after both assets
//! were locked.
//!
//! Recovery works from persisted state only, it does not need the original
//! swap task or a live counterparty. It is idempotent: every outcome is
//! derived from what is already on chain, and nothing is written until the
//! outcome is confirmed there. Running it again after a crash mid-way yields
//! the same result.

use crate::{
    crypto::monero::{sum_private_spend_keys, sum_private_view_keys, PrivateKeyPair},
    database::{ContractSwapInfo, SharedSwapKeys},
    ethereum::{
        decode_secret_from_log, log_id_matches, Hash, Log, LogQuery, Stage, CLAIMED_TOPIC,
        REFUNDED_TOPIC,
    },
    protocol::{
        error::{self, Error},
        keys_from_spend_key, Backend, KeysAndProof,
    },
    swap::{Status, SwapId},
};
use anyhow::Context;
use chrono::{DateTime, Utc};

/// How an interrupted swap was resolved.
#[derive(Debug)]
pub enum RecoveryResult {
    /// The locked account asset was (or already had been) claimed with our
    /// secret.
    Claimed { tx_hash: Hash },
    /// The counterparty refunded, the joint wallet was swept back into ours.
    Recovered { address: crate::crypto::monero::Address },
}

/// Everything needed to resolve one interrupted swap.
pub struct RecoveryState {
    backend: Backend,
    swap_id: SwapId,
    keys: KeysAndProof,
    eth_info: ContractSwapInfo,
    monero_start_height: u64,
    t0: DateTime<Utc>,
    t1: DateTime<Utc>,
}

impl std::fmt::Debug for RecoveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryState")
            .field("swap_id", &self.swap_id)
            .field("t0", &self.t0)
            .field("t1", &self.t1)
            .finish()
    }
}

impl RecoveryState {
    /// Loads the persisted state of the given swap. Fails if the swap never
    /// reached the point where the counterparty locked their asset.
    pub fn new(backend: Backend, swap_id: SwapId) -> error::Result<Self> {
        let secret_share = backend
            .db
            .secret_share(swap_id)?
            .context("no secret share stored for this swap")?;
        let keys = keys_from_spend_key(&secret_share)?;

        let eth_info = backend
            .db
            .contract_swap_info(swap_id)?
            .ok_or(Error::InvalidStageForRecovery)?;

        let record = backend
            .db
            .get_swap(swap_id)?
            .context("no swap record stored for this swap")?;

        let t0 = super::swap_state::unix_timestamp(eth_info.swap.timeout_1)?;
        let t1 = super::swap_state::unix_timestamp(eth_info.swap.timeout_2)?;

        Ok(RecoveryState {
            backend,
            swap_id,
            keys,
            eth_info,
            monero_start_height: record.monero_start_height,
            t0,
            t1,
        })
    }

    /// Resolves the swap, preferring whatever already happened on chain.
    ///
    /// A past claim of ours wins over everything, a refund by the
    /// counterparty wins over a fresh claim attempt. Only when neither is
    /// found does this try to claim.
    pub async fn claim_or_recover(&self) -> error::Result<RecoveryResult> {
        if let Some(log) = self.find_contract_log(*CLAIMED_TOPIC).await? {
            tracing::info!(
                "funds were already claimed in transaction {}",
                log.tx_hash
            );
            self.finish(Status::CompletedSuccess);
            return Ok(RecoveryResult::Claimed {
                tx_hash: log.tx_hash,
            });
        }

        if let Some(log) = self.find_contract_log(*REFUNDED_TOPIC).await? {
            tracing::info!("counterparty refunded, sweeping the joint wallet");
            let address = self.recover_from_refund(&log).await?;
            self.finish(Status::CompletedRefund);
            return Ok(RecoveryResult::Recovered { address });
        }

        let tx_hash = self.try_claim().await?;
        self.finish(Status::CompletedSuccess);
        Ok(RecoveryResult::Claimed { tx_hash })
    }

    /// Searches the contract's logs for an event of ours since the lock.
    async fn find_contract_log(&self, topic: Hash) -> error::Result<Option<Log>> {
        let logs = self
            .backend
            .eth
            .filter_logs(LogQuery {
                contract: self.eth_info.swap_creator_addr,
                topic,
                from_block: self.eth_info.start_block,
            })
            .await?;

        Ok(logs
            .into_iter()
            .find(|log| !log.removed && log_id_matches(log, self.eth_info.contract_swap_id)))
    }

    /// The counterparty's refund revealed their secret. Combine it with ours
    /// and sweep the joint wallet.
    async fn recover_from_refund(
        &self,
        log: &Log,
    ) -> error::Result<crate::crypto::monero::Address> {
        let secret_bytes = decode_secret_from_log(log, *REFUNDED_TOPIC)?;
        let counterparty_secret =
            crate::crypto::monero::PrivateSpendKey::from_bytes(secret_bytes)?;
        let counterparty_view = counterparty_secret.view_key();

        let joint_spend =
            sum_private_spend_keys(&counterparty_secret, self.keys.private_keys.spend_key());
        let joint_view =
            sum_private_view_keys(&counterparty_view, self.keys.private_keys.view_key());
        let joint_keys = PrivateKeyPair::new(joint_spend, joint_view);

        self.backend.db.put_shared_swap_keys(
            self.swap_id,
            &SharedSwapKeys {
                private_spend_key: joint_keys.spend_key().clone(),
                private_view_key: joint_keys.view_key().clone(),
            },
        )?;

        let (address, _) = self
            .backend
            .wallet
            .sweep_joint_wallet(self.swap_id, &joint_keys, self.monero_start_height)
            .await?;

        Ok(address)
    }

    /// Attempts to claim, waiting for the claim window to open if needed.
    async fn try_claim(&self) -> error::Result<Hash> {
        let now = Utc::now();
        if now >= self.t1 {
            // Refundable again, a claim would hand the counterparty both
            // assets if they refund first. Leave the decision to the
            // operator.
            return Err(Error::ClaimPastDeadline);
        }

        let stage = self
            .backend
            .swap_creator
            .swap_stage(self.eth_info.contract_swap_id)
            .await?;
        if now < self.t0 && stage != Stage::Ready {
            let wait = (self.t0 - now)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO)
                + std::time::Duration::from_secs(1);
            tracing::info!(
                "claim window opens at {}, waiting {}s",
                self.t0,
                wait.as_secs()
            );
            tokio::time::sleep(wait).await;
        }

        let receipt = self
            .backend
            .swap_creator
            .claim(&self.eth_info.swap, self.keys.contract_secret())
            .await?;
        if !receipt.success {
            return Err(Error::Other(anyhow::anyhow!(
                "claim transaction {} reverted",
                receipt.tx_hash
            )));
        }

        tracing::info!("claimed funds in transaction {}", receipt.tx_hash);
        Ok(receipt.tx_hash)
    }

    /// Marks the swap as completed with the given terminal status. Only
    /// called once the outcome is confirmed on chain.
    fn finish(&self, status: Status) {
        if let Some(info) = self.backend.swaps.ongoing_swap(self.swap_id) {
            info.set_status(status);
            if let Err(e) = self.backend.swaps.complete_ongoing_swap(&info) {
                tracing::warn!("failed to mark swap {} as completed: {:#}", self.swap_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        coins::ExchangeRate,
        ethereum::{Address, ContractSwap, EthAsset, U256},
        protocol::{
            generate_keys_and_proof,
            testutils::{claimed_log, harness, refunded_log, TestHarness, CONTRACT_ADDR},
            KeysAndProof,
        },
        swap::{Info, ProvidesCoin},
    };
    use std::sync::Arc;

    /// Persists the state of a swap interrupted right after both assets were
    /// locked.
    fn interrupted_swap(
        h: &TestHarness,
        t0_offset_secs: i64,
        t1_offset_secs: i64,
    ) -> (SwapId, KeysAndProof, KeysAndProof, ContractSwap) {
        let keys = generate_keys_and_proof().unwrap();
        let cp = generate_keys_and_proof().unwrap();
        let swap_id = SwapId::from_bytes([7u8; 32]);

        let now = Utc::now().timestamp() as u64;
        let swap = ContractSwap {
            owner: Address([0xbb; 20]),
            claimer: crate::protocol::testutils::OUR_ETH_ADDR,
            claim_commitment: keys.secp256k1_public.keccak_commitment(),
            refund_commitment: cp.secp256k1_public.keccak_commitment(),
            timeout_1: U256::from(now.wrapping_add_signed(t0_offset_secs)),
            timeout_2: U256::from(now.wrapping_add_signed(t1_offset_secs)),
            asset: Address::zero(),
            value: U256::from(1u64),
            nonce: U256::from(1u64),
        };

        h.backend
            .db
            .put_secret_share(swap_id, keys.private_keys.spend_key())
            .unwrap();
        h.backend
            .db
            .put_contract_swap_info(
                swap_id,
                &ContractSwapInfo {
                    start_block: 5,
                    contract_swap_id: swap.swap_id(),
                    swap,
                    swap_creator_addr: CONTRACT_ADDR,
                },
            )
            .unwrap();

        let info = Arc::new(Info::new(
            swap_id,
            ProvidesCoin::Xmr,
            "1".parse().unwrap(),
            "0.5".parse().unwrap(),
            ExchangeRate::new("0.5".parse().unwrap()).unwrap(),
            EthAsset::Ether,
            Status::XmrLocked,
            990,
        ));
        h.backend.swaps.add_swap(info).unwrap();
        h.chain.set_block_number(6);

        (swap_id, keys, cp, swap)
    }

    #[tokio::test]
    async fn claims_when_window_is_open() {
        let h = harness();
        let (swap_id, keys, _, _) = interrupted_swap(&h, -10, 3_600);
        h.chain.set_stage(crate::ethereum::Stage::Ready);

        let recovery = RecoveryState::new(h.backend.clone(), swap_id).unwrap();
        let result = recovery.claim_or_recover().await.unwrap();

        assert!(matches!(result, RecoveryResult::Claimed { .. }));
        assert_eq!(h.chain.claimed_secrets(), vec![keys.contract_secret()]);
        assert_eq!(
            h.backend.swaps.past_swap(swap_id).unwrap().status,
            Status::CompletedSuccess
        );
    }

    #[tokio::test]
    async fn past_claim_is_found_without_sending_anything() {
        let h = harness();
        let (swap_id, keys, _, swap) = interrupted_swap(&h, -10, 3_600);
        let log = claimed_log(swap.swap_id(), keys.secret.as_bytes(), 6);
        h.chain.push_log(log.clone());

        let recovery = RecoveryState::new(h.backend.clone(), swap_id).unwrap();

        // Running recovery twice resolves to the same on-chain outcome.
        for _ in 0..2 {
            match recovery.claim_or_recover().await.unwrap() {
                RecoveryResult::Claimed { tx_hash } => assert_eq!(tx_hash, log.tx_hash),
                other => panic!("expected a claim, got {:?}", other),
            }
        }
        assert!(h.chain.claimed_secrets().is_empty());
    }

    #[tokio::test]
    async fn refund_wins_over_a_fresh_claim() {
        let h = harness();
        let (swap_id, keys, cp, swap) = interrupted_swap(&h, -10, 3_600);
        h.chain.set_stage(crate::ethereum::Stage::Ready);
        h.chain
            .push_log(refunded_log(swap.swap_id(), cp.secret.as_bytes(), 6));

        let recovery = RecoveryState::new(h.backend.clone(), swap_id).unwrap();
        let result = recovery.claim_or_recover().await.unwrap();

        assert!(matches!(result, RecoveryResult::Recovered { .. }));
        assert!(h.chain.claimed_secrets().is_empty());
        assert_eq!(h.wallet.sweep_count(), 1);

        let shared = h.backend.db.shared_swap_keys(swap_id).unwrap().unwrap();
        let expected = sum_private_spend_keys(
            cp.private_keys.spend_key(),
            keys.private_keys.spend_key(),
        );
        assert_eq!(shared.private_spend_key, expected);
    }

    #[tokio::test]
    async fn claiming_past_the_deadline_is_refused() {
        let h = harness();
        let (swap_id, _, _, _) = interrupted_swap(&h, -7_200, -10);

        let recovery = RecoveryState::new(h.backend.clone(), swap_id).unwrap();
        let result = recovery.claim_or_recover().await;

        assert!(matches!(result, Err(Error::ClaimPastDeadline)));
        assert!(h.chain.claimed_secrets().is_empty());
        assert!(h.backend.swaps.has_ongoing_swap(swap_id));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_the_claim_window_to_open() {
        let h = harness();
        let (swap_id, keys, _, _) = interrupted_swap(&h, 30, 3_600);

        let recovery = RecoveryState::new(h.backend.clone(), swap_id).unwrap();
        let result = recovery.claim_or_recover().await.unwrap();

        assert!(matches!(result, RecoveryResult::Claimed { .. }));
        assert_eq!(h.chain.claimed_secrets(), vec![keys.contract_secret()]);
    }

    #[tokio::test]
    async fn swaps_without_a_lock_cannot_be_recovered() {
        let h = harness();
        let keys = generate_keys_and_proof().unwrap();
        let swap_id = SwapId::from_bytes([9u8; 32]);
        h.backend
            .db
            .put_secret_share(swap_id, keys.private_keys.spend_key())
            .unwrap();

        let result = RecoveryState::new(h.backend.clone(), swap_id);
        assert!(matches!(result, Err(Error::InvalidStageForRecovery)));
    }
}
