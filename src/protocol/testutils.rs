//! Fakes shared by the protocol tests: an in-memory chain, a wallet that
//! only records what it is asked to do and a message sender that collects
//! outbound messages.

use crate::{
    coins::{ExchangeRate, PiconeroAmount},
    config::Environment,
    crypto::monero::{Address as MoneroAddress, PrivateKeyPair},
    database::Database,
    ethereum::{
        Address, ContractSwap, EthAsset, EthereumClient, Hash, Log, LogQuery, NewSwapLog,
        Receipt, Stage, SwapCreator, CLAIMED_TOPIC, NEW_TOPIC, READY_TOPIC, REFUNDED_TOPIC, U256,
    },
    message::{Message, MessageSender},
    monero::{Balance, Transfer, Wallet, WalletClient},
    offer::{Offer, OfferBook},
    protocol::Backend,
    swap::{SwapId, SwapManager},
};
use anyhow::{bail, Result};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

pub(crate) const CONTRACT_ADDR: Address = Address([0x42; 20]);
pub(crate) const OUR_ETH_ADDR: Address = Address([0xaa; 20]);
pub(crate) const CONTRACT_CODE: [u8; 4] = [0xde, 0xad, 0xbe, 0xef];

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct ChainState {
    block_number: u64,
    logs: Vec<Log>,
    receipts: HashMap<Hash, Receipt>,
    stage: Option<Stage>,
    claim_fails: bool,
    claimed: Vec<[u8; 32]>,
}

/// An in-memory chain doubling as the escrow contract.
#[derive(Default)]
pub(crate) struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeChain::default())
    }

    pub fn set_block_number(&self, block: u64) {
        lock(&self.state).block_number = block;
    }

    pub fn push_log(&self, log: Log) {
        let mut state = lock(&self.state);
        state.block_number = state.block_number.max(log.block_number);
        state.logs.push(log);
    }

    pub fn insert_receipt(&self, receipt: Receipt) {
        lock(&self.state).receipts.insert(receipt.tx_hash, receipt);
    }

    pub fn set_stage(&self, stage: Stage) {
        lock(&self.state).stage = Some(stage);
    }

    pub fn fail_claims(&self, fail: bool) {
        lock(&self.state).claim_fails = fail;
    }

    /// The secrets revealed by successful claims, in order.
    pub fn claimed_secrets(&self) -> Vec<[u8; 32]> {
        lock(&self.state).claimed.clone()
    }
}

#[async_trait::async_trait]
impl EthereumClient for FakeChain {
    fn our_address(&self) -> Address {
        OUR_ETH_ADDR
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(lock(&self.state).block_number)
    }

    async fn balance(&self) -> Result<U256> {
        Ok(U256::from(u64::MAX))
    }

    async fn code_at(&self, address: Address) -> Result<Vec<u8>> {
        if address == CONTRACT_ADDR {
            Ok(CONTRACT_CODE.to_vec())
        } else {
            Ok(Vec::new())
        }
    }

    async fn filter_logs(&self, query: LogQuery) -> Result<Vec<Log>> {
        Ok(lock(&self.state)
            .logs
            .iter()
            .filter(|log| {
                log.address == query.contract
                    && log.topics.first() == Some(&query.topic)
                    && log.block_number >= query.from_block
            })
            .cloned()
            .collect())
    }

    async fn wait_for_receipt(&self, tx_hash: Hash) -> Result<Receipt> {
        match lock(&self.state).receipts.get(&tx_hash) {
            Some(receipt) => Ok(receipt.clone()),
            None => bail!("no receipt for transaction {}", tx_hash),
        }
    }
}

#[async_trait::async_trait]
impl SwapCreator for FakeChain {
    fn address(&self) -> Address {
        CONTRACT_ADDR
    }

    fn runtime_bytecode(&self) -> Vec<u8> {
        CONTRACT_CODE.to_vec()
    }

    async fn new_swap(&self, _swap: &ContractSwap) -> Result<Receipt> {
        bail!("new_swap is the counterparty's call")
    }

    async fn set_ready(&self, _swap: &ContractSwap) -> Result<Receipt> {
        bail!("set_ready is the counterparty's call")
    }

    async fn claim(&self, swap: &ContractSwap, secret: [u8; 32]) -> Result<Receipt> {
        let mut state = lock(&self.state);
        if state.claim_fails {
            bail!("claim transaction failed to send");
        }

        state.claimed.push(secret);
        Ok(Receipt {
            tx_hash: Hash(crate::crypto::keccak256(&secret)),
            block_number: state.block_number,
            success: true,
            logs: vec![],
        })
    }

    async fn refund(&self, _swap: &ContractSwap, _secret: [u8; 32]) -> Result<Receipt> {
        bail!("refund is the counterparty's call")
    }

    async fn swap_stage(&self, _swap_id: Hash) -> Result<Stage> {
        match lock(&self.state).stage {
            Some(stage) => Ok(stage),
            None => Ok(Stage::Pending),
        }
    }
}

#[derive(Default)]
struct WalletState {
    transfers: Vec<(MoneroAddress, PiconeroAmount)>,
    swept_to: Vec<MoneroAddress>,
}

/// A wallet with unlimited funds that records transfers and sweeps.
#[derive(Default)]
pub(crate) struct FakeWallet {
    state: Mutex<WalletState>,
}

impl FakeWallet {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeWallet::default())
    }

    pub fn transfers(&self) -> Vec<(MoneroAddress, PiconeroAmount)> {
        lock(&self.state).transfers.clone()
    }

    pub fn sweep_count(&self) -> usize {
        lock(&self.state).swept_to.len()
    }
}

#[async_trait::async_trait]
impl WalletClient for FakeWallet {
    fn primary_address(&self) -> MoneroAddress {
        MoneroAddress::from_string("primary".to_owned())
    }

    async fn chain_height(&self) -> Result<u64> {
        Ok(1_000)
    }

    async fn balance(&self) -> Result<Balance> {
        Ok(Balance {
            total: u64::MAX,
            unlocked: u64::MAX,
            blocks_to_unlock: 0,
        })
    }

    async fn transfer(&self, to: &MoneroAddress, amount: PiconeroAmount) -> Result<Transfer> {
        lock(&self.state).transfers.push((to.clone(), amount));
        Ok(Transfer {
            tx_hash: "lock-tx".to_owned(),
            height: 1_001,
            fee: PiconeroAmount::new(1),
        })
    }

    async fn open_wallet_from_keys(
        &self,
        _name: &str,
        keys: &PrivateKeyPair,
        _restore_height: u64,
    ) -> Result<MoneroAddress> {
        Ok(keys.address())
    }

    async fn sweep_all(&self, to: &MoneroAddress) -> Result<Vec<Transfer>> {
        lock(&self.state).swept_to.push(to.clone());
        Ok(vec![Transfer {
            tx_hash: "sweep-tx".to_owned(),
            height: 1_002,
            fee: PiconeroAmount::new(1),
        }])
    }

    async fn wait_for_unlock(&self) -> Result<()> {
        Ok(())
    }

    async fn open_primary_wallet(&self) -> Result<()> {
        Ok(())
    }
}

/// Records outbound messages instead of sending them anywhere.
#[derive(Default)]
pub(crate) struct FakeSender {
    sent: Mutex<Vec<(SwapId, Message)>>,
    closed: Mutex<Vec<SwapId>>,
}

impl FakeSender {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeSender::default())
    }

    pub fn sent(&self) -> Vec<(SwapId, Message)> {
        lock(&self.sent).clone()
    }

    pub fn closed(&self) -> Vec<SwapId> {
        lock(&self.closed).clone()
    }
}

#[async_trait::async_trait]
impl MessageSender for FakeSender {
    async fn send(&self, swap_id: SwapId, message: Message) -> Result<()> {
        lock(&self.sent).push((swap_id, message));
        Ok(())
    }

    async fn close(&self, swap_id: SwapId) {
        lock(&self.closed).push(swap_id);
    }
}

pub(crate) struct TestHarness {
    pub backend: Backend,
    pub chain: Arc<FakeChain>,
    pub wallet: Arc<FakeWallet>,
    pub sender: Arc<FakeSender>,
}

pub(crate) fn harness() -> TestHarness {
    let db = Arc::new(Database::new_test());
    let chain = FakeChain::new();
    let wallet = FakeWallet::new();
    let sender = FakeSender::new();

    let backend = Backend {
        env: Environment::Development,
        eth: chain.clone(),
        swap_creator: chain.clone(),
        wallet: Wallet::new(wallet.clone()),
        message_sender: sender.clone(),
        db: db.clone(),
        swaps: Arc::new(SwapManager::new(db.clone()).expect("empty database loads")),
        offers: Arc::new(OfferBook::new(db).expect("empty database loads")),
    };

    TestHarness {
        backend,
        chain,
        wallet,
        sender,
    }
}

/// An offer over one XMR at a rate of 0.5 ETH/XMR, paid in ether.
pub(crate) fn test_offer() -> Offer {
    Offer::new(
        "0.1".parse().expect("valid decimal"),
        "2".parse().expect("valid decimal"),
        ExchangeRate::new("0.5".parse().expect("valid decimal")).expect("valid rate"),
        EthAsset::Ether,
    )
    .expect("valid offer")
}

pub(crate) fn ready_log(swap_id: Hash, block_number: u64) -> Log {
    Log {
        address: CONTRACT_ADDR,
        topics: vec![*READY_TOPIC, swap_id],
        data: vec![],
        block_number,
        tx_hash: Hash([0xee; 32]),
        removed: false,
    }
}

/// A `Claimed` or `Refunded` log revealing the given little-endian secret.
pub(crate) fn secret_log(topic: Hash, swap_id: Hash, secret_le: [u8; 32], block_number: u64) -> Log {
    let mut secret_be = secret_le;
    secret_be.reverse();
    Log {
        address: CONTRACT_ADDR,
        topics: vec![topic, swap_id, Hash(secret_be)],
        data: vec![],
        block_number,
        tx_hash: Hash([0xcc; 32]),
        removed: false,
    }
}

pub(crate) fn refunded_log(swap_id: Hash, secret_le: [u8; 32], block_number: u64) -> Log {
    secret_log(*REFUNDED_TOPIC, swap_id, secret_le, block_number)
}

pub(crate) fn claimed_log(swap_id: Hash, secret_le: [u8; 32], block_number: u64) -> Log {
    secret_log(*CLAIMED_TOPIC, swap_id, secret_le, block_number)
}

/// The receipt of a lock transaction, carrying the `New` log the contract
/// would have emitted for the given swap.
pub(crate) fn lock_receipt(swap: &ContractSwap, tx_hash: Hash, block_number: u64) -> Receipt {
    let new = NewSwapLog {
        swap_id: swap.swap_id(),
        claim_key: swap.claim_commitment,
        refund_key: swap.refund_commitment,
        timeout_1: swap.timeout_1,
        timeout_2: swap.timeout_2,
        asset: swap.asset,
        value: swap.value,
    };

    let mut data = Vec::with_capacity(7 * 32);
    data.extend_from_slice(new.swap_id.as_bytes());
    data.extend_from_slice(new.claim_key.as_bytes());
    data.extend_from_slice(new.refund_key.as_bytes());
    data.extend_from_slice(&u256_word(new.timeout_1));
    data.extend_from_slice(&u256_word(new.timeout_2));
    data.extend_from_slice(&address_word(new.asset));
    data.extend_from_slice(&u256_word(new.value));

    Receipt {
        tx_hash,
        block_number,
        success: true,
        logs: vec![Log {
            address: CONTRACT_ADDR,
            topics: vec![*NEW_TOPIC],
            data,
            block_number,
            tx_hash,
            removed: false,
        }],
    }
}

fn u256_word(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

fn address_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}
