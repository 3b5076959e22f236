//! Types for the account-based side of a swap and the seams through which the
//! escrow contract is reached.

use crate::crypto::keccak256;
use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

pub use primitive_types::U256;

lazy_static! {
    /// Topic of the `New` event emitted when a swap is created on-chain.
    pub static ref NEW_TOPIC: Hash =
        event_topic("New(bytes32,bytes32,bytes32,uint256,uint256,address,uint256)");

    /// Topic of the `Ready` event emitted when the swap owner calls `setReady`.
    pub static ref READY_TOPIC: Hash = event_topic("Ready(bytes32)");

    /// Topic of the `Claimed` event, which reveals the claim secret.
    pub static ref CLAIMED_TOPIC: Hash = event_topic("Claimed(bytes32,bytes32)");

    /// Topic of the `Refunded` event, which reveals the refund secret.
    pub static ref REFUNDED_TOPIC: Hash = event_topic("Refunded(bytes32,bytes32)");
}

pub fn event_topic(signature: &str) -> Hash {
    Hash(keccak256(signature.as_bytes()))
}

/// An ethereum account or contract address.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn zero() -> Self {
        Address([0u8; 20])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim_start_matches("0x");
        let bytes = hex::decode(s).context("address is not valid hex")?;
        if bytes.len() != 20 {
            bail!("address must be 20 bytes, got {}", bytes.len());
        }
        let mut array = [0u8; 20];
        array.copy_from_slice(&bytes);
        Ok(Address(array))
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 32 byte hash, used for transaction hashes, event topics and swap ids.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn zero() -> Self {
        Hash([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl FromStr for Hash {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim_start_matches("0x");
        let bytes = hex::decode(s).context("hash is not valid hex")?;
        if bytes.len() != 32 {
            bail!("hash must be 32 bytes, got {}", bytes.len());
        }
        let mut array = [0u8; 32];
        array.copy_from_slice(&bytes);
        Ok(Hash(array))
    }
}

impl Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The asset locked in the escrow contract, either ether or an ERC20 token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EthAsset {
    Ether,
    Erc20(Address),
}

impl EthAsset {
    /// The address stored in the contract, the zero address denotes ether.
    pub fn address(&self) -> Address {
        match self {
            EthAsset::Ether => Address::zero(),
            EthAsset::Erc20(address) => *address,
        }
    }
}

impl From<Address> for EthAsset {
    fn from(address: Address) -> Self {
        if address.is_zero() {
            EthAsset::Ether
        } else {
            EthAsset::Erc20(address)
        }
    }
}

impl fmt::Display for EthAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EthAsset::Ether => write!(f, "ETH"),
            EthAsset::Erc20(address) => write!(f, "ERC20({})", address),
        }
    }
}

/// An event log emitted by the escrow contract.
#[derive(Clone, Debug, PartialEq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: Hash,
    pub removed: bool,
}

/// The receipt of a mined transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct Receipt {
    pub tx_hash: Hash,
    pub block_number: u64,
    pub success: bool,
    pub logs: Vec<Log>,
}

/// A query for logs of one contract event starting at a block height.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LogQuery {
    pub contract: Address,
    pub topic: Hash,
    pub from_block: u64,
}

/// The stage of a swap as tracked by the escrow contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Invalid,
    Pending,
    Ready,
    Completed,
}

/// The immutable parameters of one on-chain swap.
///
/// The contract does not store this struct, it only stores the stage keyed by
/// the hash over these fields. Every later call must pass the identical values
/// again. `timeout_1` is the start of the claim window, `timeout_2` its end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSwap {
    pub owner: Address,
    pub claimer: Address,
    pub claim_commitment: Hash,
    pub refund_commitment: Hash,
    pub timeout_1: U256,
    pub timeout_2: U256,
    pub asset: Address,
    pub value: U256,
    pub nonce: U256,
}

impl ContractSwap {
    /// Computes the swap id the contract derives for these parameters: the
    /// Keccak-256 hash of the abi-encoded struct.
    pub fn swap_id(&self) -> Hash {
        let mut encoded = Vec::with_capacity(9 * 32);
        encoded.extend_from_slice(&abi_word_address(self.owner));
        encoded.extend_from_slice(&abi_word_address(self.claimer));
        encoded.extend_from_slice(&self.claim_commitment.0);
        encoded.extend_from_slice(&self.refund_commitment.0);
        encoded.extend_from_slice(&abi_word_u256(self.timeout_1));
        encoded.extend_from_slice(&abi_word_u256(self.timeout_2));
        encoded.extend_from_slice(&abi_word_address(self.asset));
        encoded.extend_from_slice(&abi_word_u256(self.value));
        encoded.extend_from_slice(&abi_word_u256(self.nonce));

        Hash(keccak256(&encoded))
    }
}

fn abi_word_address(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&address.0);
    word
}

fn abi_word_u256(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

/// The decoded payload of a `New` event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NewSwapLog {
    pub swap_id: Hash,
    pub claim_key: Hash,
    pub refund_key: Hash,
    pub timeout_1: U256,
    pub timeout_2: U256,
    pub asset: Address,
    pub value: U256,
}

/// Decodes a `New` event log. All parameters of the event are non-indexed and
/// thus live in the log data.
pub fn decode_new_log(log: &Log) -> Result<NewSwapLog> {
    if log.topics.first() != Some(&*NEW_TOPIC) {
        bail!("wrong log topic, expected New event");
    }
    if log.data.len() < 7 * 32 {
        bail!("New log data too short: {} bytes", log.data.len());
    }

    let word = |i: usize| -> [u8; 32] {
        let mut w = [0u8; 32];
        w.copy_from_slice(&log.data[i * 32..(i + 1) * 32]);
        w
    };

    let mut asset = [0u8; 20];
    asset.copy_from_slice(&word(5)[12..]);

    Ok(NewSwapLog {
        swap_id: Hash(word(0)),
        claim_key: Hash(word(1)),
        refund_key: Hash(word(2)),
        timeout_1: U256::from_big_endian(&word(3)),
        timeout_2: U256::from_big_endian(&word(4)),
        asset: Address(asset),
        value: U256::from_big_endian(&word(6)),
    })
}

/// Extracts the revealed secret from a `Claimed` or `Refunded` log.
///
/// The secret is published big-endian on chain and reversed here into the
/// little-endian scalar encoding used on the ring side.
pub fn decode_secret_from_log(log: &Log, event_topic: Hash) -> Result<[u8; 32]> {
    if event_topic != *CLAIMED_TOPIC && event_topic != *REFUNDED_TOPIC {
        bail!("invalid event, must be one of Claimed or Refunded");
    }
    if log.topics.first() != Some(&event_topic) {
        bail!("wrong log topic");
    }

    let secret = log
        .topics
        .get(2)
        .context("log has not enough parameters")?;
    if secret.is_zero() {
        bail!("got zero secret key from contract");
    }

    let mut bytes = secret.0;
    bytes.reverse();
    Ok(bytes)
}

/// Returns whether a `Ready`, `Claimed` or `Refunded` log belongs to the swap
/// with the given id.
pub fn log_id_matches(log: &Log, swap_id: Hash) -> bool {
    log.topics.get(1) == Some(&swap_id)
}

/// Read access to the account chain, backed by a node the daemon trusts.
#[async_trait::async_trait]
pub trait EthereumClient: Send + Sync {
    /// Address of the account this daemon signs with.
    fn our_address(&self) -> Address;

    async fn block_number(&self) -> Result<u64>;

    /// Balance of our account in wei.
    async fn balance(&self) -> Result<U256>;

    /// Deployed bytecode at the given address.
    async fn code_at(&self, address: Address) -> Result<Vec<u8>>;

    async fn filter_logs(&self, query: LogQuery) -> Result<Vec<Log>>;

    /// Waits until the transaction is mined and returns its receipt.
    async fn wait_for_receipt(&self, tx_hash: Hash) -> Result<Receipt>;
}

/// The escrow contract, reached through externally provided bindings.
#[async_trait::async_trait]
pub trait SwapCreator: Send + Sync {
    /// Address the contract is deployed at.
    fn address(&self) -> Address;

    /// The runtime bytecode the deployed contract must match.
    fn runtime_bytecode(&self) -> Vec<u8>;

    async fn new_swap(&self, swap: &ContractSwap) -> Result<Receipt>;

    async fn set_ready(&self, swap: &ContractSwap) -> Result<Receipt>;

    async fn claim(&self, swap: &ContractSwap, secret: [u8; 32]) -> Result<Receipt>;

    async fn refund(&self, swap: &ContractSwap, secret: [u8; 32]) -> Result<Receipt>;

    async fn swap_stage(&self, swap_id: Hash) -> Result<Stage>;
}
