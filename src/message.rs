//! Protocol messages exchanged between the two parties of a swap.
//!
//! The transport is not our concern, messages go out through the
//! [`MessageSender`] seam and come back in through the swap handle. On the
//! wire they are JSON, tagged with their variant name.

use crate::{
    crypto::{dleq, monero, secp256k1},
    ethereum::{Address, ContractSwap, Hash},
    swap::SwapId,
};
use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    SendKeys(SendKeysMessage),
    NotifyEthLocked(NotifyEthLocked),
    NotifyXmrLock(NotifyXmrLock),
    NotifyClaimed(NotifyClaimed),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::SendKeys(_) => "SendKeys",
            Message::NotifyEthLocked(_) => "NotifyEthLocked",
            Message::NotifyXmrLock(_) => "NotifyXmrLock",
            Message::NotifyClaimed(_) => "NotifyClaimed",
        }
    }
}

/// Sent by both parties to initiate the protocol.
///
/// The private view key of the sender is shared deliberately: it lets the
/// counterparty watch the joint wallet without being able to spend from it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendKeysMessage {
    pub offer_id: SwapId,
    pub provided_amount: Decimal,
    pub public_spend_key: monero::PublicKey,
    pub private_view_key: String,
    pub dleq_proof: dleq::Proof,
    pub secp256k1_public_key: secp256k1::PublicKey,
    pub eth_address: Address,
}

/// Sent by the party providing the account asset after locking it in the
/// escrow contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyEthLocked {
    pub address: Address,
    pub tx_hash: Hash,
    pub contract_swap_id: Hash,
    pub contract_swap: ContractSwap,
}

/// Sent by the party providing the ring asset after funding the joint wallet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyXmrLock {
    pub address: monero::Address,
    pub tx_hash: String,
}

/// Courtesy notification that the account asset was claimed, so the
/// counterparty does not have to wait for the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyClaimed {
    pub tx_hash: Hash,
}

/// Outbound half of the transport.
#[async_trait::async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, swap_id: SwapId, message: Message) -> Result<()>;

    /// Closes the stream to the counterparty of the given swap. Failures are
    /// not interesting to the protocol, the stream dies with the swap.
    async fn close(&self, swap_id: SwapId);
}
