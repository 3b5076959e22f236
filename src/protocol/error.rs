//! Errors of the swap protocol.
//!
//! Protocol violations are distinguishable from transient failures so callers
//! can decide between aborting the swap and retrying later.

use crate::{ethereum::Hash, protocol::EventType};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("did not receive the counterparty's public spend or view key")]
    MissingKeys,

    #[error("got empty contract address")]
    MissingAddress,

    #[error("expected a contract swap id in the lock notification")]
    MissingContractSwapId,

    #[error("counterparty's key proof is invalid")]
    InvalidProof(#[source] anyhow::Error),

    #[error("key proof does not bind the claimed public keys")]
    KeyProofMismatch,

    #[error("hash of the contract swap struct does not match the asserted swap id")]
    SwapIdMismatch,

    #[error("lock transaction was not sent to the expected contract address")]
    InvalidLockTransaction,

    #[error("counterparty's lock transaction reverted")]
    LockTxReverted,

    #[error("deployed bytecode at {0} does not match the escrow contract")]
    InvalidContractCode(crate::ethereum::Address),

    #[error("lock transaction receipt carries no New log")]
    MissingNewLog,

    #[error("New log carries swap id {got}, expected {expected}")]
    UnexpectedSwapId { got: Hash, expected: Hash },

    #[error("contract claim commitment is {got}, expected our {expected}")]
    ClaimCommitmentMismatch { got: Hash, expected: Hash },

    #[error("contract refund commitment is {got}, expected the counterparty's {expected}")]
    RefundCommitmentMismatch { got: Hash, expected: Hash },

    #[error("contract locks a different asset than agreed")]
    AssetMismatch,

    #[error("contract locks a different value than agreed")]
    ValueMismatch,

    #[error("locked amount differs from the amount announced in the key exchange")]
    AmountMismatch,

    #[error("first timeout is too far from the expected duration")]
    InvalidTimeout1,

    #[error("window between the timeouts does not match the expected duration")]
    InvalidTimeout2,

    #[error("past the claim deadline and the counterparty has not refunded yet")]
    ClaimPastDeadline,

    #[error("no refund log found for this swap")]
    NoRefundLogFound,

    #[error("unexpected message {got}")]
    UnexpectedMessage { got: &'static str },

    #[error("got {got:?} while expecting {expected:?}")]
    UnexpectedEvent { got: EventType, expected: EventType },

    #[error("protocol already in progress for this offer")]
    AlreadyInProgress,

    #[error("swap can only be recovered from the state where both assets are locked")]
    InvalidStageForRecovery,

    #[error("swap task is gone")]
    SwapTaskGone,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
