//! The per-swap protocol: key exchange, fund locking, claim and refund.
//!
//! Each swap runs as its own task behind a [`SwapHandle`]. All collaborators a
//! swap needs are bundled in a [`Backend`] shared across swaps.

pub mod error;
mod event;
mod recovery;
mod swap_state;
#[cfg(test)]
pub(crate) mod testutils;
mod watcher;

pub use error::Error;
pub use event::{Event, EventType};
pub use recovery::{RecoveryResult, RecoveryState};
pub use swap_state::{Swap, SwapHandle};
pub use watcher::EventFilter;

use crate::{
    config::Environment,
    crypto::{dleq, monero, secp256k1},
    database::Database,
    ethereum::{EthereumClient, SwapCreator},
    message::MessageSender,
    monero::Wallet,
    offer::OfferBook,
    swap::SwapManager,
};
use anyhow::Result;
use std::{fmt, sync::Arc};

/// Which side of the key exchange this node was on.
///
/// Both roles provide the ring asset. An initiator took a published offer and
/// sent its keys with the take request, so it starts the swap with the
/// counterparty's keys already verified. A responder had its own offer taken
/// and first waits for the counterparty's keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Everything a swap needs to talk to the outside world, shared between all
/// swaps of one daemon.
#[derive(Clone)]
pub struct Backend {
    pub env: Environment,
    pub eth: Arc<dyn EthereumClient>,
    pub swap_creator: Arc<dyn SwapCreator>,
    pub wallet: Wallet,
    pub message_sender: Arc<dyn MessageSender>,
    pub db: Arc<Database>,
    pub swaps: Arc<SwapManager>,
    pub offers: Arc<OfferBook>,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend").field("env", &self.env).finish()
    }
}

/// This party's session keys: one secret scalar expressed on both curves,
/// with the proof that binds them.
pub struct KeysAndProof {
    pub secret: dleq::Secret,
    pub proof: dleq::Proof,
    pub secp256k1_public: secp256k1::PublicKey,
    pub private_keys: monero::PrivateKeyPair,
    pub public_keys: monero::PublicKeyPair,
}

impl fmt::Debug for KeysAndProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeysAndProof")
            .field("public_keys", &self.public_keys)
            .field("secp256k1_public", &self.secp256k1_public)
            .finish()
    }
}

impl KeysAndProof {
    /// The secret in the big-endian encoding the escrow contract verifies
    /// against the commitment.
    pub fn contract_secret(&self) -> [u8; 32] {
        let mut bytes = self.secret.as_bytes();
        bytes.reverse();
        bytes
    }
}

/// Generates a fresh secret with its dual-curve key material and DLEq proof.
pub fn generate_keys_and_proof() -> Result<KeysAndProof> {
    let secret = dleq::Secret::random();
    let proof = dleq::Proof::new(&secret)?;
    let secp256k1_public = proof.secp256k1_public();

    let spend_key = secret.spend_key()?;
    let private_keys = spend_key.as_key_pair();
    let public_keys = private_keys.public();

    Ok(KeysAndProof {
        secret,
        proof,
        secp256k1_public,
        private_keys,
        public_keys,
    })
}

/// Rebuilds the full key material from a persisted spend key, used when
/// resuming or recovering a swap. The regenerated proof binds the same secret
/// as the original one.
pub fn keys_from_spend_key(spend_key: &monero::PrivateSpendKey) -> Result<KeysAndProof> {
    let secret = dleq::Secret::from_bytes(spend_key.as_bytes())?;
    let proof = dleq::Proof::new(&secret)?;
    let secp256k1_public = proof.secp256k1_public();

    let private_keys = spend_key.as_key_pair();
    let public_keys = private_keys.public();

    Ok(KeysAndProof {
        secret,
        proof,
        secp256k1_public,
        private_keys,
        public_keys,
    })
}

/// Verifies a counterparty's DLEq proof and checks that the keys it binds are
/// the ones the counterparty claims to be using.
pub fn verify_keys_and_proof(
    proof: &dleq::Proof,
    claimed_secp256k1: &secp256k1::PublicKey,
    claimed_spend_key: &monero::PublicKey,
) -> Result<dleq::VerifiedKeys, Error> {
    let verified = proof.verify().map_err(Error::InvalidProof)?;

    if verified.secp256k1_public != *claimed_secp256k1 {
        return Err(Error::KeyProofMismatch);
    }

    if verified.ed25519_public != *claimed_spend_key {
        return Err(Error::KeyProofMismatch);
    }

    Ok(verified)
}
