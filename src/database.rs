//! Sled-backed persistence for offers, swap metadata and the recovery records
//! written at each protocol stage.
//!
//! Values are CBOR. Keys are plain strings with a per-record-type prefix so
//! related entries can be scanned with a prefix query.

use crate::{
    crypto::monero::{PrivateSpendKey, PrivateViewKey, PublicKey},
    ethereum::{Address, ContractSwap, Hash},
    message::NotifyXmrLock,
    offer::Offer,
    swap::{InfoRecord, SwapId},
};
use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

const OFFER_PREFIX: &str = "offer:";
const SWAP_PREFIX: &str = "swap:";
const CONTRACT_SWAP_PREFIX: &str = "contract-swap:";
const SECRET_SHARE_PREFIX: &str = "secret-share:";
const COUNTERPARTY_KEYS_PREFIX: &str = "counterparty-keys:";
const SHARED_KEYS_PREFIX: &str = "shared-keys:";
const XMR_LOCK_PREFIX: &str = "xmr-lock:";

/// Everything needed to find and act on a swap's escrow contract entry after
/// a restart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSwapInfo {
    /// Block the lock transaction was included in, logs are searched from
    /// here.
    pub start_block: u64,
    pub contract_swap_id: Hash,
    pub swap: ContractSwap,
    pub swap_creator_addr: Address,
}

/// The counterparty's verified keys, enough to recompute the joint wallet
/// address and watch it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterpartyKeys {
    pub public_spend_key: PublicKey,
    pub private_view_key: PrivateViewKey,
}

/// The full private key pair of the joint wallet, written once both secrets
/// are known. With this record on disk the funds can always be swept.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedSwapKeys {
    pub private_spend_key: PrivateSpendKey,
    pub private_view_key: PrivateViewKey,
}

#[derive(Debug)]
pub struct Database {
    db: sled::Db,
    #[cfg(test)]
    _tmp_dir: tempfile::TempDir,
}

impl Database {
    #[cfg(not(test))]
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let db = sled::open(path)
            .with_context(|| format!("could not open the database at {}", path.display()))?;
        Ok(Database { db })
    }

    #[cfg(test)]
    pub fn new_test() -> Self {
        let tmp_dir = tempfile::TempDir::new().expect("failed to create temp dir");
        let db = sled::open(tmp_dir.path()).expect("failed to open test db");
        Database {
            db,
            _tmp_dir: tmp_dir,
        }
    }

    fn put<T: Serialize>(&self, key: String, value: &T) -> Result<()> {
        let bytes = serialize(value)?;
        self.db
            .insert(key.as_bytes(), bytes)
            .context("could not write to the database")?;
        self.db.flush().context("could not flush the database")?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, key: String) -> Result<Option<T>> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, key: String) -> Result<()> {
        self.db
            .remove(key.as_bytes())
            .context("could not delete from the database")?;
        self.db.flush().context("could not flush the database")?;
        Ok(())
    }

    fn prefix_values<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        self.db
            .scan_prefix(prefix.as_bytes())
            .map(|item| {
                let (_, value) = item.context("could not read from the database")?;
                deserialize(&value)
            })
            .collect()
    }
}

/// Offers.
impl Database {
    pub fn put_offer(&self, offer: &Offer) -> Result<()> {
        self.put(format!("{}{}", OFFER_PREFIX, offer.id()), offer)
    }

    pub fn all_offers(&self) -> Result<Vec<Offer>> {
        self.prefix_values(OFFER_PREFIX)
    }

    pub fn delete_offer(&self, id: SwapId) -> Result<()> {
        self.delete(format!("{}{}", OFFER_PREFIX, id))
    }

    pub fn clear_offers(&self) -> Result<()> {
        for offer in self.all_offers()? {
            self.delete(format!("{}{}", OFFER_PREFIX, offer.id()))?;
        }
        Ok(())
    }
}

/// Swap metadata.
impl Database {
    pub fn put_swap(&self, record: &InfoRecord) -> Result<()> {
        self.put(format!("{}{}", SWAP_PREFIX, record.swap_id), record)
    }

    pub fn get_swap(&self, swap_id: SwapId) -> Result<Option<InfoRecord>> {
        self.get(format!("{}{}", SWAP_PREFIX, swap_id))
    }

    pub fn all_swaps(&self) -> Result<Vec<InfoRecord>> {
        self.prefix_values(SWAP_PREFIX)
    }
}

/// Recovery records, one write per protocol stage. All of them are keyed by
/// the swap id and never deleted, completed swaps keep their records as an
/// audit trail.
impl Database {
    pub fn put_contract_swap_info(&self, swap_id: SwapId, info: &ContractSwapInfo) -> Result<()> {
        self.put(format!("{}{}", CONTRACT_SWAP_PREFIX, swap_id), info)
    }

    pub fn contract_swap_info(&self, swap_id: SwapId) -> Result<Option<ContractSwapInfo>> {
        self.get(format!("{}{}", CONTRACT_SWAP_PREFIX, swap_id))
    }

    /// Stores our half of the joint spend key.
    pub fn put_secret_share(&self, swap_id: SwapId, key: &PrivateSpendKey) -> Result<()> {
        self.put(format!("{}{}", SECRET_SHARE_PREFIX, swap_id), key)
    }

    pub fn secret_share(&self, swap_id: SwapId) -> Result<Option<PrivateSpendKey>> {
        self.get(format!("{}{}", SECRET_SHARE_PREFIX, swap_id))
    }

    pub fn put_counterparty_keys(&self, swap_id: SwapId, keys: &CounterpartyKeys) -> Result<()> {
        self.put(format!("{}{}", COUNTERPARTY_KEYS_PREFIX, swap_id), keys)
    }

    pub fn counterparty_keys(&self, swap_id: SwapId) -> Result<Option<CounterpartyKeys>> {
        self.get(format!("{}{}", COUNTERPARTY_KEYS_PREFIX, swap_id))
    }

    pub fn put_shared_swap_keys(&self, swap_id: SwapId, keys: &SharedSwapKeys) -> Result<()> {
        self.put(format!("{}{}", SHARED_KEYS_PREFIX, swap_id), keys)
    }

    pub fn shared_swap_keys(&self, swap_id: SwapId) -> Result<Option<SharedSwapKeys>> {
        self.get(format!("{}{}", SHARED_KEYS_PREFIX, swap_id))
    }

    pub fn put_xmr_lock(&self, swap_id: SwapId, lock: &NotifyXmrLock) -> Result<()> {
        self.put(format!("{}{}", XMR_LOCK_PREFIX, swap_id), lock)
    }

    pub fn xmr_lock(&self, swap_id: SwapId) -> Result<Option<NotifyXmrLock>> {
        self.get(format!("{}{}", XMR_LOCK_PREFIX, swap_id))
    }
}

pub fn serialize<T>(t: &T) -> Result<Vec<u8>>
where
    T: Serialize,
{
    Ok(serde_cbor::to_vec(t)?)
}

pub fn deserialize<'a, T>(v: &'a [u8]) -> Result<T>
where
    T: Deserialize<'a>,
{
    serde_cbor::from_slice(v).context("could not deserialize value")
}
