//! Bookkeeping for swaps: their id, status, metadata and the manager that
//! tracks ongoing and past swaps across restarts.

use crate::{coins::ExchangeRate, database::Database, ethereum::EthAsset};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// A swap is identified by the content hash of the offer it was made under.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SwapId([u8; 32]);

impl SwapId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SwapId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for SwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for SwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SwapId({})", self)
    }
}

impl FromStr for SwapId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim_start_matches("0x")).context("swap id is not valid hex")?;
        if bytes.len() != 32 {
            anyhow::bail!("swap id must be 32 bytes, got {}", bytes.len());
        }
        let mut array = [0u8; 32];
        array.copy_from_slice(&bytes);
        Ok(SwapId(array))
    }
}

impl Serialize for SwapId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SwapId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The stage a swap is at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Keys have not yet been exchanged. This is the maker's status after
    /// publishing an offer and the taker's status after taking one.
    ExpectingKeys,
    /// Keys have been exchanged, but no value has been locked.
    KeysExchanged,
    /// The account asset has been locked, the ring asset has not.
    EthLocked,
    /// Both assets are locked.
    XmrLocked,
    /// The escrow contract has been set to ready, the locked account asset
    /// can be claimed.
    ContractReady,
    /// The ring asset is being swept back into the primary wallet.
    SweepingXmr,
    /// The swap completed successfully.
    CompletedSuccess,
    /// The locked funds were refunded.
    CompletedRefund,
    /// The swap aborted before any funds were locked.
    CompletedAbort,
}

impl Status {
    pub fn is_ongoing(&self) -> bool {
        !matches!(
            self,
            Status::CompletedSuccess | Status::CompletedRefund | Status::CompletedAbort
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            Status::ExpectingKeys => "keys have not yet been exchanged",
            Status::KeysExchanged => "keys have been exchanged, but no value has been locked",
            Status::EthLocked => "the ether is locked, but no monero has been locked",
            Status::XmrLocked => "both parties have locked their funds",
            Status::ContractReady => "the locked ether is ready to be claimed",
            Status::SweepingXmr => "the monero is being swept back into the primary wallet",
            Status::CompletedSuccess => "the swap completed successfully",
            Status::CompletedRefund => "the locked funds were refunded",
            Status::CompletedAbort => "the swap was aborted before any funds were locked",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::ExpectingKeys => "ExpectingKeys",
            Status::KeysExchanged => "KeysExchanged",
            Status::EthLocked => "ETHLocked",
            Status::XmrLocked => "XMRLocked",
            Status::ContractReady => "ContractReady",
            Status::SweepingXmr => "SweepingXMR",
            Status::CompletedSuccess => "Success",
            Status::CompletedRefund => "Refunded",
            Status::CompletedAbort => "Aborted",
        };
        write!(f, "{}", s)
    }
}

/// Which asset this node provides in a swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvidesCoin {
    Xmr,
    Eth,
}

impl fmt::Display for ProvidesCoin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvidesCoin::Xmr => write!(f, "XMR"),
            ProvidesCoin::Eth => write!(f, "ETH"),
        }
    }
}

/// The serializable state of one swap.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoRecord {
    pub swap_id: SwapId,
    pub provides: ProvidesCoin,
    pub provided_amount: Decimal,
    pub expected_amount: Decimal,
    pub exchange_rate: ExchangeRate,
    pub eth_asset: EthAsset,
    pub status: Status,
    pub monero_start_height: u64,
    pub start_time: DateTime<Utc>,
    pub last_status_update: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub timeout_1: Option<DateTime<Utc>>,
    pub timeout_2: Option<DateTime<Utc>>,
}

/// Details and status of a swap, shared between the swap's own task and
/// readers elsewhere in the daemon.
///
/// The swap task is the only writer. Readers take snapshots.
#[derive(Debug)]
pub struct Info {
    inner: RwLock<InfoRecord>,
}

fn read(lock: &RwLock<InfoRecord>) -> RwLockReadGuard<'_, InfoRecord> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(lock: &RwLock<InfoRecord>) -> RwLockWriteGuard<'_, InfoRecord> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Info {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        swap_id: SwapId,
        provides: ProvidesCoin,
        provided_amount: Decimal,
        expected_amount: Decimal,
        exchange_rate: ExchangeRate,
        eth_asset: EthAsset,
        status: Status,
        monero_start_height: u64,
    ) -> Self {
        let now = Utc::now();
        Info {
            inner: RwLock::new(InfoRecord {
                swap_id,
                provides,
                provided_amount,
                expected_amount,
                exchange_rate,
                eth_asset,
                status,
                monero_start_height,
                start_time: now,
                last_status_update: now,
                end_time: None,
                timeout_1: None,
                timeout_2: None,
            }),
        }
    }

    pub fn from_record(record: InfoRecord) -> Self {
        Info {
            inner: RwLock::new(record),
        }
    }

    pub fn id(&self) -> SwapId {
        read(&self.inner).swap_id
    }

    pub fn provides(&self) -> ProvidesCoin {
        read(&self.inner).provides
    }

    pub fn provided_amount(&self) -> Decimal {
        read(&self.inner).provided_amount
    }

    pub fn expected_amount(&self) -> Decimal {
        read(&self.inner).expected_amount
    }

    pub fn exchange_rate(&self) -> ExchangeRate {
        read(&self.inner).exchange_rate
    }

    pub fn eth_asset(&self) -> EthAsset {
        read(&self.inner).eth_asset
    }

    pub fn monero_start_height(&self) -> u64 {
        read(&self.inner).monero_start_height
    }

    pub fn status(&self) -> Status {
        read(&self.inner).status
    }

    pub fn is_ongoing(&self) -> bool {
        self.status().is_ongoing()
    }

    pub fn set_status(&self, status: Status) {
        let mut record = write(&self.inner);
        record.status = status;
        record.last_status_update = Utc::now();
    }

    pub fn set_timeouts(&self, timeout_1: DateTime<Utc>, timeout_2: DateTime<Utc>) {
        let mut record = write(&self.inner);
        record.timeout_1 = Some(timeout_1);
        record.timeout_2 = Some(timeout_2);
    }

    pub fn timeouts(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let record = read(&self.inner);
        record.timeout_1.zip(record.timeout_2)
    }

    pub fn mark_complete(&self) {
        write(&self.inner).end_time = Some(Utc::now());
    }

    pub fn snapshot(&self) -> InfoRecord {
        read(&self.inner).clone()
    }
}

/// Tracks all swaps of this daemon, keyed by their id.
///
/// Ongoing swaps keep their shared [`Info`] in memory, past swaps are served
/// from the database with a small cache in front.
#[derive(Debug)]
pub struct SwapManager {
    db: Arc<Database>,
    ongoing: RwLock<HashMap<SwapId, Arc<Info>>>,
    past: RwLock<HashMap<SwapId, InfoRecord>>,
}

impl SwapManager {
    /// Loads all stored swaps from the database and partitions them into
    /// ongoing and past.
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let mut ongoing = HashMap::new();
        let mut past = HashMap::new();

        for record in db.all_swaps()? {
            if record.status.is_ongoing() {
                ongoing.insert(record.swap_id, Arc::new(Info::from_record(record)));
            } else {
                past.insert(record.swap_id, record);
            }
        }

        Ok(SwapManager {
            db,
            ongoing: RwLock::new(ongoing),
            past: RwLock::new(past),
        })
    }

    pub fn add_swap(&self, info: Arc<Info>) -> Result<()> {
        self.db.put_swap(&info.snapshot())?;
        self.ongoing
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(info.id(), info);
        Ok(())
    }

    /// Persists the current state of an ongoing swap.
    pub fn write_swap(&self, info: &Info) -> Result<()> {
        self.db.put_swap(&info.snapshot())
    }

    pub fn ongoing_swap(&self, swap_id: SwapId) -> Option<Arc<Info>> {
        self.ongoing
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&swap_id)
            .cloned()
    }

    pub fn has_ongoing_swap(&self, swap_id: SwapId) -> bool {
        self.ongoing_swap(swap_id).is_some()
    }

    pub fn ongoing_swaps(&self) -> Vec<InfoRecord> {
        self.ongoing
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .map(|info| info.snapshot())
            .collect()
    }

    pub fn past_swap(&self, swap_id: SwapId) -> Option<InfoRecord> {
        self.past
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&swap_id)
            .cloned()
    }

    pub fn past_swaps(&self) -> Vec<InfoRecord> {
        self.past
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Moves a swap that reached a terminal status from ongoing to past and
    /// persists its final state.
    pub fn complete_ongoing_swap(&self, info: &Info) -> Result<()> {
        anyhow::ensure!(
            !info.is_ongoing(),
            "swap {} is still ongoing, refusing to complete it",
            info.id()
        );

        info.mark_complete();
        let record = info.snapshot();
        self.db.put_swap(&record)?;

        self.ongoing
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&record.swap_id);
        self.past
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(record.swap_id, record);

        Ok(())
    }
}
