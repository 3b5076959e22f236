//! Offers this daemon publishes and the book that tracks them.
//!
//! An offer advertises a range of monero we are willing to sell at a fixed
//! exchange rate. Taking an offer starts a swap under the offer's id. Taken
//! offers leave the in-memory book but stay in the database until their swap
//! completes successfully, so a crashed swap does not lose the offer.

use crate::{
    coins::{validate_positive, ExchangeRate, MAX_RATE_DECIMALS, NUM_MONERO_DECIMALS},
    crypto::keccak256,
    database::{self, Database},
    ethereum::EthAsset,
    swap::{ProvidesCoin, Status, SwapId},
};
use anyhow::{bail, Context, Result};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};
use tokio::sync::mpsc;
use url::Url;

/// Room for every status a swap can pass through, a slow reader never blocks
/// the swap task.
pub const STATUS_CHANNEL_SIZE: usize = 7;

pub const OFFER_VERSION: &str = "1.0.0";

/// A published offer. The id is the content hash of all other fields, two
/// offers with the same terms are distinguished by their nonce.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    version: String,
    id: SwapId,
    provides: ProvidesCoin,
    min_amount: Decimal,
    max_amount: Decimal,
    exchange_rate: ExchangeRate,
    eth_asset: EthAsset,
    nonce: u64,
}

impl Offer {
    pub fn new(
        min_amount: Decimal,
        max_amount: Decimal,
        exchange_rate: ExchangeRate,
        eth_asset: EthAsset,
    ) -> Result<Self> {
        let nonce = rand::thread_rng().gen();
        Self::with_nonce(min_amount, max_amount, exchange_rate, eth_asset, nonce)
    }

    pub fn with_nonce(
        min_amount: Decimal,
        max_amount: Decimal,
        exchange_rate: ExchangeRate,
        eth_asset: EthAsset,
        nonce: u64,
    ) -> Result<Self> {
        validate_positive("min amount", NUM_MONERO_DECIMALS, min_amount)?;
        validate_positive("max amount", NUM_MONERO_DECIMALS, max_amount)?;
        validate_positive("exchange rate", MAX_RATE_DECIMALS, exchange_rate.rate())?;
        if min_amount > max_amount {
            bail!(
                "min amount {} is greater than max amount {}",
                min_amount,
                max_amount
            );
        }

        let mut offer = Offer {
            version: OFFER_VERSION.to_string(),
            id: SwapId::from_bytes([0u8; 32]),
            provides: ProvidesCoin::Xmr,
            min_amount,
            max_amount,
            exchange_rate,
            eth_asset,
            nonce,
        };
        offer.id = offer.compute_id()?;
        Ok(offer)
    }

    fn compute_id(&self) -> Result<SwapId> {
        let encoded = database::serialize(&(
            &self.version,
            self.provides,
            self.min_amount,
            self.max_amount,
            self.exchange_rate,
            self.eth_asset,
            self.nonce,
        ))?;
        Ok(SwapId::from_bytes(keccak256(&encoded)))
    }

    pub fn id(&self) -> SwapId {
        self.id
    }

    pub fn provides(&self) -> ProvidesCoin {
        self.provides
    }

    pub fn min_amount(&self) -> Decimal {
        self.min_amount
    }

    pub fn max_amount(&self) -> Decimal {
        self.max_amount
    }

    pub fn exchange_rate(&self) -> ExchangeRate {
        self.exchange_rate
    }

    pub fn eth_asset(&self) -> EthAsset {
        self.eth_asset
    }

    /// Checks that the given amount of monero is within the offer's range.
    pub fn contains(&self, xmr_amount: Decimal) -> bool {
        self.min_amount <= xmr_amount && xmr_amount <= self.max_amount
    }

    /// The amount of ether we expect in return for the given amount of
    /// monero, at this offer's rate.
    pub fn expected_eth_amount(&self, xmr_amount: Decimal) -> Result<Decimal> {
        if !self.contains(xmr_amount) {
            bail!(
                "amount {} is outside the offer's range of {} to {}",
                xmr_amount,
                self.min_amount,
                self.max_amount
            );
        }
        self.exchange_rate.xmr_to_eth(xmr_amount)
    }
}

/// Runtime state attached to an offer, not persisted.
#[derive(Debug)]
pub struct OfferExtra {
    status_sender: Option<mpsc::Sender<Status>>,
    relayer_endpoint: Option<Url>,
    relayer_commission: Option<Decimal>,
    info_file: Option<PathBuf>,
}

impl OfferExtra {
    pub fn new() -> Self {
        OfferExtra {
            status_sender: None,
            relayer_endpoint: None,
            relayer_commission: None,
            info_file: None,
        }
    }

    /// Creates an extra with a status channel attached. The receiver gets
    /// every status the offer's swap passes through.
    pub fn with_status_channel() -> (Self, mpsc::Receiver<Status>) {
        let (tx, rx) = mpsc::channel(STATUS_CHANNEL_SIZE);
        (
            OfferExtra {
                status_sender: Some(tx),
                ..Self::new()
            },
            rx,
        )
    }

    /// Attaches a relayer the embedding daemon may submit claims through,
    /// with the commission it takes out of the claimed value.
    pub fn with_relayer(mut self, endpoint: Url, commission: Decimal) -> Self {
        self.relayer_endpoint = Some(endpoint);
        self.relayer_commission = Some(commission);
        self
    }

    /// Attaches a path a human-readable snapshot of the swap is written to.
    pub fn with_info_file(mut self, path: PathBuf) -> Self {
        self.info_file = Some(path);
        self
    }

    pub fn relayer_endpoint(&self) -> Option<&Url> {
        self.relayer_endpoint.as_ref()
    }

    pub fn relayer_commission(&self) -> Option<Decimal> {
        self.relayer_commission
    }

    pub fn info_file(&self) -> Option<&Path> {
        self.info_file.as_deref()
    }

    /// Pushes a status to the subscriber, if any. Never blocks, a full or
    /// closed channel only means nobody is listening anymore.
    pub fn notify_status(&self, status: Status) {
        if let Some(sender) = &self.status_sender {
            if let Err(e) = sender.try_send(status) {
                tracing::debug!("dropping status update {}: {}", status, e);
            }
        }
    }
}

impl Default for OfferExtra {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// All offers of this daemon, in memory and on disk.
#[derive(Debug)]
pub struct OfferBook {
    db: Arc<Database>,
    offers: RwLock<HashMap<SwapId, (Offer, Arc<OfferExtra>)>>,
}

impl OfferBook {
    /// Loads the stored offers. Their runtime extras start out empty, status
    /// subscribers do not survive a restart.
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let mut offers = HashMap::new();
        for offer in db.all_offers()? {
            offers.insert(offer.id(), (offer, Arc::new(OfferExtra::new())));
        }
        Ok(OfferBook {
            db,
            offers: RwLock::new(offers),
        })
    }

    /// Adds an offer to the book and persists it. Adding an offer that is
    /// already in the book is a no-op that returns the existing extra.
    pub fn add_offer(&self, offer: Offer, extra: OfferExtra) -> Result<Arc<OfferExtra>> {
        let mut offers = lock(&self.offers);

        if let Some((_, existing)) = offers.get(&offer.id()) {
            return Ok(existing.clone());
        }

        self.db
            .put_offer(&offer)
            .context("could not persist offer")?;

        let extra = Arc::new(extra);
        offers.insert(offer.id(), (offer, extra.clone()));
        Ok(extra)
    }

    pub fn offer(&self, id: SwapId) -> Option<(Offer, Arc<OfferExtra>)> {
        self.offers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn all_offers(&self) -> Vec<Offer> {
        self.offers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .map(|(offer, _)| offer.clone())
            .collect()
    }

    /// Takes an offer out of the book to start a swap under it. The offer
    /// stays in the database until the swap completes.
    pub fn take_offer(&self, id: SwapId) -> Option<(Offer, Arc<OfferExtra>)> {
        lock(&self.offers).remove(&id)
    }

    /// Puts a taken offer back, used when its swap did not complete
    /// successfully.
    pub fn restore_offer(&self, offer: Offer, extra: Arc<OfferExtra>) {
        lock(&self.offers).entry(offer.id()).or_insert((offer, extra));
    }

    /// Removes a taken offer for good after its swap succeeded.
    pub fn finish_offer(&self, id: SwapId) -> Result<()> {
        lock(&self.offers).remove(&id);
        self.db.delete_offer(id)
    }

    pub fn clear(&self) -> Result<()> {
        lock(&self.offers).clear();
        self.db.clear_offers()
    }
}
