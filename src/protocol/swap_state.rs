//! The state machine driving one swap from key exchange to a terminal
//! outcome.
//!
//! A swap runs as a dedicated task owning all mutable state. Producers reach
//! it through the event queue, so at most one transition is in flight at any
//! time. The shared [`Info`] is the only state readable from outside.

use crate::{
    coins::{PiconeroAmount, WeiAmount},
    config::Environment,
    crypto::monero::{
        sum_private_spend_keys, sum_private_view_keys, sum_spend_and_view_keys, PrivateKeyPair,
        PrivateSpendKey, PublicKeyPair,
    },
    crypto::secp256k1,
    database::{ContractSwapInfo, CounterpartyKeys, SharedSwapKeys},
    ethereum::{decode_new_log, ContractSwap, EthAsset, Hash, NewSwapLog, Receipt, NEW_TOPIC, U256},
    message::{Message, NotifyClaimed, NotifyEthLocked, NotifyXmrLock, SendKeysMessage},
    offer::{Offer, OfferExtra},
    protocol::{
        error::{self, Error},
        event::{Event, EventType},
        generate_keys_and_proof, verify_keys_and_proof,
        watcher::spawn_contract_watchers,
        Backend, KeysAndProof, Role,
    },
    swap::{Info, InfoRecord, ProvidesCoin, Status, SwapId},
};
use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot, watch};

/// Extra wait after t0 before the timeout task forces a claim, allows for
/// clock drift between us and the chain.
const CONTRACT_READY_BUFFER: Duration = Duration::from_secs(10);

/// Queue depth of one swap's event channel. Events block their producer until
/// handled anyway, the buffer only decouples enqueueing from handling.
const EVENT_CHANNEL_SIZE: usize = 1;

/// The counterparty's verified session keys.
struct CounterpartyVerified {
    public_keys: PublicKeyPair,
    private_view_key: crate::crypto::monero::PrivateViewKey,
    secp256k1_public: Option<secp256k1::PublicKey>,
}

/// Handle to a running swap. Cheap to clone, safe to use concurrently with
/// the swap task.
#[derive(Clone)]
pub struct SwapHandle {
    swap_id: SwapId,
    info: Arc<Info>,
    send_keys: SendKeysMessage,
    events: mpsc::Sender<Event>,
    done: watch::Receiver<bool>,
}

impl std::fmt::Debug for SwapHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SwapHandle({})", self.swap_id)
    }
}

impl SwapHandle {
    pub fn id(&self) -> SwapId {
        self.swap_id
    }

    pub fn status(&self) -> Status {
        self.info.status()
    }

    pub fn info(&self) -> Arc<Info> {
        self.info.clone()
    }

    /// This party's key-exchange message for the swap.
    pub fn send_keys_message(&self) -> SendKeysMessage {
        self.send_keys.clone()
    }

    /// Feeds one inbound protocol message to the swap and waits until it has
    /// been processed.
    pub async fn handle_protocol_message(&self, message: Message) -> error::Result<()> {
        let (ack, ack_rx) = oneshot::channel();
        let event = match message {
            Message::SendKeys(m) => Event::KeysReceived {
                message: Box::new(m),
                ack,
            },
            Message::NotifyEthLocked(m) => Event::EthLocked {
                message: Box::new(m),
                ack,
            },
            other => {
                return Err(Error::UnexpectedMessage { got: other.kind() });
            }
        };

        self.events
            .send(event)
            .await
            .map_err(|_| Error::SwapTaskGone)?;
        ack_rx.await.map_err(|_| Error::SwapTaskGone)?
    }

    /// Requests early termination and waits for the swap to resolve.
    pub async fn exit(&self) -> error::Result<()> {
        let (ack, ack_rx) = oneshot::channel();
        self.events
            .send(Event::Exit { ack })
            .await
            .map_err(|_| Error::SwapTaskGone)?;
        ack_rx.await.map_err(|_| Error::SwapTaskGone)?
    }

    /// Resolves once the swap reached a terminal status and its background
    /// tasks are gone.
    pub async fn wait_done(&self) {
        let mut done = self.done.clone();
        while !*done.borrow() {
            if done.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Constructors for swap tasks.
#[derive(Debug)]
pub struct Swap;

impl Swap {
    /// Starts a swap for an offer of ours that was taken. We wait for the
    /// counterparty's keys before anything else.
    pub async fn start_responder(
        backend: Backend,
        offer: Offer,
        offer_extra: Arc<OfferExtra>,
        provided_xmr: Decimal,
        expected_eth: Decimal,
    ) -> error::Result<SwapHandle> {
        Self::start(
            backend,
            offer,
            offer_extra,
            Role::Responder,
            provided_xmr,
            expected_eth,
            None,
        )
        .await
    }

    /// Starts a swap for a counterparty's offer we took. Their keys came with
    /// the take response, so the key exchange is already complete.
    pub async fn start_initiator(
        backend: Backend,
        offer: Offer,
        offer_extra: Arc<OfferExtra>,
        provided_xmr: Decimal,
        expected_eth: Decimal,
        counterparty_keys: SendKeysMessage,
    ) -> error::Result<SwapHandle> {
        Self::start(
            backend,
            offer,
            offer_extra,
            Role::Initiator,
            provided_xmr,
            expected_eth,
            Some(counterparty_keys),
        )
        .await
    }

    async fn start(
        backend: Backend,
        offer: Offer,
        offer_extra: Arc<OfferExtra>,
        role: Role,
        provided_xmr: Decimal,
        expected_eth: Decimal,
        counterparty_keys: Option<SendKeysMessage>,
    ) -> error::Result<SwapHandle> {
        let swap_id = offer.id();
        if backend.swaps.has_ongoing_swap(swap_id) {
            return Err(Error::AlreadyInProgress);
        }

        // Fail before any state is created if we cannot cover the lock.
        backend
            .wallet
            .ensure_balance(PiconeroAmount::from_monero(provided_xmr)?)
            .await?;

        let monero_start_height = backend.wallet.restore_height().await?;
        let keys = generate_keys_and_proof()?;
        backend
            .db
            .put_secret_share(swap_id, keys.private_keys.spend_key())?;

        let counterparty = match &counterparty_keys {
            Some(message) => Some(validate_counterparty_keys(
                &backend, swap_id, message,
            )?),
            None => None,
        };

        let status = match role {
            Role::Responder => Status::ExpectingKeys,
            Role::Initiator => Status::KeysExchanged,
        };
        let info = Arc::new(Info::new(
            swap_id,
            ProvidesCoin::Xmr,
            provided_xmr,
            expected_eth,
            offer.exchange_rate(),
            offer.eth_asset(),
            status,
            monero_start_height,
        ));
        backend.swaps.add_swap(info.clone())?;
        offer_extra.notify_status(status);
        if let Some(path) = offer_extra.info_file() {
            if let Err(e) = write_info_file(path, &info.snapshot()) {
                tracing::warn!("could not write swap info file: {:#}", e);
            }
        }

        let send_keys = build_send_keys_message(&backend, swap_id, provided_xmr, &keys);

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (cancel_tx, _) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);

        let state = SwapState {
            backend,
            role,
            offer,
            offer_extra,
            info: info.clone(),
            keys,
            counterparty,
            contract_swap: None,
            timeouts: None,
            next_expected: EventType::from_status(status),
            events_tx: events_tx.clone(),
            ready_tx: None,
            cancel_tx,
            done_tx,
            finalized: false,
        };
        tokio::spawn(state.run(events_rx));

        Ok(SwapHandle {
            swap_id,
            info,
            send_keys,
            events: events_tx,
            done: done_rx,
        })
    }

    /// Resumes a swap that was interrupted after both assets were locked.
    /// Earlier stages cannot be resumed, their swaps are resolved by the
    /// recovery driver instead.
    pub async fn resume(
        backend: Backend,
        offer: Offer,
        offer_extra: Arc<OfferExtra>,
        record: InfoRecord,
    ) -> error::Result<SwapHandle> {
        if !matches!(record.status, Status::XmrLocked | Status::ContractReady) {
            return Err(Error::InvalidStageForRecovery);
        }

        let swap_id = record.swap_id;
        let secret_share = backend
            .db
            .secret_share(swap_id)?
            .context("no secret share stored for this swap")?;
        let keys = super::keys_from_spend_key(&secret_share)?;

        let stored = backend
            .db
            .counterparty_keys(swap_id)?
            .context("no counterparty keys stored for this swap")?;
        let counterparty = CounterpartyVerified {
            public_keys: PublicKeyPair::new(
                stored.public_spend_key,
                stored.private_view_key.public(),
            ),
            private_view_key: stored.private_view_key,
            secp256k1_public: None,
        };

        let eth_info = backend
            .db
            .contract_swap_info(swap_id)?
            .context("no contract swap info stored for this swap")?;
        let t0 = unix_timestamp(eth_info.swap.timeout_1)?;
        let t1 = unix_timestamp(eth_info.swap.timeout_2)?;

        let info = Arc::new(Info::from_record(record));
        if !backend.swaps.has_ongoing_swap(swap_id) {
            backend.swaps.add_swap(info.clone())?;
        }

        let provided_xmr = info.provided_amount();
        let send_keys = build_send_keys_message(&backend, swap_id, provided_xmr, &keys);

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);

        spawn_contract_watchers(
            backend.eth.clone(),
            eth_info.swap_creator_addr,
            eth_info.contract_swap_id,
            eth_info.start_block,
            events_tx.clone(),
            cancel_rx.clone(),
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        spawn_timeout_task(events_tx.clone(), t0, t1, ready_rx, cancel_rx);

        let state = SwapState {
            backend,
            role: Role::Responder,
            offer,
            offer_extra,
            info: info.clone(),
            keys,
            counterparty: Some(counterparty),
            contract_swap: Some((eth_info.contract_swap_id, eth_info.swap)),
            timeouts: Some((t0, t1)),
            next_expected: EventType::ContractReady,
            events_tx: events_tx.clone(),
            ready_tx: Some(ready_tx),
            cancel_tx,
            done_tx,
            finalized: false,
        };
        tokio::spawn(state.run(events_rx));

        Ok(SwapHandle {
            swap_id,
            info,
            send_keys,
            events: events_tx,
            done: done_rx,
        })
    }
}

/// Writes a human-readable snapshot of the swap, for manual inspection if the
/// database is ever unreachable.
fn write_info_file(path: &std::path::Path, record: &InfoRecord) -> anyhow::Result<()> {
    crate::fs::ensure_directory_exists(path)?;
    let json = serde_json::to_string_pretty(record)?;
    std::fs::write(path, json)?;
    Ok(())
}

fn build_send_keys_message(
    backend: &Backend,
    swap_id: SwapId,
    provided_xmr: Decimal,
    keys: &KeysAndProof,
) -> SendKeysMessage {
    SendKeysMessage {
        offer_id: swap_id,
        provided_amount: provided_xmr,
        public_spend_key: keys.public_keys.spend_key(),
        private_view_key: keys.private_keys.view_key().hex(),
        dleq_proof: keys.proof.clone(),
        secp256k1_public_key: keys.secp256k1_public,
        eth_address: backend.eth.our_address(),
    }
}

/// Validates a counterparty's key-exchange message and persists their keys.
fn validate_counterparty_keys(
    backend: &Backend,
    swap_id: SwapId,
    message: &SendKeysMessage,
) -> error::Result<CounterpartyVerified> {
    if message.private_view_key.is_empty() {
        return Err(Error::MissingKeys);
    }

    let verified = verify_keys_and_proof(
        &message.dleq_proof,
        &message.secp256k1_public_key,
        &message.public_spend_key,
    )?;

    let private_view_key =
        crate::crypto::monero::PrivateViewKey::from_hex(&message.private_view_key)
            .map_err(|_| Error::MissingKeys)?;

    let public_keys = PublicKeyPair::new(verified.ed25519_public, private_view_key.public());

    backend.db.put_counterparty_keys(
        swap_id,
        &CounterpartyKeys {
            public_spend_key: verified.ed25519_public,
            private_view_key: private_view_key.clone(),
        },
    )?;

    Ok(CounterpartyVerified {
        public_keys,
        private_view_key,
        secp256k1_public: Some(verified.secp256k1_public),
    })
}

pub(super) fn unix_timestamp(value: U256) -> error::Result<DateTime<Utc>> {
    if value.bits() > 62 {
        return Err(Error::InvalidTimeout1);
    }
    Utc.timestamp_opt(value.low_u64() as i64, 0)
        .single()
        .ok_or(Error::InvalidTimeout1)
}

fn until(deadline: DateTime<Utc>) -> Duration {
    (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

/// Wakes at t0 and forces a claim attempt in case the counterparty never
/// sends an explicit ready notification.
fn spawn_timeout_task(
    events: mpsc::Sender<Event>,
    t0: DateTime<Utc>,
    t1: DateTime<Utc>,
    ready_rx: oneshot::Receiver<()>,
    mut cancel: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        if Utc::now() > t1 {
            tracing::debug!("t1 has already passed, not starting the timeout task");
            return;
        }

        let wait = until(t0) + CONTRACT_READY_BUFFER;
        tracing::debug!("timeout task waiting {}s until t0", wait.as_secs());

        tokio::select! {
            _ = cancel.changed() => return,
            _ = ready_rx => {
                tracing::debug!("contract was set ready, timeout task returning");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        tracing::debug!("reached t0, forcing a claim attempt");
        let (ack, ack_rx) = oneshot::channel();
        if events.send(Event::ContractReady { ack }).await.is_err() {
            return;
        }
        if let Ok(Err(e)) = ack_rx.await {
            tracing::error!("failed to claim after t0 expired: {}", e);
        }
    });
}

struct SwapState {
    backend: Backend,
    role: Role,
    offer: Offer,
    offer_extra: Arc<OfferExtra>,
    info: Arc<Info>,

    // our session keys
    keys: KeysAndProof,
    counterparty: Option<CounterpartyVerified>,

    // known once the counterparty locked their asset
    contract_swap: Option<(Hash, ContractSwap)>,
    timeouts: Option<(DateTime<Utc>, DateTime<Utc>)>,

    next_expected: EventType,

    events_tx: mpsc::Sender<Event>,
    ready_tx: Option<oneshot::Sender<()>>,
    cancel_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
    finalized: bool,
}

impl SwapState {
    async fn run(mut self, mut events: mpsc::Receiver<Event>) {
        loop {
            let event = match events.recv().await {
                Some(event) => event,
                None => return,
            };

            if self.handle_event(event, &mut events).await {
                return;
            }
        }
    }

    /// Handles one event. Returns true once the swap reached a terminal
    /// status and the task should stop.
    async fn handle_event(&mut self, event: Event, events: &mut mpsc::Receiver<Event>) -> bool {
        match event {
            Event::KeysReceived { message, ack } => {
                tracing::info!("received the counterparty's keys");
                if self.next_expected != EventType::KeysReceived {
                    let _ = ack.send(Err(self.unexpected(EventType::KeysReceived)));
                    return false;
                }

                match self.handle_send_keys(*message).await {
                    Ok(()) => {
                        let _ = ack.send(Ok(()));
                        false
                    }
                    Err(e) => {
                        let _ = ack.send(Err(e));
                        if let Err(e) = self.exit(events).await {
                            tracing::warn!("failed to exit swap: {}", e);
                        }
                        true
                    }
                }
            }
            Event::EthLocked { message, ack } => {
                tracing::info!("counterparty locked their asset");
                if self.next_expected != EventType::EthLocked {
                    let _ = ack.send(Err(self.unexpected(EventType::EthLocked)));
                    return false;
                }

                let result = self.handle_notify_eth_locked(*message).await;
                // No more inbound messages are expected from here on.
                self.backend.message_sender.close(self.id()).await;

                match result {
                    Ok(()) => {
                        let _ = ack.send(Ok(()));
                        false
                    }
                    Err(e) => {
                        let _ = ack.send(Err(e));
                        if let Err(e) = self.exit(events).await {
                            tracing::warn!("failed to exit swap: {}", e);
                        }
                        true
                    }
                }
            }
            Event::ContractReady { ack } => {
                tracing::info!("contract is ready");
                if self.next_expected != EventType::ContractReady {
                    let _ = ack.send(Err(self.unexpected(EventType::ContractReady)));
                    return false;
                }

                match self.handle_contract_ready().await {
                    Ok(()) => {
                        let _ = ack.send(Ok(()));
                        if let Err(e) = self.exit(events).await {
                            tracing::warn!("failed to exit swap: {}", e);
                        }
                        true
                    }
                    Err(e) => {
                        // The swap stays ongoing so the recovery driver can
                        // retry the claim from persisted state.
                        tracing::warn!("failed to claim, leaving swap ongoing: {}", e);
                        let _ = ack.send(Err(e));
                        false
                    }
                }
            }
            Event::EthRefunded {
                counterparty_secret,
                ack,
            } => {
                tracing::info!("counterparty refunded their asset");
                match self.handle_eth_refunded(counterparty_secret).await {
                    Ok(()) => {
                        let _ = ack.send(Ok(()));
                        if let Err(e) = self.exit(events).await {
                            tracing::warn!("failed to exit swap: {}", e);
                        }
                        true
                    }
                    Err(e) => {
                        tracing::warn!("failed to reclaim funds, leaving swap ongoing: {}", e);
                        let _ = ack.send(Err(e));
                        false
                    }
                }
            }
            Event::EthClaimed { tx_hash, ack } => {
                tracing::info!("our claim was included in transaction {}", tx_hash);
                self.clear_next_expected(Status::CompletedSuccess);
                let result = self.exit(events).await;
                let _ = ack.send(result);
                true
            }
            Event::Exit { ack } => {
                tracing::info!("exit requested");
                let result = self.exit(events).await;
                let terminal = !self.info.is_ongoing();
                let _ = ack.send(result);
                terminal
            }
        }
    }

    fn id(&self) -> SwapId {
        self.info.id()
    }

    fn unexpected(&self, got: EventType) -> Error {
        Error::UnexpectedEvent {
            got,
            expected: self.next_expected,
        }
    }

    /// Publishes a status: stored in the shared info, persisted, pushed to
    /// the offer's subscriber.
    fn publish_status(&self, status: Status) {
        self.info.set_status(status);
        if let Err(e) = self.backend.swaps.write_swap(&self.info) {
            tracing::warn!("failed to persist swap {}: {:#}", self.id(), e);
        }
        self.offer_extra.notify_status(status);
    }

    fn set_next_expected(&mut self, next: EventType) {
        self.next_expected = next;
        if let Some(status) = next.waiting_status() {
            self.publish_status(status);
        }
    }

    fn clear_next_expected(&mut self, status: Status) {
        self.next_expected = EventType::None;
        self.publish_status(status);
    }

    /// Validates the counterparty's keys, replies with our own and advances
    /// to waiting for their lock.
    async fn handle_send_keys(&mut self, message: SendKeysMessage) -> error::Result<()> {
        if message.provided_amount != self.info.expected_amount() {
            return Err(Error::AmountMismatch);
        }

        let counterparty = validate_counterparty_keys(&self.backend, self.id(), &message)?;
        self.counterparty = Some(counterparty);

        let reply = build_send_keys_message(
            &self.backend,
            self.id(),
            self.info.provided_amount(),
            &self.keys,
        );
        self.backend
            .message_sender
            .send(self.id(), Message::SendKeys(reply))
            .await?;

        self.set_next_expected(EventType::EthLocked);
        Ok(())
    }

    /// Verifies the counterparty's on-chain lock in every detail, then locks
    /// our side and starts watching the contract.
    async fn handle_notify_eth_locked(&mut self, message: NotifyEthLocked) -> error::Result<()> {
        if message.address.is_zero() {
            return Err(Error::MissingAddress);
        }
        if message.contract_swap_id.is_zero() {
            return Err(Error::MissingContractSwapId);
        }

        tracing::info!(
            "got lock notification, contract {} swap id {}",
            message.address,
            message.contract_swap_id
        );

        if message.contract_swap.swap_id() != message.contract_swap_id {
            return Err(Error::SwapIdMismatch);
        }

        let expected_contract = self.backend.swap_creator.address();
        if message.address != expected_contract {
            return Err(Error::InvalidLockTransaction);
        }

        let code = self.backend.eth.code_at(expected_contract).await?;
        if !bytecode_contains(&self.backend.swap_creator.runtime_bytecode(), &code) {
            return Err(Error::InvalidContractCode(expected_contract));
        }

        let receipt = self.backend.eth.wait_for_receipt(message.tx_hash).await?;
        if !receipt.success {
            return Err(Error::LockTxReverted);
        }

        let new_log = find_new_log(&receipt, expected_contract)?;
        self.check_new_log(&message, &new_log)?;

        self.backend.db.put_contract_swap_info(
            self.id(),
            &ContractSwapInfo {
                start_block: receipt.block_number,
                contract_swap_id: message.contract_swap_id,
                swap: message.contract_swap,
                swap_creator_addr: expected_contract,
            },
        )?;

        let (t0, t1) = self.check_and_set_timeouts(
            message.contract_swap.timeout_1,
            message.contract_swap.timeout_2,
        )?;
        self.contract_swap = Some((message.contract_swap_id, message.contract_swap));
        self.publish_status(Status::EthLocked);

        self.lock_funds().await?;

        let cancel_rx = self.cancel_tx.subscribe();
        spawn_contract_watchers(
            self.backend.eth.clone(),
            expected_contract,
            message.contract_swap_id,
            receipt.block_number,
            self.events_tx.clone(),
            cancel_rx.clone(),
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        self.ready_tx = Some(ready_tx);
        spawn_timeout_task(self.events_tx.clone(), t0, t1, ready_rx, cancel_rx);

        self.set_next_expected(EventType::ContractReady);
        Ok(())
    }

    /// Checks the `New` log against our expectations: commitments, asset and
    /// value must all be exactly what was agreed.
    fn check_new_log(&self, message: &NotifyEthLocked, log: &NewSwapLog) -> error::Result<()> {
        if log.swap_id != message.contract_swap_id {
            return Err(Error::UnexpectedSwapId {
                got: log.swap_id,
                expected: message.contract_swap_id,
            });
        }

        let ours = self.keys.secp256k1_public.keccak_commitment();
        if log.claim_key != ours {
            return Err(Error::ClaimCommitmentMismatch {
                got: log.claim_key,
                expected: ours,
            });
        }

        let counterparty = self.counterparty.as_ref().ok_or(Error::MissingKeys)?;
        let theirs = counterparty
            .secp256k1_public
            .ok_or(Error::MissingKeys)?
            .keccak_commitment();
        if log.refund_key != theirs {
            return Err(Error::RefundCommitmentMismatch {
                got: log.refund_key,
                expected: theirs,
            });
        }

        let agreed_asset = self.info.eth_asset().address();
        if log.asset != agreed_asset || message.contract_swap.asset != agreed_asset {
            return Err(Error::AssetMismatch);
        }

        if message.contract_swap.value != log.value {
            return Err(Error::ValueMismatch);
        }

        // For ether the agreed amount converts exactly to wei. Token
        // decimals are the token's concern, there we rely on the value
        // echoed in the log.
        if self.info.eth_asset() == EthAsset::Ether {
            let expected = WeiAmount::from_ether(self.info.expected_amount())?;
            if log.value != expected.0 {
                return Err(Error::ValueMismatch);
            }
        }

        Ok(())
    }

    /// Checks the timeouts chosen by the counterparty: the claim window must
    /// have the expected length and start roughly one window from now.
    fn check_and_set_timeouts(
        &mut self,
        timeout_1: U256,
        timeout_2: U256,
    ) -> error::Result<(DateTime<Utc>, DateTime<Utc>)> {
        let t0 = unix_timestamp(timeout_1)?;
        let t1 = unix_timestamp(timeout_2)?;

        self.timeouts = Some((t0, t1));
        self.info.set_timeouts(t0, t1);

        // Tests set arbitrary timeouts, only enforce on live networks.
        if self.backend.env != Environment::Development {
            let expected = chrono::Duration::from_std(self.backend.env.swap_timeout())
                .map_err(|e| Error::Other(e.into()))?;
            let allowed_diff = expected / 20;

            if t1 - t0 != expected {
                return Err(Error::InvalidTimeout2);
            }

            let drift = Utc::now() + expected - t0;
            if drift.abs() > allowed_diff {
                return Err(Error::InvalidTimeout1);
            }
        }

        Ok((t0, t1))
    }

    /// Transfers the agreed amount into the joint wallet and notifies the
    /// counterparty.
    async fn lock_funds(&mut self) -> error::Result<()> {
        let counterparty = self.counterparty.as_ref().ok_or(Error::MissingKeys)?;
        let joint_keys =
            sum_spend_and_view_keys(&counterparty.public_keys, &self.keys.public_keys);
        let joint_address = joint_keys.address();

        let amount = PiconeroAmount::from_monero(self.info.provided_amount())?;
        let transfer = self.backend.wallet.lock_funds(&joint_address, amount).await?;

        let notify = NotifyXmrLock {
            address: joint_address,
            tx_hash: transfer.tx_hash,
        };
        self.backend.db.put_xmr_lock(self.id(), &notify)?;
        self.backend
            .message_sender
            .send(self.id(), Message::NotifyXmrLock(notify))
            .await?;

        Ok(())
    }

    /// Claims the locked account asset, revealing our secret.
    async fn handle_contract_ready(&mut self) -> error::Result<()> {
        tracing::debug!("contract ready, attempting to claim funds");
        if let Some(ready_tx) = self.ready_tx.take() {
            let _ = ready_tx.send(());
        }
        if self.info.status() != Status::ContractReady {
            self.publish_status(Status::ContractReady);
        }

        let (_, contract_swap) = self.contract_swap.ok_or(Error::MissingContractSwapId)?;
        let receipt = self
            .backend
            .swap_creator
            .claim(&contract_swap, self.keys.contract_secret())
            .await?;
        check_receipt(&receipt)?;

        tracing::info!("funds claimed, tx {}", receipt.tx_hash);

        // Courtesy notification, the counterparty sees the log either way.
        if let Err(e) = self
            .backend
            .message_sender
            .send(
                self.id(),
                Message::NotifyClaimed(NotifyClaimed {
                    tx_hash: receipt.tx_hash,
                }),
            )
            .await
        {
            tracing::debug!("could not send claim notification: {:#}", e);
        }

        self.clear_next_expected(Status::CompletedSuccess);
        Ok(())
    }

    /// The counterparty revealed their secret by refunding. Combine it with
    /// ours and sweep the joint wallet back into our own.
    async fn handle_eth_refunded(
        &mut self,
        counterparty_secret: PrivateSpendKey,
    ) -> error::Result<()> {
        let counterparty_view = counterparty_secret.view_key();

        let joint_spend =
            sum_private_spend_keys(&counterparty_secret, self.keys.private_keys.spend_key());
        let joint_view =
            sum_private_view_keys(&counterparty_view, self.keys.private_keys.view_key());
        let joint_keys = PrivateKeyPair::new(joint_spend, joint_view);

        // Persist before moving anything, the keys alone are enough to
        // recover the funds manually.
        self.backend.db.put_shared_swap_keys(
            self.id(),
            &SharedSwapKeys {
                private_spend_key: joint_keys.spend_key().clone(),
                private_view_key: joint_keys.view_key().clone(),
            },
        )?;

        self.publish_status(Status::SweepingXmr);

        let restore_height = self.info.monero_start_height();
        self.backend
            .wallet
            .sweep_joint_wallet(self.id(), &joint_keys, restore_height)
            .await?;

        self.clear_next_expected(Status::CompletedRefund);
        Ok(())
    }

    /// Resolves the swap to a terminal status consistent with progress so
    /// far.
    async fn exit(&mut self, events: &mut mpsc::Receiver<Event>) -> error::Result<()> {
        tracing::debug!(
            "attempting to exit swap, next expected event {:?}",
            self.next_expected
        );

        match self.next_expected {
            EventType::KeysReceived | EventType::EthLocked => {
                // Nothing is locked yet, we can abort cleanly.
                self.clear_next_expected(Status::CompletedAbort);
                self.finalize().await;
                Ok(())
            }
            EventType::ContractReady => {
                // Both assets are locked. Exactly one of claim or refund must
                // run, so block on the next event from the queue.
                let result = match events.recv().await {
                    Some(Event::ContractReady { ack }) => {
                        let result = self.handle_contract_ready().await;
                        match &result {
                            Ok(()) => {
                                let _ = ack.send(Ok(()));
                            }
                            Err(e) => {
                                let _ = ack.send(Err(Error::Other(anyhow::anyhow!("{}", e))));
                            }
                        }
                        result
                    }
                    Some(Event::EthRefunded {
                        counterparty_secret,
                        ack,
                    }) => {
                        let result = self.handle_eth_refunded(counterparty_secret).await;
                        match &result {
                            Ok(()) => {
                                let _ = ack.send(Ok(()));
                            }
                            Err(e) => {
                                let _ = ack.send(Err(Error::Other(anyhow::anyhow!("{}", e))));
                            }
                        }
                        result
                    }
                    Some(Event::EthClaimed { tx_hash, ack }) => {
                        tracing::info!("claim already included in transaction {}", tx_hash);
                        self.clear_next_expected(Status::CompletedSuccess);
                        let _ = ack.send(Ok(()));
                        Ok(())
                    }
                    Some(other) => {
                        other.ack(Ok(()));
                        return Ok(());
                    }
                    None => return Ok(()),
                };

                match result {
                    Ok(()) => {
                        self.finalize().await;
                        Ok(())
                    }
                    // Leave the swap ongoing for the recovery driver.
                    Err(e) => Err(e),
                }
            }
            EventType::None => {
                if !self.finalized {
                    self.finalize().await;
                }
                Ok(())
            }
            other => {
                // A logic error, not a counterparty action. Abort loudly.
                tracing::error!("unexpected next expected event in exit: {:?}", other);
                self.clear_next_expected(Status::CompletedAbort);
                self.finalize().await;
                Err(Error::UnexpectedEvent {
                    got: other,
                    expected: EventType::Exit,
                })
            }
        }
    }

    /// Tears the swap down after a terminal status was reached.
    async fn finalize(&mut self) {
        self.finalized = true;

        if let Err(e) = self.backend.swaps.complete_ongoing_swap(&self.info) {
            tracing::warn!("failed to mark swap {} as completed: {:#}", self.id(), e);
        }

        let status = self.info.status();
        if status == Status::CompletedSuccess {
            if let Err(e) = self.backend.offers.finish_offer(self.offer.id()) {
                tracing::warn!("failed to delete offer {}: {:#}", self.offer.id(), e);
            }
        } else if self.role == Role::Responder {
            // The offer was withdrawn when it was taken, make it available
            // again.
            self.backend
                .offers
                .restore_offer(self.offer.clone(), self.offer_extra.clone());
            tracing::debug!("re-added offer {}", self.offer.id());
        }

        self.backend.message_sender.close(self.id()).await;
        let _ = self.cancel_tx.send(true);
        let _ = self.done_tx.send(true);
        self.next_expected = EventType::None;

        tracing::info!("swap {} exited with status {}", self.id(), status);
    }
}

fn find_new_log(receipt: &Receipt, contract: crate::ethereum::Address) -> error::Result<NewSwapLog> {
    for log in &receipt.logs {
        if log.address == contract && log.topics.first() == Some(&*NEW_TOPIC) {
            return decode_new_log(log).map_err(Error::Other);
        }
    }
    Err(Error::MissingNewLog)
}

fn check_receipt(receipt: &Receipt) -> error::Result<()> {
    if !receipt.success {
        return Err(Error::Other(anyhow::anyhow!(
            "transaction {} reverted",
            receipt.tx_hash
        )));
    }
    Ok(())
}

/// The code deployed at an address is the runtime section of the creation
/// bytecode, so a contained match is expected.
fn bytecode_contains(expected: &[u8], code: &[u8]) -> bool {
    if code.is_empty() || code.len() > expected.len() {
        return false;
    }
    expected.windows(code.len()).any(|window| window == code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ethereum::Address,
        protocol::testutils::{
            claimed_log, harness, lock_receipt, ready_log, refunded_log, test_offer, TestHarness,
            CONTRACT_ADDR,
        },
    };

    fn dec(s: &str) -> Decimal {
        s.parse().expect("valid decimal")
    }

    fn counterparty_send_keys(offer: &Offer, cp: &KeysAndProof) -> SendKeysMessage {
        SendKeysMessage {
            offer_id: offer.id(),
            provided_amount: dec("0.5"),
            public_spend_key: cp.public_keys.spend_key(),
            private_view_key: cp.private_keys.view_key().hex(),
            dleq_proof: cp.proof.clone(),
            secp256k1_public_key: cp.secp256k1_public,
            eth_address: Address([0xbb; 20]),
        }
    }

    /// The swap the counterparty would create on chain: we claim, they
    /// refund.
    fn contract_swap(
        handle: &SwapHandle,
        cp: &KeysAndProof,
        t0_offset_secs: i64,
        t1_offset_secs: i64,
    ) -> ContractSwap {
        let now = Utc::now().timestamp() as u64;
        ContractSwap {
            owner: Address([0xbb; 20]),
            claimer: crate::protocol::testutils::OUR_ETH_ADDR,
            claim_commitment: handle
                .send_keys_message()
                .secp256k1_public_key
                .keccak_commitment(),
            refund_commitment: cp.secp256k1_public.keccak_commitment(),
            timeout_1: U256::from(now.wrapping_add_signed(t0_offset_secs)),
            timeout_2: U256::from(now.wrapping_add_signed(t1_offset_secs)),
            asset: Address::zero(),
            value: WeiAmount::from_ether(dec("0.5")).unwrap().0,
            nonce: U256::from(1u64),
        }
    }

    /// Drives a responder swap through the key exchange.
    async fn responder_with_keys(h: &TestHarness) -> (SwapHandle, KeysAndProof) {
        let offer = test_offer();
        let handle = Swap::start_responder(
            h.backend.clone(),
            offer.clone(),
            Arc::new(OfferExtra::new()),
            dec("1"),
            dec("0.5"),
        )
        .await
        .unwrap();
        assert_eq!(handle.status(), Status::ExpectingKeys);

        let cp = generate_keys_and_proof().unwrap();
        handle
            .handle_protocol_message(Message::SendKeys(counterparty_send_keys(&offer, &cp)))
            .await
            .unwrap();
        assert_eq!(handle.status(), Status::KeysExchanged);

        (handle, cp)
    }

    /// Feeds a valid lock notification, leaving the swap at `XMRLocked`.
    async fn lock_eth(
        h: &TestHarness,
        handle: &SwapHandle,
        cp: &KeysAndProof,
        t0_offset_secs: i64,
        t1_offset_secs: i64,
    ) -> ContractSwap {
        let swap = contract_swap(handle, cp, t0_offset_secs, t1_offset_secs);
        let tx_hash = Hash([0x11; 32]);
        h.chain.insert_receipt(lock_receipt(&swap, tx_hash, 5));
        h.chain.set_block_number(5);

        handle
            .handle_protocol_message(Message::NotifyEthLocked(NotifyEthLocked {
                address: CONTRACT_ADDR,
                tx_hash,
                contract_swap_id: swap.swap_id(),
                contract_swap: swap,
            }))
            .await
            .unwrap();
        assert_eq!(handle.status(), Status::XmrLocked);

        swap
    }

    #[tokio::test]
    async fn responder_replies_with_keys_and_locks_nothing_yet() {
        let h = harness();
        let (handle, _) = responder_with_keys(&h).await;

        let sent = h.sender.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].1, Message::SendKeys(_)));
        assert_eq!(sent[0].0, handle.id());
        assert!(h.wallet.transfers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn responder_claims_when_contract_is_set_ready() {
        let h = harness();
        let (handle, cp) = responder_with_keys(&h).await;
        let swap = lock_eth(&h, &handle, &cp, 3_600, 7_200).await;

        // The joint wallet got our 1 XMR.
        let transfers = h.wallet.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].1.as_piconero(), 1_000_000_000_000);

        h.chain.push_log(ready_log(swap.swap_id(), 6));
        handle.wait_done().await;

        assert_eq!(handle.status(), Status::CompletedSuccess);
        assert_eq!(h.chain.claimed_secrets().len(), 1);
        assert!(!h.backend.swaps.has_ongoing_swap(handle.id()));
        assert_eq!(
            h.backend.swaps.past_swap(handle.id()).unwrap().status,
            Status::CompletedSuccess
        );
    }

    #[tokio::test(start_paused = true)]
    async fn responder_sweeps_joint_wallet_when_counterparty_refunds() {
        let h = harness();
        let (handle, cp) = responder_with_keys(&h).await;
        let swap = lock_eth(&h, &handle, &cp, 3_600, 7_200).await;

        h.chain
            .push_log(refunded_log(swap.swap_id(), cp.secret.as_bytes(), 6));
        handle.wait_done().await;

        assert_eq!(handle.status(), Status::CompletedRefund);
        assert_eq!(h.wallet.sweep_count(), 1);
        assert!(h.chain.claimed_secrets().is_empty());

        // The combined keys are persisted and match the sum of both shares.
        let shared = h
            .backend
            .db
            .shared_swap_keys(handle.id())
            .unwrap()
            .unwrap();
        let ours = h.backend.db.secret_share(handle.id()).unwrap().unwrap();
        let expected = sum_private_spend_keys(cp.private_keys.spend_key(), &ours);
        assert_eq!(shared.private_spend_key, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn responder_claims_after_timeout_without_ready_signal() {
        let h = harness();
        let (handle, cp) = responder_with_keys(&h).await;
        lock_eth(&h, &handle, &cp, 1, 7_200).await;

        handle.wait_done().await;

        assert_eq!(handle.status(), Status::CompletedSuccess);
        assert_eq!(h.chain.claimed_secrets().len(), 1);
    }

    #[tokio::test]
    async fn exit_before_anything_is_locked_aborts_and_restores_offer() {
        let h = harness();
        let offer = test_offer();
        let handle = Swap::start_responder(
            h.backend.clone(),
            offer.clone(),
            Arc::new(OfferExtra::new()),
            dec("1"),
            dec("0.5"),
        )
        .await
        .unwrap();

        handle.exit().await.unwrap();
        handle.wait_done().await;

        assert_eq!(handle.status(), Status::CompletedAbort);
        assert!(h.backend.offers.offer(offer.id()).is_some());
        assert!(!h.backend.swaps.has_ongoing_swap(handle.id()));
    }

    #[tokio::test]
    async fn invalid_lock_notification_aborts_the_swap() {
        let h = harness();
        let (handle, cp) = responder_with_keys(&h).await;

        let swap = contract_swap(&handle, &cp, 3_600, 7_200);
        let result = handle
            .handle_protocol_message(Message::NotifyEthLocked(NotifyEthLocked {
                address: Address::zero(),
                tx_hash: Hash([0x11; 32]),
                contract_swap_id: swap.swap_id(),
                contract_swap: swap,
            }))
            .await;

        assert!(matches!(result, Err(Error::MissingAddress)));
        handle.wait_done().await;
        assert_eq!(handle.status(), Status::CompletedAbort);
        assert!(h.wallet.transfers().is_empty());
    }

    #[tokio::test]
    async fn mismatched_commitments_abort_the_swap() {
        let h = harness();
        let (handle, cp) = responder_with_keys(&h).await;

        let mut swap = contract_swap(&handle, &cp, 3_600, 7_200);
        swap.claim_commitment = Hash([0x66; 32]);
        let tx_hash = Hash([0x11; 32]);
        h.chain.insert_receipt(lock_receipt(&swap, tx_hash, 5));
        h.chain.set_block_number(5);

        let result = handle
            .handle_protocol_message(Message::NotifyEthLocked(NotifyEthLocked {
                address: CONTRACT_ADDR,
                tx_hash,
                contract_swap_id: swap.swap_id(),
                contract_swap: swap,
            }))
            .await;

        assert!(matches!(result, Err(Error::ClaimCommitmentMismatch { .. })));
        handle.wait_done().await;
        assert_eq!(handle.status(), Status::CompletedAbort);
        assert!(h.wallet.transfers().is_empty());
    }

    #[tokio::test]
    async fn wrong_provided_amount_is_rejected() {
        let h = harness();
        let offer = test_offer();
        let handle = Swap::start_responder(
            h.backend.clone(),
            offer.clone(),
            Arc::new(OfferExtra::new()),
            dec("1"),
            dec("0.5"),
        )
        .await
        .unwrap();

        let cp = generate_keys_and_proof().unwrap();
        let mut message = counterparty_send_keys(&offer, &cp);
        message.provided_amount = dec("0.4");

        let result = handle
            .handle_protocol_message(Message::SendKeys(message))
            .await;
        assert!(matches!(result, Err(Error::AmountMismatch)));
    }

    #[tokio::test]
    async fn unexpected_inbound_message_is_rejected() {
        let h = harness();
        let (handle, _) = responder_with_keys(&h).await;

        let result = handle
            .handle_protocol_message(Message::NotifyClaimed(NotifyClaimed {
                tx_hash: Hash([0x11; 32]),
            }))
            .await;
        assert!(matches!(result, Err(Error::UnexpectedMessage { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_claim_leaves_the_swap_ongoing() {
        let h = harness();
        let (handle, cp) = responder_with_keys(&h).await;
        let swap = lock_eth(&h, &handle, &cp, 3_600, 7_200).await;

        h.chain.fail_claims(true);
        h.chain.push_log(ready_log(swap.swap_id(), 6));

        // Give the watcher time to deliver the ready event and the handler
        // time to fail.
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(handle.status(), Status::ContractReady);
        assert!(h.backend.swaps.has_ongoing_swap(handle.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn claim_log_arriving_during_exit_completes_the_swap() {
        let h = harness();
        let (handle, cp) = responder_with_keys(&h).await;
        let swap = lock_eth(&h, &handle, &cp, 3_600, 7_200).await;

        // Exit while both assets are locked: the task must wait for the
        // on-chain outcome instead of abandoning the swap.
        let exiting = handle.clone();
        let exit = tokio::spawn(async move { exiting.exit().await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let our_secret = h.backend.db.secret_share(handle.id()).unwrap().unwrap();
        h.chain
            .push_log(claimed_log(swap.swap_id(), our_secret.as_bytes(), 6));

        exit.await.unwrap().unwrap();

        assert_eq!(handle.status(), Status::CompletedSuccess);
        assert!(!h.backend.swaps.has_ongoing_swap(handle.id()));
        assert_eq!(
            h.backend.swaps.past_swap(handle.id()).unwrap().status,
            Status::CompletedSuccess
        );
    }

    #[tokio::test]
    async fn swap_snapshot_lands_in_the_info_file() {
        let h = harness();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swaps").join("info.json");

        let handle = Swap::start_responder(
            h.backend.clone(),
            test_offer(),
            Arc::new(OfferExtra::new().with_info_file(path.clone())),
            dec("1"),
            dec("0.5"),
        )
        .await
        .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let record: InfoRecord = serde_json::from_str(&written).unwrap();
        assert_eq!(record.swap_id, handle.id());
        assert_eq!(record.status, Status::ExpectingKeys);
    }

    #[tokio::test(start_paused = true)]
    async fn initiator_starts_with_keys_exchanged() {
        let h = harness();
        let offer = test_offer();
        let cp = generate_keys_and_proof().unwrap();
        let handle = Swap::start_initiator(
            h.backend.clone(),
            offer.clone(),
            Arc::new(OfferExtra::new()),
            dec("1"),
            dec("0.5"),
            counterparty_send_keys(&offer, &cp),
        )
        .await
        .unwrap();
        assert_eq!(handle.status(), Status::KeysExchanged);
        // No key reply, ours went out with the take request.
        assert!(h.sender.sent().is_empty());

        let swap = lock_eth(&h, &handle, &cp, 3_600, 7_200).await;
        h.chain.push_log(ready_log(swap.swap_id(), 6));
        handle.wait_done().await;

        assert_eq!(handle.status(), Status::CompletedSuccess);
    }

    #[tokio::test]
    async fn second_swap_for_the_same_offer_is_rejected() {
        let h = harness();
        let offer = test_offer();
        let _handle = Swap::start_responder(
            h.backend.clone(),
            offer.clone(),
            Arc::new(OfferExtra::new()),
            dec("1"),
            dec("0.5"),
        )
        .await
        .unwrap();

        let result = Swap::start_responder(
            h.backend.clone(),
            offer,
            Arc::new(OfferExtra::new()),
            dec("1"),
            dec("0.5"),
        )
        .await;
        assert!(matches!(result, Err(Error::AlreadyInProgress)));
    }

    #[tokio::test(start_paused = true)]
    async fn resumed_swap_completes_when_claim_log_appears() {
        let h = harness();
        let (handle, cp) = responder_with_keys(&h).await;
        let swap = lock_eth(&h, &handle, &cp, 3_600, 7_200).await;
        let record = handle.info().snapshot();

        // Pretend the daemon restarted: rebuild the swap task from the
        // database records alone.
        let resumed = Swap::resume(
            h.backend.clone(),
            test_offer(),
            Arc::new(OfferExtra::new()),
            record,
        )
        .await
        .unwrap();

        let our_secret = h
            .backend
            .db
            .secret_share(resumed.id())
            .unwrap()
            .unwrap();
        h.chain.push_log(claimed_log(
            swap.swap_id(),
            our_secret.as_bytes(),
            6,
        ));
        resumed.wait_done().await;

        assert_eq!(resumed.status(), Status::CompletedSuccess);
    }

    #[tokio::test]
    async fn only_locked_swaps_can_be_resumed() {
        let h = harness();
        let offer = test_offer();
        let handle = Swap::start_responder(
            h.backend.clone(),
            offer.clone(),
            Arc::new(OfferExtra::new()),
            dec("1"),
            dec("0.5"),
        )
        .await
        .unwrap();
        let record = handle.info().snapshot();

        let result = Swap::resume(
            h.backend.clone(),
            offer,
            Arc::new(OfferExtra::new()),
            record,
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidStageForRecovery)));
    }

    #[test]
    fn bytecode_must_be_contained() {
        let expected = [1u8, 2, 3, 4, 5];
        assert!(bytecode_contains(&expected, &[2, 3, 4]));
        assert!(bytecode_contains(&expected, &expected));
        assert!(!bytecode_contains(&expected, &[3, 2]));
        assert!(!bytecode_contains(&expected, &[]));
        assert!(!bytecode_contains(&[1, 2], &[1, 2, 3]));
    }

    #[test]
    fn timestamps_out_of_range_are_rejected() {
        assert!(unix_timestamp(U256::from(1_700_000_000u64)).is_ok());
        assert!(unix_timestamp(U256::MAX).is_err());
    }
}
