//! Polling watchers that turn escrow contract logs into protocol events.

use crate::{
    ethereum::{
        decode_secret_from_log, log_id_matches, EthereumClient, Hash, Log, LogQuery,
        CLAIMED_TOPIC, READY_TOPIC, REFUNDED_TOPIC,
    },
    protocol::event::Event,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot, watch};

const CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Blocks to rewind below the observed lock block, in case the chain reorged
/// between observing the receipt and starting the filters.
const REORG_SAFETY_MARGIN: u64 = 4;

/// Polls the chain for logs of one contract event and forwards them.
///
/// The poll window advances with the chain tip, each log is delivered at most
/// once. Removed (reorged-out) logs are skipped.
pub struct EventFilter {
    eth: Arc<dyn EthereumClient>,
    query: LogQuery,
    sink: mpsc::Sender<Log>,
    cancel: watch::Receiver<bool>,
}

impl std::fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFilter").field("query", &self.query).finish()
    }
}

impl EventFilter {
    pub fn new(
        eth: Arc<dyn EthereumClient>,
        query: LogQuery,
        sink: mpsc::Sender<Log>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        EventFilter {
            eth,
            query,
            sink,
            cancel,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.changed() => return,
                _ = tokio::time::sleep(CHECK_INTERVAL) => {}
            }

            let tip = match self.eth.block_number().await {
                Ok(tip) => tip,
                Err(e) => {
                    tracing::error!("failed to get block number in event watcher: {:#}", e);
                    continue;
                }
            };

            if tip < self.query.from_block {
                continue;
            }

            let logs = match self.eth.filter_logs(self.query).await {
                Ok(logs) => logs,
                Err(e) => {
                    tracing::error!(
                        "failed to filter logs for topic {}: {:#}",
                        self.query.topic,
                        e
                    );
                    continue;
                }
            };

            for log in logs {
                if log.topics.first() != Some(&self.query.topic) || log.removed {
                    continue;
                }

                tracing::debug!(
                    "watcher for topic {} found log in block {}",
                    self.query.topic,
                    log.block_number
                );
                if self.sink.send(log).await.is_err() {
                    return;
                }
            }

            self.query.from_block = tip + 1;
        }
    }
}

/// The logs a swap watches for, bundled per contract event.
pub(super) struct ContractWatcher {
    swap_id: Hash,
    ready_rx: mpsc::Receiver<Log>,
    refunded_rx: mpsc::Receiver<Log>,
    claimed_rx: mpsc::Receiver<Log>,
    events: mpsc::Sender<Event>,
}

/// Spawns the three per-event filters plus the translation task that feeds
/// matching logs into the swap's event queue. Returns once all tasks are
/// running.
pub(super) fn spawn_contract_watchers(
    eth: Arc<dyn EthereumClient>,
    contract: crate::ethereum::Address,
    swap_id: Hash,
    from_block: u64,
    events: mpsc::Sender<Event>,
    cancel: watch::Receiver<bool>,
) {
    // Sized so a filter never blocks on an unrelated swap's logs.
    const LOG_CHANNEL_SIZE: usize = 16;

    let (ready_tx, ready_rx) = mpsc::channel(LOG_CHANNEL_SIZE);
    let (refunded_tx, refunded_rx) = mpsc::channel(LOG_CHANNEL_SIZE);
    let (claimed_tx, claimed_rx) = mpsc::channel(LOG_CHANNEL_SIZE);

    let from_block = from_block.saturating_sub(REORG_SAFETY_MARGIN);

    for (topic, sink) in [
        (*READY_TOPIC, ready_tx),
        (*REFUNDED_TOPIC, refunded_tx),
        (*CLAIMED_TOPIC, claimed_tx),
    ] {
        let filter = EventFilter::new(
            eth.clone(),
            LogQuery {
                contract,
                topic,
                from_block,
            },
            sink,
            cancel.clone(),
        );
        tokio::spawn(filter.run());
    }

    let watcher = ContractWatcher {
        swap_id,
        ready_rx,
        refunded_rx,
        claimed_rx,
        events,
    };
    tokio::spawn(watcher.run());
}

impl ContractWatcher {
    /// Translates logs into events. Only the first terminal log (refunded or
    /// claimed) is acted on, then the task exits.
    async fn run(mut self) {
        let mut ready_event_sent = false;

        loop {
            tokio::select! {
                log = self.ready_rx.recv() => {
                    let log = match log {
                        Some(log) => log,
                        None => return,
                    };
                    if ready_event_sent || !log_id_matches(&log, self.swap_id) {
                        continue;
                    }

                    ready_event_sent = self.send_ready().await;
                }
                log = self.refunded_rx.recv() => {
                    let log = match log {
                        Some(log) => log,
                        None => return,
                    };
                    if !log_id_matches(&log, self.swap_id) {
                        continue;
                    }

                    if self.send_refunded(&log).await {
                        return;
                    }
                }
                log = self.claimed_rx.recv() => {
                    let log = match log {
                        Some(log) => log,
                        None => return,
                    };
                    if !log_id_matches(&log, self.swap_id) {
                        continue;
                    }

                    if self.send_claimed(&log).await {
                        return;
                    }
                }
            }
        }
    }

    async fn send_ready(&self) -> bool {
        let (ack, ack_rx) = oneshot::channel();
        if self
            .events
            .send(Event::ContractReady { ack })
            .await
            .is_err()
        {
            return false;
        }

        // The claim can take a while, don't block the watcher on it.
        tokio::spawn(async move {
            if let Ok(Err(e)) = ack_rx.await {
                tracing::error!("failed to handle contract ready event: {}", e);
            }
        });
        true
    }

    async fn send_refunded(&self, log: &Log) -> bool {
        let secret_bytes = match decode_secret_from_log(log, *REFUNDED_TOPIC) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("failed to decode secret from refund log: {:#}", e);
                return false;
            }
        };

        let counterparty_secret =
            match crate::crypto::monero::PrivateSpendKey::from_bytes(secret_bytes) {
                Ok(key) => key,
                Err(e) => {
                    tracing::error!("refund log revealed an invalid scalar: {:#}", e);
                    return false;
                }
            };

        let (ack, ack_rx) = oneshot::channel();
        if self
            .events
            .send(Event::EthRefunded {
                counterparty_secret,
                ack,
            })
            .await
            .is_err()
        {
            return false;
        }

        if let Ok(Err(e)) = ack_rx.await {
            tracing::error!("failed to handle refund event: {}", e);
        }
        true
    }

    async fn send_claimed(&self, log: &Log) -> bool {
        let (ack, ack_rx) = oneshot::channel();
        if self
            .events
            .send(Event::EthClaimed {
                tx_hash: log.tx_hash,
                ack,
            })
            .await
            .is_err()
        {
            return false;
        }

        if let Ok(Err(e)) = ack_rx.await {
            tracing::error!("failed to handle claimed event: {}", e);
        }
        true
    }
}
