//! Events driving a swap forward.
//!
//! Every producer (message handler, watchers, timeout task, exit requests)
//! funnels into one queue per swap, so state transitions are serialized. Each
//! event carries a completion channel the producer can await.

use crate::{
    crypto::monero::PrivateSpendKey,
    ethereum::Hash,
    message::{NotifyEthLocked, SendKeysMessage},
    protocol::error,
    swap::Status,
};
use tokio::sync::oneshot;

/// The kind of event a swap expects next. Drives the state machine, one kind
/// at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    /// Waiting for the counterparty's keys.
    KeysReceived,
    /// Keys are exchanged, waiting for the counterparty to lock their asset.
    EthLocked,
    /// Both assets are locked, waiting for the contract to become claimable
    /// or refunded.
    ContractReady,
    /// The counterparty refunded their locked asset.
    EthRefunded,
    /// Our claim was observed on-chain.
    EthClaimed,
    /// External request to stop the swap.
    Exit,
    /// Terminal, nothing more is expected.
    None,
}

impl EventType {
    /// Maps a swap's stored status back to the event it waits for, used when
    /// resuming a swap.
    pub fn from_status(status: Status) -> EventType {
        match status {
            Status::ExpectingKeys => EventType::KeysReceived,
            Status::KeysExchanged | Status::EthLocked => EventType::EthLocked,
            Status::XmrLocked | Status::ContractReady => EventType::ContractReady,
            _ => EventType::Exit,
        }
    }

    /// The status a swap is in while waiting for this event.
    pub fn waiting_status(&self) -> Option<Status> {
        match self {
            EventType::KeysReceived => Some(Status::ExpectingKeys),
            EventType::EthLocked => Some(Status::KeysExchanged),
            EventType::ContractReady => Some(Status::XmrLocked),
            _ => None,
        }
    }
}

/// A completion channel for one event. The dispatch loop reports the outcome
/// of handling the event through it.
pub type Ack = oneshot::Sender<error::Result<()>>;

/// One protocol event together with its payload and completion channel.
#[derive(Debug)]
pub enum Event {
    KeysReceived {
        message: Box<SendKeysMessage>,
        ack: Ack,
    },
    EthLocked {
        message: Box<NotifyEthLocked>,
        ack: Ack,
    },
    ContractReady {
        ack: Ack,
    },
    EthRefunded {
        counterparty_secret: PrivateSpendKey,
        ack: Ack,
    },
    EthClaimed {
        tx_hash: Hash,
        ack: Ack,
    },
    Exit {
        ack: Ack,
    },
}

impl Event {
    /// Consumes the event and acknowledges it with the given result.
    pub fn ack(self, result: error::Result<()>) {
        let ack = match self {
            Event::KeysReceived { ack, .. } => ack,
            Event::EthLocked { ack, .. } => ack,
            Event::ContractReady { ack } => ack,
            Event::EthRefunded { ack, .. } => ack,
            Event::EthClaimed { ack, .. } => ack,
            Event::Exit { ack } => ack,
        };
        // The producer may be gone, a dropped receiver is fine.
        let _ = ack.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_follows_status() {
        assert_eq!(
            EventType::from_status(Status::ExpectingKeys),
            EventType::KeysReceived
        );
        assert_eq!(
            EventType::from_status(Status::KeysExchanged),
            EventType::EthLocked
        );
        assert_eq!(
            EventType::from_status(Status::XmrLocked),
            EventType::ContractReady
        );
        assert_eq!(
            EventType::from_status(Status::CompletedSuccess),
            EventType::Exit
        );
    }

    #[test]
    fn waiting_status_is_inverse_of_from_status() {
        for event_type in [
            EventType::KeysReceived,
            EventType::EthLocked,
            EventType::ContractReady,
        ] {
            let status = event_type.waiting_status().unwrap();
            assert_eq!(EventType::from_status(status), event_type);
        }

        assert_eq!(EventType::Exit.waiting_status(), None);
        assert_eq!(EventType::None.waiting_status(), None);
    }
}
