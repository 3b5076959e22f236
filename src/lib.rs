//! Protocol engine for atomic swaps between ether and monero.
//!
//! The crate drives the per-swap protocol state machine: key exchange, fund
//! locking, claim and refund. Chain access, the wallet process and the
//! message transport are reached through traits ([`ethereum::EthereumClient`],
//! [`ethereum::SwapCreator`], [`monero::WalletClient`],
//! [`message::MessageSender`]), concrete bindings are provided by the
//! embedding daemon.

#![warn(
    unused_extern_crates,
    missing_debug_implementations,
    rust_2018_idioms,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::fallible_impl_from,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::dbg_macro
)]
#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![forbid(unsafe_code)]

pub mod coins;
pub mod command;
pub mod config;
pub mod crypto;
pub mod database;
pub mod ethereum;
pub mod fs;
pub mod message;
pub mod monero;
pub mod offer;
pub mod protocol;
pub mod swap;
pub mod trace;
