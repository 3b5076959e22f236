//! Amount types for the two sides of a swap.
//!
//! Monero amounts are handled in piconero (1e-12 XMR), ether amounts in wei
//! (1e-18 ETH). Conversions from standard units round half-up to the precision
//! of the receiving denomination.

use anyhow::{bail, Context, Result};
use primitive_types::U256;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt};

/// Number of decimal places of one monero, i.e. one XMR is 1e12 piconero.
pub const NUM_MONERO_DECIMALS: u32 = 12;

/// Number of decimal places of one ether, i.e. one ETH is 1e18 wei.
pub const NUM_ETHER_DECIMALS: u32 = 18;

/// Maximum number of decimal places accepted for an exchange rate.
pub const MAX_RATE_DECIMALS: u32 = 6;

fn round_to_decimal_place(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
}

/// Validates that an externally provided decimal is strictly positive and does
/// not exceed the given number of decimal places.
pub fn validate_positive(name: &str, max_decimals: u32, value: Decimal) -> Result<()> {
    if value.is_sign_negative() || value.is_zero() {
        bail!("{} must be greater than zero", name);
    }
    if value.normalize().scale() > max_decimals {
        bail!(
            "{} has more than {} decimal places",
            name,
            max_decimals
        );
    }
    Ok(())
}

/// An amount of piconero, the smallest denomination of monero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PiconeroAmount(u64);

impl PiconeroAmount {
    pub fn new(piconeros: u64) -> Self {
        PiconeroAmount(piconeros)
    }

    /// Converts an amount of standard XMR units into piconero.
    ///
    /// Values with more than 12 decimal places are rejected rather than
    /// silently rounded, external input is validated eagerly.
    pub fn from_monero(xmr: Decimal) -> Result<Self> {
        validate_positive("monero amount", NUM_MONERO_DECIMALS, xmr)?;

        let piconeros = xmr
            .checked_mul(Decimal::from(1_000_000_000_000u64))
            .context("monero amount out of range")?;
        let piconeros = piconeros
            .normalize()
            .to_u64()
            .context("monero amount out of range")?;

        Ok(PiconeroAmount(piconeros))
    }

    pub fn as_piconero(&self) -> u64 {
        self.0
    }

    pub fn as_monero(&self) -> Decimal {
        Decimal::from_i128_with_scale(i128::from(self.0), NUM_MONERO_DECIMALS)
    }

    pub fn checked_sub(self, other: PiconeroAmount) -> Option<PiconeroAmount> {
        self.0.checked_sub(other.0).map(PiconeroAmount)
    }
}

impl fmt::Display for PiconeroAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} XMR", self.as_monero().normalize())
    }
}

/// An amount of wei, the smallest denomination of ether.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeiAmount(pub U256);

impl WeiAmount {
    /// Converts an amount of standard ETH units into wei.
    pub fn from_ether(eth: Decimal) -> Result<Self> {
        validate_positive("ether amount", NUM_ETHER_DECIMALS, eth)?;

        let wei = eth
            .checked_mul(Decimal::from(1_000_000_000_000_000_000u64))
            .context("ether amount out of range")?;
        let wei = wei
            .normalize()
            .to_u128()
            .context("ether amount out of range")?;

        Ok(WeiAmount(U256::from(wei)))
    }

    pub fn as_ether(&self) -> Result<Decimal> {
        let wei = u128::try_from(self.0)
            .ok()
            .context("wei amount exceeds decimal range")?;
        Ok(Decimal::from_i128_with_scale(
            i128::try_from(wei).context("wei amount exceeds decimal range")?,
            NUM_ETHER_DECIMALS,
        ))
    }
}

impl From<U256> for WeiAmount {
    fn from(wei: U256) -> Self {
        WeiAmount(wei)
    }
}

impl fmt::Display for WeiAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_ether() {
            Ok(eth) => write!(f, "{} ETH", eth.normalize()),
            Err(_) => write!(f, "{} wei", self.0),
        }
    }
}

/// An exchange rate between ETH and XMR, defined as the ratio of ETH:XMR.
///
/// A rate of 0.1 means 1 ETH is worth 10 XMR.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct ExchangeRate(Decimal);

impl ExchangeRate {
    pub fn new(rate: Decimal) -> Result<Self> {
        validate_positive("exchange rate", MAX_RATE_DECIMALS, rate)?;
        Ok(ExchangeRate(rate))
    }

    pub fn rate(&self) -> Decimal {
        self.0
    }

    /// Converts an ETH amount to the XMR amount it buys at this rate, rounded
    /// half-up to piconero precision.
    pub fn eth_to_xmr(&self, eth: Decimal) -> Result<Decimal> {
        let xmr = eth.checked_div(self.0).context("exchange rate division")?;
        Ok(round_to_decimal_place(xmr, NUM_MONERO_DECIMALS))
    }

    /// Converts an XMR amount to the ETH amount it is worth at this rate.
    ///
    /// With the rate capped at 6 and the XMR amount at 12 decimal places the
    /// product never exceeds wei precision, so the rounding is a no-op for
    /// validated inputs.
    pub fn xmr_to_eth(&self, xmr: Decimal) -> Result<Decimal> {
        let eth = xmr.checked_mul(self.0).context("exchange rate overflow")?;
        Ok(round_to_decimal_place(eth, NUM_ETHER_DECIMALS))
    }
}

impl TryFrom<Decimal> for ExchangeRate {
    type Error = anyhow::Error;

    fn try_from(rate: Decimal) -> Result<Self> {
        ExchangeRate::new(rate)
    }
}

impl From<ExchangeRate> for Decimal {
    fn from(rate: ExchangeRate) -> Self {
        rate.0
    }
}

impl fmt::Display for ExchangeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn piconero_from_monero() {
        let amount = PiconeroAmount::from_monero(dec("1.5")).unwrap();
        assert_eq!(amount.as_piconero(), 1_500_000_000_000);

        let amount = PiconeroAmount::from_monero(dec("0.000000000001")).unwrap();
        assert_eq!(amount.as_piconero(), 1);
    }

    #[test]
    fn piconero_rejects_excess_precision() {
        assert!(PiconeroAmount::from_monero(dec("0.0000000000001")).is_err());
    }

    #[test]
    fn piconero_rejects_non_positive() {
        assert!(PiconeroAmount::from_monero(dec("0")).is_err());
        assert!(PiconeroAmount::from_monero(dec("-1")).is_err());
    }

    #[test]
    fn wei_from_ether() {
        let amount = WeiAmount::from_ether(dec("1")).unwrap();
        assert_eq!(amount.0, U256::from(1_000_000_000_000_000_000u64));

        let amount = WeiAmount::from_ether(dec("0.000000000000000001")).unwrap();
        assert_eq!(amount.0, U256::from(1u64));
    }

    #[test]
    fn rate_conversions() {
        // 1 ETH = 10 XMR at a rate of 0.1
        let rate = ExchangeRate::new(dec("0.1")).unwrap();
        assert_eq!(rate.eth_to_xmr(dec("1")).unwrap(), dec("10"));
        assert_eq!(rate.xmr_to_eth(dec("33")).unwrap(), dec("3.3"));
    }

    #[test]
    fn rate_division_rounds_half_up() {
        let rate = ExchangeRate::new(dec("3")).unwrap();
        // 2 / 3 = 0.66666..., rounds up at piconero precision
        assert_eq!(rate.eth_to_xmr(dec("2")).unwrap(), dec("0.666666666667"));
    }

    #[test]
    fn rate_rejects_excess_precision() {
        assert!(ExchangeRate::new(dec("0.1234567")).is_err());
        assert!(ExchangeRate::new(dec("0.123456")).is_ok());
    }

    #[test]
    fn piconero_monero_roundtrip() {
        fn prop(piconeros: u64) -> bool {
            if piconeros == 0 {
                return true;
            }
            let amount = PiconeroAmount::new(piconeros);
            PiconeroAmount::from_monero(amount.as_monero()).unwrap() == amount
        }

        quickcheck::quickcheck(prop as fn(u64) -> bool);
    }

    #[test]
    fn wei_ether_roundtrip() {
        fn prop(wei: u64) -> bool {
            if wei == 0 {
                return true;
            }
            let amount = WeiAmount(U256::from(wei));
            WeiAmount::from_ether(amount.as_ether().unwrap()).unwrap() == amount
        }

        quickcheck::quickcheck(prop as fn(u64) -> bool);
    }
}
