//! Ed25519 key types for the ring side of a swap.
//!
//! Scalars are encoded little-endian, as wallets expect them. A view key is
//! always derived deterministically from its spend key by hashing, so a party
//! only ever needs to remember one scalar per swap.

use crate::crypto::keccak256;
use anyhow::{bail, Context, Result};
use curve25519_dalek::{
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A private spend key, the secret half of the swap protocol.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PrivateSpendKey(Scalar);

impl PrivateSpendKey {
    /// Builds a spend key from its canonical little-endian encoding.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self> {
        let scalar = Option::<Scalar>::from(Scalar::from_canonical_bytes(bytes))
            .context("spend key bytes are not a canonical scalar")?;
        Ok(PrivateSpendKey(scalar))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).context("spend key is not valid hex")?;
        if bytes.len() != 32 {
            bail!("spend key must be 32 bytes, got {}", bytes.len());
        }
        let mut array = [0u8; 32];
        array.copy_from_slice(&bytes);
        Self::from_bytes(array)
    }

    pub fn as_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(EdwardsPoint::mul_base(&self.0))
    }

    /// Derives the private view key by hashing the spend key and reducing the
    /// digest into a scalar.
    pub fn view_key(&self) -> PrivateViewKey {
        PrivateViewKey(Scalar::from_bytes_mod_order(keccak256(
            &self.0.to_bytes(),
        )))
    }

    /// Promotes a lone spend key into a full key pair with the derived view
    /// key.
    pub fn as_key_pair(&self) -> PrivateKeyPair {
        PrivateKeyPair {
            spend: self.clone(),
            view: self.view_key(),
        }
    }

    pub fn hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Debug for PrivateSpendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never log the scalar itself.
        write!(f, "PrivateSpendKey(for {})", self.public())
    }
}

impl Serialize for PrivateSpendKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex())
    }
}

impl<'de> Deserialize<'de> for PrivateSpendKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A private view key, grants read access to incoming outputs.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PrivateViewKey(Scalar);

impl PrivateViewKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self> {
        let scalar = Option::<Scalar>::from(Scalar::from_canonical_bytes(bytes))
            .context("view key bytes are not a canonical scalar")?;
        Ok(PrivateViewKey(scalar))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).context("view key is not valid hex")?;
        if bytes.len() != 32 {
            bail!("view key must be 32 bytes, got {}", bytes.len());
        }
        let mut array = [0u8; 32];
        array.copy_from_slice(&bytes);
        Self::from_bytes(array)
    }

    pub fn as_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(EdwardsPoint::mul_base(&self.0))
    }

    pub fn hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Debug for PrivateViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateViewKey(for {})", self.public())
    }
}

impl Serialize for PrivateViewKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex())
    }
}

impl<'de> Deserialize<'de> for PrivateViewKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A public ed25519 key, either spend or view.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(EdwardsPoint);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self> {
        let point = CompressedEdwardsY(bytes)
            .decompress()
            .context("bytes are not a valid curve point")?;
        Ok(PublicKey(point))
    }

    pub fn as_bytes(&self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }

    pub fn hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.hex())
    }
}

impl FromStr for PublicKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).context("public key is not valid hex")?;
        if bytes.len() != 32 {
            bail!("public key must be 32 bytes, got {}", bytes.len());
        }
        let mut array = [0u8; 32];
        array.copy_from_slice(&bytes);
        Self::from_bytes(array)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A private spend/view key pair.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKeyPair {
    spend: PrivateSpendKey,
    view: PrivateViewKey,
}

impl PrivateKeyPair {
    pub fn new(spend: PrivateSpendKey, view: PrivateViewKey) -> Self {
        PrivateKeyPair { spend, view }
    }

    pub fn spend_key(&self) -> &PrivateSpendKey {
        &self.spend
    }

    pub fn view_key(&self) -> &PrivateViewKey {
        &self.view
    }

    pub fn public(&self) -> PublicKeyPair {
        PublicKeyPair {
            spend: self.spend.public(),
            view: self.view.public(),
        }
    }

    pub fn address(&self) -> Address {
        self.public().address()
    }
}

impl fmt::Debug for PrivateKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKeyPair(for {})", self.address())
    }
}

/// A public spend/view key pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyPair {
    spend: PublicKey,
    view: PublicKey,
}

impl PublicKeyPair {
    pub fn new(spend: PublicKey, view: PublicKey) -> Self {
        PublicKeyPair { spend, view }
    }

    pub fn spend_key(&self) -> PublicKey {
        self.spend
    }

    pub fn view_key(&self) -> PublicKey {
        self.view
    }

    pub fn address(&self) -> Address {
        Address::from_public_keys(self)
    }
}

/// Sums two private spend keys. The joint wallet of a swap is controlled by
/// the sum of both parties' keys.
pub fn sum_private_spend_keys(a: &PrivateSpendKey, b: &PrivateSpendKey) -> PrivateSpendKey {
    PrivateSpendKey(a.0 + b.0)
}

pub fn sum_private_view_keys(a: &PrivateViewKey, b: &PrivateViewKey) -> PrivateViewKey {
    PrivateViewKey(a.0 + b.0)
}

pub fn sum_public_keys(a: &PublicKey, b: &PublicKey) -> PublicKey {
    PublicKey(a.0 + b.0)
}

/// Sums two public key pairs component-wise, yielding the public keys of the
/// joint wallet.
pub fn sum_spend_and_view_keys(a: &PublicKeyPair, b: &PublicKeyPair) -> PublicKeyPair {
    PublicKeyPair {
        spend: sum_public_keys(&a.spend, &b.spend),
        view: sum_public_keys(&a.view, &b.view),
    }
}

/// A wallet address, treated as an opaque identifier.
///
/// Base58 encoding and network prefixes are the wallet's concern, internally
/// an address is the hex of the compressed public spend and view keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn from_public_keys(keys: &PublicKeyPair) -> Self {
        Address(format!("{}{}", keys.spend.hex(), keys.view.hex()))
    }

    pub fn from_string(s: String) -> Self {
        Address(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
