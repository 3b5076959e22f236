//! Secp256k1 public keys and the Keccak commitments the escrow contract
//! verifies secrets against.

use crate::crypto::keccak256;
use crate::ethereum::Hash;
use anyhow::{bail, Context, Result};
use k256::{
    elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint},
    AffinePoint, EncodedPoint, ProjectivePoint, Scalar,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(AffinePoint);

impl PublicKey {
    pub fn from_scalar(scalar: &Scalar) -> Self {
        PublicKey((ProjectivePoint::GENERATOR * scalar).to_affine())
    }

    /// Parses a SEC1 encoded public key, compressed or uncompressed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let encoded = EncodedPoint::from_bytes(bytes)
            .map_err(|e| anyhow::anyhow!("invalid sec1 encoding: {}", e))?;
        let point = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
            .context("bytes are not a point on the curve")?;
        Ok(PublicKey(point))
    }

    /// Compressed SEC1 encoding, 33 bytes.
    pub fn as_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(true).as_bytes().to_vec()
    }

    /// The commitment the contract stores for this key: the Keccak-256 hash
    /// over the 64 byte uncompressed point, without the SEC1 tag byte.
    pub fn keccak_commitment(&self) -> Hash {
        let uncompressed = self.0.to_encoded_point(false);
        Hash(keccak256(&uncompressed.as_bytes()[1..]))
    }

    pub fn hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    pub(crate) fn point(&self) -> AffinePoint {
        self.0
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
        if bytes.len() != 33 && bytes.len() != 65 {
            bail!("public key must be 33 or 65 bytes, got {}", bytes.len());
        }
        Self::from_bytes(&bytes)
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
