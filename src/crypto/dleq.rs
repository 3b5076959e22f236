//! Cross-group discrete logarithm proof.
//!
//! A swap secret must be usable as a scalar on both ed25519 and secp256k1, so
//! it is sampled below 2^252, under both group orders. The proof is a pair of
//! Schnorr proofs, one per curve, bound together by a shared Fiat-Shamir
//! challenge over both public keys and both nonce commitments. A verifier
//! learns both public keys and that the prover knows the discrete logarithm
//! of each.

use crate::crypto::{keccak256, monero, secp256k1};
use anyhow::{bail, Context, Result};
use curve25519_dalek::{
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar as EdScalar,
};
use k256::{
    elliptic_curve::{ops::Reduce, sec1::ToEncodedPoint, Field, PrimeField},
    ProjectivePoint, Scalar as SecpScalar,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

const TRANSCRIPT_PREFIX: &[u8] = b"eth-xmr-dleq-v1";
const PROOF_LEN: usize = 32 + 33 + 32 + 32 + 32;

/// A 252 bit secret scalar, valid in both groups.
///
/// Encoded little-endian, like the spend key it doubles as.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        // Clear the top four bits so the value is below both group orders.
        bytes[31] &= 0x0f;
        Secret(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self> {
        if bytes[31] & 0xf0 != 0 {
            bail!("secret must be below 2^252");
        }
        Ok(Secret(bytes))
    }

    pub fn as_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// The secret as a spend key on the ring side.
    pub fn spend_key(&self) -> Result<monero::PrivateSpendKey> {
        monero::PrivateSpendKey::from_bytes(self.0)
    }

    fn ed25519_scalar(&self) -> Result<EdScalar> {
        Option::<EdScalar>::from(EdScalar::from_canonical_bytes(self.0))
            .context("secret is not canonical on ed25519")
    }

    fn secp256k1_scalar(&self) -> Result<SecpScalar> {
        let mut be = self.0;
        be.reverse();
        Option::<SecpScalar>::from(SecpScalar::from_repr(be.into()))
            .context("secret is not canonical on secp256k1")
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(..)")
    }
}

/// The public keys a valid proof vouches for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifiedKeys {
    pub ed25519_public: monero::PublicKey,
    pub secp256k1_public: secp256k1::PublicKey,
}

/// A cross-group proof over one secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Proof {
    ed25519_public: [u8; 32],
    secp256k1_public: secp256k1::PublicKey,
    challenge: [u8; 32],
    response_ed25519: [u8; 32],
    response_secp256k1: [u8; 32],
}

impl Proof {
    pub fn new(secret: &Secret) -> Result<Self> {
        let x_ed = secret.ed25519_scalar()?;
        let x_secp = secret.secp256k1_scalar()?;

        let public_ed = EdwardsPoint::mul_base(&x_ed);
        let public_secp = secp256k1::PublicKey::from_scalar(&x_secp);

        let mut nonce_wide = [0u8; 64];
        rand::rngs::OsRng.fill_bytes(&mut nonce_wide);
        let r_ed = EdScalar::from_bytes_mod_order_wide(&nonce_wide);
        let r_secp = SecpScalar::random(&mut rand::rngs::OsRng);

        let commit_ed = EdwardsPoint::mul_base(&r_ed).compress().to_bytes();
        let commit_secp = (ProjectivePoint::GENERATOR * r_secp).to_affine();
        let commit_secp_bytes = commit_secp.to_encoded_point(true);

        let ed25519_public = public_ed.compress().to_bytes();
        let challenge = challenge(
            &ed25519_public,
            &public_secp.as_bytes(),
            &commit_ed,
            commit_secp_bytes.as_bytes(),
        );

        let s_ed = r_ed + challenge_ed25519(&challenge) * x_ed;
        let s_secp = r_secp + challenge_secp256k1(&challenge) * x_secp;

        Ok(Proof {
            ed25519_public,
            secp256k1_public: public_secp,
            challenge,
            response_ed25519: s_ed.to_bytes(),
            response_secp256k1: s_secp.to_bytes().into(),
        })
    }

    /// Checks the proof and returns the public keys it binds.
    pub fn verify(&self) -> Result<VerifiedKeys> {
        let public_ed = CompressedEdwardsY(self.ed25519_public)
            .decompress()
            .context("proof carries an invalid ed25519 point")?;
        let public_secp = ProjectivePoint::from(self.secp256k1_public.point());

        let s_ed =
            Option::<EdScalar>::from(EdScalar::from_canonical_bytes(self.response_ed25519))
                .context("proof carries a non-canonical ed25519 response")?;
        let s_secp = Option::<SecpScalar>::from(SecpScalar::from_repr(
            self.response_secp256k1.into(),
        ))
        .context("proof carries a non-canonical secp256k1 response")?;

        let commit_ed = EdwardsPoint::mul_base(&s_ed) - public_ed * challenge_ed25519(&self.challenge);
        let commit_secp = ProjectivePoint::GENERATOR * s_secp
            - public_secp * challenge_secp256k1(&self.challenge);
        let commit_secp_bytes = commit_secp.to_affine().to_encoded_point(true);

        let expected = challenge(
            &self.ed25519_public,
            &self.secp256k1_public.as_bytes(),
            &commit_ed.compress().to_bytes(),
            commit_secp_bytes.as_bytes(),
        );

        if expected != self.challenge {
            bail!("challenge mismatch, proof is invalid");
        }

        Ok(VerifiedKeys {
            ed25519_public: monero::PublicKey::from_bytes(self.ed25519_public)?,
            secp256k1_public: self.secp256k1_public,
        })
    }

    pub fn secp256k1_public(&self) -> secp256k1::PublicKey {
        self.secp256k1_public
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PROOF_LEN);
        bytes.extend_from_slice(&self.ed25519_public);
        bytes.extend_from_slice(&self.secp256k1_public.as_bytes());
        bytes.extend_from_slice(&self.challenge);
        bytes.extend_from_slice(&self.response_ed25519);
        bytes.extend_from_slice(&self.response_secp256k1);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PROOF_LEN {
            bail!("proof must be {} bytes, got {}", PROOF_LEN, bytes.len());
        }

        let mut ed25519_public = [0u8; 32];
        ed25519_public.copy_from_slice(&bytes[0..32]);
        let secp256k1_public = secp256k1::PublicKey::from_bytes(&bytes[32..65])?;
        let mut challenge = [0u8; 32];
        challenge.copy_from_slice(&bytes[65..97]);
        let mut response_ed25519 = [0u8; 32];
        response_ed25519.copy_from_slice(&bytes[97..129]);
        let mut response_secp256k1 = [0u8; 32];
        response_secp256k1.copy_from_slice(&bytes[129..161]);

        Ok(Proof {
            ed25519_public,
            secp256k1_public,
            challenge,
            response_ed25519,
            response_secp256k1,
        })
    }

    pub fn hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).context("proof is not valid hex")?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proof(for {})", hex::encode(self.ed25519_public))
    }
}

impl std::convert::TryFrom<String> for Proof {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        Proof::from_hex(&s)
    }
}

impl From<Proof> for String {
    fn from(proof: Proof) -> Self {
        proof.hex()
    }
}

fn challenge(
    public_ed: &[u8],
    public_secp: &[u8],
    commit_ed: &[u8],
    commit_secp: &[u8],
) -> [u8; 32] {
    let mut transcript = Vec::with_capacity(TRANSCRIPT_PREFIX.len() + 32 + 33 + 32 + 33);
    transcript.extend_from_slice(TRANSCRIPT_PREFIX);
    transcript.extend_from_slice(public_ed);
    transcript.extend_from_slice(public_secp);
    transcript.extend_from_slice(commit_ed);
    transcript.extend_from_slice(commit_secp);
    keccak256(&transcript)
}

fn challenge_ed25519(challenge: &[u8; 32]) -> EdScalar {
    EdScalar::from_bytes_mod_order(*challenge)
}

fn challenge_secp256k1(challenge: &[u8; 32]) -> SecpScalar {
    <SecpScalar as Reduce<k256::U256>>::reduce_bytes(&(*challenge).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_material_is_wiped() {
        fn wiped_on_drop<T: ZeroizeOnDrop>() {}
        wiped_on_drop::<Secret>();
        wiped_on_drop::<monero::PrivateSpendKey>();
        wiped_on_drop::<monero::PrivateViewKey>();
        wiped_on_drop::<monero::PrivateKeyPair>();

        let mut secret = Secret::random();
        secret.zeroize();
        assert_eq!(secret.as_bytes(), [0u8; 32]);
    }

    #[test]
    fn proof_roundtrip_verifies() {
        let secret = Secret::random();
        let proof = Proof::new(&secret).unwrap();

        let keys = proof.verify().unwrap();
        assert_eq!(
            keys.ed25519_public,
            secret.spend_key().unwrap().public()
        );
    }

    #[test]
    fn serialized_proof_still_verifies() {
        let secret = Secret::random();
        let proof = Proof::new(&secret).unwrap();

        let decoded = Proof::from_hex(&proof.hex()).unwrap();
        assert_eq!(decoded, proof);
        decoded.verify().unwrap();
    }

    #[test]
    fn tampered_proof_is_rejected() {
        let secret = Secret::random();
        let proof = Proof::new(&secret).unwrap();

        // swap in the public key of a different secret
        let other = Proof::new(&Secret::random()).unwrap();
        let mut bytes = proof.to_bytes();
        bytes[0..32].copy_from_slice(&other.to_bytes()[0..32]);

        let tampered = Proof::from_bytes(&bytes).unwrap();
        assert!(tampered.verify().is_err());
    }

    #[test]
    fn tampered_response_is_rejected() {
        let secret = Secret::random();
        let proof = Proof::new(&secret).unwrap();

        let mut bytes = proof.to_bytes();
        bytes[100] ^= 0x01;

        let tampered = Proof::from_bytes(&bytes).unwrap();
        assert!(tampered.verify().is_err());
    }

    #[test]
    fn secret_with_high_bits_is_rejected() {
        assert!(Secret::from_bytes([0xff; 32]).is_err());
    }

    #[test]
    fn proof_binds_both_public_keys() {
        let secret = Secret::random();
        let proof = Proof::new(&secret).unwrap();
        let keys = proof.verify().unwrap();

        // same secret must yield the same keys on both curves
        let again = Proof::new(&secret).unwrap();
        let keys_again = again.verify().unwrap();
        assert_eq!(keys.ed25519_public, keys_again.ed25519_public);
        assert_eq!(keys.secp256k1_public, keys_again.secp256k1_public);
    }
}
