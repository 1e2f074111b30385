//! Signature verification capability.
//!
//! Verification is injected, not hard-wired: the store takes any
//! [`SignatureVerifier`], so tests can accept everything while production
//! runs real secp256k1 recovery. The digest layout is frozen wire contract:
//! the byte concatenation below is exactly what wallets sign.
//!
//! A state-update digest is the byte string obtained by concatenating the
//! big-endian packings of:
//!
//! | field         | width    |
//! |---------------|----------|
//! | `chain_id`    | 4 bytes  |
//! | `contract_id` | 20 bytes |
//! | `channel_id`  | 32 bytes |
//! | `amount * 10^18` | 32 bytes |
//!
//! The verifier hashes those bytes with SHA-256 and checks the 65-byte
//! `r ‖ s ‖ v` signature against the sender by public-key recovery.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use num_bigint::BigInt;
use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crate::domain::{ChannelId, EthAddress, SignatureHex};
use crate::pack::{pack, PackError};
use crate::wei::Wei;

/// Capability for checking a state-update signature against a sender.
///
/// Implementations return a plain bool: an unverifiable signature and an
/// invalid one are the same thing to admission.
pub trait SignatureVerifier: Send + Sync {
    /// Returns `true` when `signature` over `digest` was produced by the key
    /// behind `sender`.
    fn verify(&self, sender: &EthAddress, digest: &[u8], signature: &SignatureHex) -> bool;
}

/// Builds the signature digest for a state update.
///
/// # Errors
///
/// Returns a [`PackError`] when a component does not fit its width, in
/// particular when `amount * 10^18` exceeds 32 bytes or is negative. Callers
/// treat that as an unverifiable (hence invalid) signature.
pub fn state_update_digest(
    chain_id: u32,
    contract_id: &EthAddress,
    channel_id: &ChannelId,
    amount: &Wei,
) -> Result<Vec<u8>, PackError> {
    let scale = num_traits::pow(BigInt::from(10u8), 18);
    let scaled = amount.as_bigint() * &scale;

    let mut packed = String::with_capacity(8 + 40 + 64 + 64);
    packed.push_str(&pack(4, &BigInt::from(chain_id))?);
    packed.push_str(&pack(20, &hex_to_bigint(contract_id.as_hex()))?);
    packed.push_str(&pack(32, &hex_to_bigint(channel_id.as_hex()))?);
    packed.push_str(&pack(32, &scaled)?);

    hex::decode(&packed).map_err(|e| PackError::InvalidHex(e.to_string()))
}

/// Interprets a validated hex domain value as a big-endian integer.
fn hex_to_bigint(hex_str: &str) -> BigInt {
    // Domain newtypes only hold validated hex.
    BigInt::parse_bytes(hex_str.as_bytes(), 16).expect("domain value is validated hex")
}

/// Production verifier: secp256k1 ECDSA over the SHA-256 of the digest,
/// checked by public-key recovery and Keccak-256 address derivation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Secp256k1Verifier;

impl Secp256k1Verifier {
    /// Creates a new verifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Recovers the signer address from a 65-byte `r ‖ s ‖ v` signature over
    /// the SHA-256 prehash of `digest`. Returns `None` on any malformed
    /// component.
    fn recover_address(digest: &[u8], signature: &SignatureHex) -> Option<String> {
        let bytes = hex::decode(signature.as_hex()).ok()?;
        if bytes.len() != 65 {
            return None;
        }
        let sig = Signature::from_slice(&bytes[..64]).ok()?;
        let v = bytes[64];
        let recid_byte = match v {
            0 | 1 => v,
            27 | 28 => v - 27,
            _ => return None,
        };
        let recid = RecoveryId::from_byte(recid_byte)?;
        let prehash = Sha256::digest(digest);
        let key = VerifyingKey::recover_from_prehash(&prehash, &sig, recid).ok()?;

        // Ethereum address: Keccak-256 over the uncompressed point without
        // the 0x04 prefix, last 20 bytes.
        let point = key.to_encoded_point(false);
        let hash = Keccak256::digest(&point.as_bytes()[1..]);
        Some(hex::encode(&hash[12..]))
    }
}

impl SignatureVerifier for Secp256k1Verifier {
    fn verify(&self, sender: &EthAddress, digest: &[u8], signature: &SignatureHex) -> bool {
        Self::recover_address(digest, signature)
            .is_some_and(|recovered| recovered == sender.as_hex())
    }
}

/// Verifier that accepts every signature. For tests and environments where
/// upstream feeders have already authenticated updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllVerifier;

impl SignatureVerifier for AcceptAllVerifier {
    fn verify(&self, _: &EthAddress, _: &[u8], _: &SignatureHex) -> bool {
        true
    }
}
