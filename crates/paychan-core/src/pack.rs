//! Fixed-width big-endian hex packing.
//!
//! `pack` renders a non-negative integer as exactly `2 * n_bytes` lowercase
//! hex characters, left-padded with zeros. The state-update signature digest
//! is built from these packings, which freezes this encoding as part of the
//! wire contract: wallets sign the same bytes this module produces.

use num_bigint::{BigInt, Sign};
use thiserror::Error;

/// Errors raised by the packer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PackError {
    /// Negative values have no fixed-width big-endian encoding here.
    #[error("cannot pack negative value into {n_bytes} bytes")]
    Negative {
        /// Requested width in bytes.
        n_bytes: usize,
    },

    /// The magnitude needs more than `n_bytes` bytes.
    #[error("value does not fit into {n_bytes} bytes")]
    Overflow {
        /// Requested width in bytes.
        n_bytes: usize,
    },

    /// Input to [`unpack`] was not valid hex.
    #[error("invalid packed hex: {0}")]
    InvalidHex(String),
}

/// Packs `value` big-endian into exactly `2 * n_bytes` lowercase hex chars.
///
/// # Errors
///
/// Returns [`PackError::Negative`] for negative input and
/// [`PackError::Overflow`] when the magnitude exceeds `n_bytes` bytes.
pub fn pack(n_bytes: usize, value: &BigInt) -> Result<String, PackError> {
    if value.sign() == Sign::Minus {
        return Err(PackError::Negative { n_bytes });
    }
    let (_, bytes) = value.to_bytes_be();
    // `to_bytes_be` renders zero as a single 0x00 byte.
    let bytes = if value.sign() == Sign::NoSign {
        Vec::new()
    } else {
        bytes
    };
    if bytes.len() > n_bytes {
        return Err(PackError::Overflow { n_bytes });
    }
    let mut padded = vec![0u8; n_bytes - bytes.len()];
    padded.extend_from_slice(&bytes);
    Ok(hex::encode(padded))
}

/// Recovers the integer from a packed hex string.
///
/// Round-trip property: `unpack(pack(n, v)) == v` exactly when `v` is
/// non-negative and fits in `n` bytes.
///
/// # Errors
///
/// Returns [`PackError::InvalidHex`] when the input is not hex.
pub fn unpack(packed: &str) -> Result<BigInt, PackError> {
    let bytes = hex::decode(packed).map_err(|e| PackError::InvalidHex(e.to_string()))?;
    Ok(BigInt::from_bytes_be(Sign::Plus, &bytes))
}
