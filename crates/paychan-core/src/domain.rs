//! Validated hex domains used across the ledger.
//!
//! Every identifier that crosses the wire is plain lowercase hex without a
//! `0x` prefix: 40 characters for addresses, 64 for hashes and channel ids,
//! 130 for signatures. Each newtype validates on construction, so a value
//! that exists is a value that passed its domain check. Violations carry the
//! domain name in the error message so callers can tell which field was
//! malformed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors raised by domain validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DomainError {
    /// A value failed its domain check (wrong length, bad characters,
    /// out-of-range magnitude).
    #[error("value for domain {domain} violates check constraint")]
    CheckViolation {
        /// Name of the violated domain.
        domain: &'static str,
    },

    /// A required field was missing or explicitly null.
    #[error("{field} must not be null")]
    NullField {
        /// Name of the missing field.
        field: String,
    },

    /// A value that must arrive as a string arrived as something else.
    #[error("value for domain {domain} must be text")]
    NotText {
        /// Name of the domain that requires text input.
        domain: &'static str,
    },
}

impl DomainError {
    /// Shorthand for a [`DomainError::NullField`] error.
    pub fn null_field(field: impl Into<String>) -> Self {
        Self::NullField {
            field: field.into(),
        }
    }
}

/// Validates that `input` is exactly `len` hex characters, normalizing to
/// lowercase. Returns the violated `domain` on failure.
fn validate_hex(input: &str, len: usize, domain: &'static str) -> Result<String, DomainError> {
    let normalized = input.to_ascii_lowercase();
    if normalized.len() != len || !normalized.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DomainError::CheckViolation { domain });
    }
    Ok(normalized)
}

macro_rules! hex_domain {
    ($(#[$doc:meta])* $name:ident, $len:expr, $domain:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Length of the hex representation in characters.
            pub const HEX_LEN: usize = $len;

            /// Domain name reported in check-constraint errors.
            pub const DOMAIN: &'static str = $domain;

            /// Validates and normalizes a hex string.
            ///
            /// # Errors
            ///
            /// Returns [`DomainError::CheckViolation`] when the input is not
            /// exactly the expected number of hex characters.
            pub fn new(input: &str) -> Result<Self, DomainError> {
                validate_hex(input, Self::HEX_LEN, Self::DOMAIN).map(Self)
            }

            /// Returns the lowercase hex representation.
            #[must_use]
            pub fn as_hex(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::new(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_domain!(
    /// A 20-byte Ethereum account or contract address.
    EthAddress,
    40,
    "eth_address"
);

hex_domain!(
    /// A 32-byte channel identifier.
    ChannelId,
    64,
    "eth_hash"
);

hex_domain!(
    /// A 32-byte block hash.
    BlockHash,
    64,
    "eth_hash"
);

hex_domain!(
    /// A 65-byte ECDSA signature (`r ‖ s ‖ v`).
    SignatureHex,
    130,
    "eth_signature"
);
