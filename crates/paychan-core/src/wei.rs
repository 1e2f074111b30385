//! Arbitrary-precision wei amounts.
//!
//! Wei values travel as decimal strings and may carry up to 1000 digits, far
//! beyond any machine integer. Negative values are representable so that
//! admission can classify them (`negative_amount`) instead of failing at the
//! parse boundary; the storage domain check is what keeps them out of the
//! logs. Numeric wire input is rejected: a wei amount must be text.

use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::DomainError;

/// Maximum number of decimal digits (sign excluded) a wei value may carry.
pub const WEI_MAX_DIGITS: usize = 1000;

/// A wei amount: an arbitrary-precision decimal integer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Wei(BigInt);

impl Wei {
    /// Parses a decimal string, accepting an optional leading `-`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::CheckViolation`] for empty input, non-digit
    /// characters, or more than [`WEI_MAX_DIGITS`] digits.
    pub fn new(text: &str) -> Result<Self, DomainError> {
        let violation = DomainError::CheckViolation { domain: "wei" };
        let digits = text.strip_prefix('-').unwrap_or(text);
        if digits.is_empty()
            || digits.len() > WEI_MAX_DIGITS
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(violation);
        }
        BigInt::parse_bytes(text.as_bytes(), 10)
            .map(Self)
            .ok_or(violation)
    }

    /// The zero amount.
    #[must_use]
    pub fn zero() -> Self {
        Self(BigInt::zero())
    }

    /// Returns `true` when the amount is strictly below zero.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    /// Borrows the underlying big integer (digest construction).
    #[must_use]
    pub(crate) fn as_bigint(&self) -> &BigInt {
        &self.0
    }
}

impl From<u64> for Wei {
    fn from(value: u64) -> Self {
        Self(BigInt::from(value))
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Wei {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Add for &Wei {
    type Output = Wei;

    fn add(self, rhs: &Wei) -> Wei {
        Wei(&self.0 + &rhs.0)
    }
}

impl Sub for &Wei {
    type Output = Wei;

    fn sub(self, rhs: &Wei) -> Wei {
        Wei(&self.0 - &rhs.0)
    }
}

impl Serialize for Wei {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Wei {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(WeiVisitor)
    }
}

struct WeiVisitor;

impl serde::de::Visitor<'_> for WeiVisitor {
    type Value = Wei;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a decimal string wei amount")
    }

    fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Wei, E> {
        Wei::new(value).map_err(E::custom)
    }

    fn visit_u64<E: serde::de::Error>(self, _: u64) -> Result<Wei, E> {
        Err(E::custom(DomainError::NotText { domain: "wei" }))
    }

    fn visit_i64<E: serde::de::Error>(self, _: i64) -> Result<Wei, E> {
        Err(E::custom(DomainError::NotText { domain: "wei" }))
    }

    fn visit_f64<E: serde::de::Error>(self, _: f64) -> Result<Wei, E> {
        Err(E::custom(DomainError::NotText { domain: "wei" }))
    }
}
