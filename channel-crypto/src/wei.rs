use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CryptoError;

/// A non-negative, arbitrary-precision integer amount of wei.
///
/// Carried as `BigUint` end to end so that channel values never collapse
/// to a fixed-width integer; on the wire it is always a decimal string,
/// never a JSON number (a bare number is rejected with `MustBeText`).
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Wei(BigUint);

impl Wei {
    pub fn zero() -> Self {
        Wei(BigUint::zero())
    }

    pub fn from_biguint(value: BigUint) -> Self {
        Wei(value)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_sub(&self, other: &Wei) -> Option<Wei> {
        if self.0 < other.0 {
            None
        } else {
            Some(Wei(&self.0 - &other.0))
        }
    }

    pub fn checked_add(&self, other: &Wei) -> Wei {
        Wei(&self.0 + &other.0)
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    /// Scale by a power of ten, as required to build the state-update digest
    /// (`amount * 10^18`).
    pub fn scaled_by_pow10(&self, exp: u32) -> Wei {
        Wei(&self.0 * BigUint::from(10u8).pow(exp))
    }
}

impl FromStr for Wei {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, CryptoError> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CryptoError::ParseError);
        }
        BigUint::from_str(s)
            .map(Wei)
            .map_err(|_| CryptoError::ParseError)
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Wei({})", self.0)
    }
}

impl Serialize for Wei {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Wei {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct WeiVisitor;

        impl<'de> serde::de::Visitor<'de> for WeiVisitor {
            type Value = Wei;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal string of a non-negative integer")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Wei, E> {
                Wei::from_str(v).map_err(|_| E::custom("invalid wei amount"))
            }

            fn visit_u64<E: serde::de::Error>(self, _v: u64) -> Result<Wei, E> {
                Err(E::custom("amount must be text, not a number"))
            }

            fn visit_i64<E: serde::de::Error>(self, _v: i64) -> Result<Wei, E> {
                Err(E::custom("amount must be text, not a number"))
            }

            fn visit_f64<E: serde::de::Error>(self, _v: f64) -> Result<Wei, E> {
                Err(E::custom("amount must be text, not a number"))
            }
        }

        deserializer.deserialize_any(WeiVisitor)
    }
}

impl PartialEq<&str> for Wei {
    fn eq(&self, other: &&str) -> bool {
        self.to_string() == *other
    }
}

pub fn cmp_amount(a: &Wei, b: &Wei) -> Ordering {
    a.0.cmp(&b.0)
}
