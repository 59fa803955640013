use std::convert::TryFrom;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

const ETH_HEX_PREFIX: &str = "0x";

/// Decode a hex string, tolerating an optional `0x` prefix.
pub fn eth_decode_hex(message: &str) -> Result<Vec<u8>, CryptoError> {
    let stripped = message.strip_prefix(ETH_HEX_PREFIX).unwrap_or(message);
    hex::decode(stripped).map_err(|_| CryptoError::HexDecodeFailed)
}

macro_rules! fixed_hex_type {
    ($name:ident, $bytes:expr, $domain:expr) => {
        #[derive(Copy, Clone, Eq, PartialEq, Hash)]
        pub struct $name([u8; $bytes]);

        impl $name {
            pub const BYTES: usize = $bytes;

            pub fn as_bytes(&self) -> &[u8; $bytes] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = CryptoError;

            fn try_from(value: &str) -> Result<Self, CryptoError> {
                let bytes = eth_decode_hex(value)?;
                if bytes.len() != $bytes {
                    return Err(CryptoError::WrongLength($domain));
                }
                let mut out = [0u8; $bytes];
                out.copy_from_slice(&bytes);
                Ok($name(out))
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = CryptoError;

            fn try_from(value: &[u8]) -> Result<Self, CryptoError> {
                if value.len() != $bytes {
                    return Err(CryptoError::WrongLength($domain));
                }
                let mut out = [0u8; $bytes];
                out.copy_from_slice(value);
                Ok($name(out))
            }
        }

        impl From<[u8; $bytes]> for $name {
            fn from(value: [u8; $bytes]) -> Self {
                $name(value)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $domain, self.to_hex())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                $name::try_from(s.as_str()).map_err(serde::de::Error::custom)
            }
        }
    };
}

// domain eth_address: 20 bytes, 40 hex chars
fixed_hex_type!(Address, 20, "eth_address");
// domain block_hash / channel_id: 32 bytes, 64 hex chars
fixed_hex_type!(Hash32, 32, "hash32");
// domain eth_signature: 65 bytes (r || s || v), 130 hex chars
fixed_hex_type!(Signature65, 65, "eth_signature");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trips() {
        let hex = "0x1111111111111111111111111111111111111111";
        let addr = Address::try_from(hex).unwrap();
        assert_eq!(format!("0x{}", addr.to_hex()), hex);
    }

    #[test]
    fn address_rejects_wrong_length() {
        let err = Address::try_from("0x1111").unwrap_err();
        assert_eq!(err, CryptoError::WrongLength("eth_address"));
        assert_eq!(
            err.to_string(),
            "value for domain eth_address violates check constraint"
        );
    }

    #[test]
    fn hash32_rejects_bad_hex() {
        assert!(Hash32::try_from("0xzz").is_err());
    }

    #[test]
    fn eth_decode_hex_ascii_fails_on_unicode() {
        assert!(eth_decode_hex("0💘").is_err());
    }

    #[test]
    fn eth_decode_hex_tolerates_missing_prefix() {
        assert_eq!(eth_decode_hex("ab").unwrap(), vec![0xab]);
        assert_eq!(eth_decode_hex("0xab").unwrap(), vec![0xab]);
    }
}
