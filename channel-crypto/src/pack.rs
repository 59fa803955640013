use num_bigint::BigUint;

use crate::error::CryptoError;

/// Pack `value` as `n_bytes` of big-endian hex, left-padded with zeros.
///
/// Part of the wire contract: this exact encoding is what gets hashed and
/// signed for a state update (see `digest_for_state_update`), so its
/// behaviour must never change once shipped.
pub fn pack(n_bytes: usize, value: &BigUint) -> Result<String, CryptoError> {
    let raw = value.to_bytes_be();
    if raw.len() > n_bytes {
        return Err(CryptoError::Overflow);
    }
    let mut buf = vec![0u8; n_bytes];
    let offset = n_bytes - raw.len();
    buf[offset..].copy_from_slice(&raw);
    Ok(hex::encode(buf))
}

/// Inverse of `pack`: parse `n_bytes` of big-endian hex back into a value.
pub fn unpack(hex_str: &str) -> Result<BigUint, CryptoError> {
    let bytes = hex::decode(hex_str).map_err(|_| CryptoError::HexDecodeFailed)?;
    Ok(BigUint::from_bytes_be(&bytes))
}
