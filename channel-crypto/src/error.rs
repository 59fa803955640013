use thiserror::Error;

/// Failure modes for the codec and signature primitives in this crate.
#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum CryptoError {
    #[error("hex decode failed")]
    HexDecodeFailed,

    /// Carries the domain name (`eth_address`, `hash32`, `eth_signature`) so
    /// callers can reproduce the relational engine's own wording for a
    /// failed domain check.
    #[error("value for domain {0} violates check constraint")]
    WrongLength(&'static str),

    #[error("value is not valid utf8 hex")]
    ParseError,

    #[error("value must be non-negative")]
    NegativeValue,

    #[error("value does not fit in the requested width")]
    Overflow,

    #[error("value must be text, not a number")]
    MustBeText,

    #[error("signature recovery failed")]
    RecoverError,
}
