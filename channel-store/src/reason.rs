use thiserror::Error;

/// The closed set of outcomes callers of the ledger must be able to
/// pattern-match on. Internal plumbing errors use `anyhow::Error` instead;
/// this enum is reserved for validation failures and quarantine reasons.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Reason {
    #[error("{0} must not be null")]
    MustNotBeNull(String),

    #[error("amount must be text")]
    MustBeText,

    #[error("value for domain {0} violates check constraint")]
    DomainCheckFailed(String),

    #[error("signature_invalid")]
    SignatureInvalid,

    #[error("conflict")]
    Conflict,

    #[error("negative_amount")]
    NegativeAmount,

    #[error("invalid_state: {0}")]
    InvalidState(String),
}

impl Reason {
    /// The short machine-readable tag persisted in `invalid_state_updates.reason`.
    pub fn tag(&self) -> &'static str {
        match self {
            Reason::MustNotBeNull(_) => "must_not_be_null",
            Reason::MustBeText => "must_be_text",
            Reason::DomainCheckFailed(_) => "domain_check_failed",
            Reason::SignatureInvalid => "signature_invalid",
            Reason::Conflict => "conflict",
            Reason::NegativeAmount => "negative_amount",
            Reason::InvalidState(_) => "invalid_state",
        }
    }
}
