use std::str::FromStr;

use channel_crypto::{digest_for_state_update, SignatureVerifier, Signature65, Wei};
use chrono::Utc;
use num_bigint::BigInt;

use crate::reason::Reason;
use crate::status::get_channel_status;
use crate::store::Store;
use crate::types::{ChannelKey, ChannelStatus, DupeStatus, StateUpdate, StateUpdateStatus};
use crate::wire::AmountText;

/// Parses the raw wire amount into a signed integer without collapsing to a
/// fixed-width type, so a syntactically valid but negative amount can reach
/// the `negative_amount` quarantine step instead of failing at
/// deserialization the way `channel_crypto::Wei` would.
fn parse_signed_amount(raw: &AmountText) -> Result<BigInt, Reason> {
    let s = &raw.0;
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Reason::InvalidState(format!(
            "{} is not a valid integer amount",
            s
        )));
    }
    BigInt::from_str(s)
        .map_err(|_| Reason::InvalidState(format!("{} is not a valid integer amount", s)))
}

/// `get_state_update_status`: signature validity, latest-by-amount lookup,
/// and dupe classification. Never fails on a malformed or
/// negative amount — those come back as a status with `signature_valid`
/// computed against a zero stand-in digest, so the caller always gets a
/// status object to report even when the update itself will be rejected.
pub async fn get_state_update_status<S: Store, V: SignatureVerifier>(
    store: &S,
    verifier: &V,
    key: &ChannelKey,
    amount: &AmountText,
    signature: &Signature65,
) -> anyhow::Result<StateUpdateStatus> {
    let channel_status = get_channel_status(store, key, true).await?;
    let sender = channel_status.channel.as_ref().and_then(|c| c.sender);

    let signed_amount = parse_signed_amount(amount).ok();
    let non_negative = signed_amount
        .as_ref()
        .and_then(|v| v.to_biguint())
        .map(Wei::from_biguint);

    let digest_amount = non_negative.clone().unwrap_or_else(Wei::zero);
    let signature_valid = match sender {
        Some(sender) => {
            match digest_for_state_update(key.chain_id, &key.contract_id, &key.channel_id, &digest_amount) {
                Ok(digest) => verifier.ecdsa_verify(&sender, &digest, signature.as_bytes()),
                Err(_) => false,
            }
        }
        None => false,
    };

    let latest = store.get_latest_state_update(key).await?;
    let latest_amount_bi = latest
        .as_ref()
        .map(|u| BigInt::from(u.amount.as_biguint().clone()));

    let is_latest = match (&signed_amount, &latest_amount_bi) {
        (Some(amount), Some(latest_amount)) => amount >= latest_amount,
        (Some(_), None) => true,
        (None, _) => false,
    };

    let added_amount = if is_latest {
        match (&non_negative, &latest) {
            (Some(amount), Some(latest)) => amount.checked_sub(&latest.amount),
            (Some(amount), None) => Some(amount.clone()),
            _ => None,
        }
    } else {
        None
    };

    let dupe_status = match &non_negative {
        Some(amount) => match store.get_state_update_by_amount(key, amount).await? {
            Some(_) => DupeStatus::Dupe,
            None => DupeStatus::Distinct,
        },
        None => DupeStatus::Distinct,
    };

    Ok(StateUpdateStatus {
        signature_valid,
        is_latest,
        added_amount,
        dupe_status,
    })
}

/// Success shape of `insert_state_update`.
#[derive(Clone, Debug, serde::Serialize)]
pub struct InsertStateUpdateResult {
    pub id: i64,
    pub created: bool,
    pub status: StateUpdateStatus,
    pub is_latest: bool,
    pub latest_state: Option<StateUpdate>,
    pub added_amount: Option<Wei>,
    pub channel_payment: Option<Wei>,
    pub channel_remaining_balance: Option<Wei>,
}

/// `{error: true, reason, status}`, the quarantine-path error shape.
/// `status` is absent only when the amount could not even be parsed
/// into an integer.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{reason}")]
pub struct AdmissionError {
    pub reason: Reason,
    pub status: Option<StateUpdateStatus>,
}

/// `insert_state_update`. Storage/connectivity failures propagate as
/// `Err` of the outer `anyhow::Result`; business-rule rejections come back
/// as `Ok(Err(AdmissionError))` with the row already written to
/// `invalid_state_updates`.
pub async fn insert_state_update<S: Store, V: SignatureVerifier>(
    store: &S,
    verifier: &V,
    key: &ChannelKey,
    amount: &AmountText,
    signature: &Signature65,
) -> anyhow::Result<Result<InsertStateUpdateResult, AdmissionError>> {
    let _guard = store.lock_channel(key).await?;

    let status = get_state_update_status(store, verifier, key, amount, signature).await?;

    let placeholder = StateUpdate {
        id: None,
        key: key.clone(),
        amount: Wei::zero(),
        ts: Utc::now(),
        signature: signature.clone(),
    };

    if !status.signature_valid {
        store
            .quarantine_state_update(&placeholder, &Reason::SignatureInvalid, Some(&status))
            .await?;
        return Ok(Err(AdmissionError {
            reason: Reason::SignatureInvalid,
            status: Some(status),
        }));
    }

    if status.dupe_status == DupeStatus::Conflict {
        store
            .quarantine_state_update(&placeholder, &Reason::Conflict, Some(&status))
            .await?;
        return Ok(Err(AdmissionError {
            reason: Reason::Conflict,
            status: Some(status),
        }));
    }

    let signed_amount = match parse_signed_amount(amount) {
        Ok(v) => v,
        Err(reason) => {
            store
                .quarantine_state_update(&placeholder, &reason, Some(&status))
                .await?;
            return Ok(Err(AdmissionError {
                reason,
                status: Some(status),
            }));
        }
    };

    if signed_amount.sign() == num_bigint::Sign::Minus {
        store
            .quarantine_state_update(&placeholder, &Reason::NegativeAmount, Some(&status))
            .await?;
        return Ok(Err(AdmissionError {
            reason: Reason::NegativeAmount,
            status: Some(status),
        }));
    }

    let amount_wei = Wei::from_biguint(
        signed_amount
            .to_biguint()
            .expect("sign checked non-negative above"),
    );

    let (id, created) = if status.dupe_status == DupeStatus::Dupe {
        let existing = store
            .get_state_update_by_amount(key, &amount_wei)
            .await?
            .expect("dupe_status=Dupe implies a matching row exists");
        (existing.id.expect("stored rows carry an id"), false)
    } else {
        let update = StateUpdate {
            id: None,
            key: key.clone(),
            amount: amount_wei.clone(),
            ts: Utc::now(),
            signature: signature.clone(),
        };
        match store.insert_state_update(&update).await {
            Ok(true) => {
                let stored = store
                    .get_state_update_by_amount(key, &amount_wei)
                    .await?
                    .expect("just-inserted row is immediately readable");
                (stored.id.expect("stored rows carry an id"), true)
            }
            Ok(false) => {
                let existing = store
                    .get_state_update_by_amount(key, &amount_wei)
                    .await?
                    .expect("insert reported a pre-existing row");
                (existing.id.expect("stored rows carry an id"), false)
            }
            Err(e) => {
                let reason = Reason::InvalidState(e.to_string());
                store
                    .quarantine_state_update(&placeholder, &reason, Some(&status))
                    .await?;
                return Ok(Err(AdmissionError {
                    reason,
                    status: Some(status),
                }));
            }
        }
    };

    let latest_state = store.get_latest_state_update(key).await?;
    let channel_status: ChannelStatus = get_channel_status(store, key, true).await?;
    let channel_payment = latest_state.as_ref().map(|s| s.amount.clone());
    let channel_remaining_balance = match (&channel_status.channel, &latest_state) {
        (Some(channel), Some(state)) => channel.value.checked_sub(&state.amount),
        _ => None,
    };

    Ok(Ok(InsertStateUpdateResult {
        id,
        created,
        is_latest: status.is_latest,
        added_amount: status.added_amount.clone(),
        status,
        latest_state,
        channel_payment,
        channel_remaining_balance,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::types::{ChannelEvent, EventFields};
    use channel_crypto::{AlwaysInvalid, AlwaysValid, Address, Hash32};

    fn key() -> ChannelKey {
        ChannelKey {
            chain_id: 1,
            contract_id: Address::from([0x11; 20]),
            channel_id: Hash32::from([0x22; 32]),
        }
    }

    fn sig() -> Signature65 {
        Signature65::from([0u8; 65])
    }

    async fn seed_open_channel(store: &MemoryStore, sender: Address) {
        store
            .insert_channel_event(ChannelEvent {
                id: None,
                key: key(),
                ts: Utc::now(),
                block_number: 1,
                block_hash: Hash32::from([1; 32]),
                block_is_valid: true,
                sender,
                fields: EventFields::DidCreateChannel {
                    sender,
                    receiver: Address::from([0xbb; 20]),
                    settlement_period: 17,
                    until: 7890,
                    value: Wei::from_str("0").unwrap(),
                },
            })
            .await
            .unwrap();
        store
            .insert_channel_event(ChannelEvent {
                id: None,
                key: key(),
                ts: Utc::now(),
                block_number: 2,
                block_hash: Hash32::from([2; 32]),
                block_is_valid: true,
                sender,
                fields: EventFields::DidDeposit {
                    value: Wei::from_str("500").unwrap(),
                },
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejects_negative_amount() {
        let store = MemoryStore::new();
        let sender = Address::from([0xaa; 20]);
        seed_open_channel(&store, sender).await;

        let result = insert_state_update(
            &store,
            &AlwaysValid,
            &key(),
            &AmountText("-1".to_string()),
            &sig(),
        )
        .await
        .unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.reason, Reason::NegativeAmount);
    }

    #[tokio::test]
    async fn rejects_invalid_signature() {
        let store = MemoryStore::new();
        let sender = Address::from([0xaa; 20]);
        seed_open_channel(&store, sender).await;

        let result = insert_state_update(
            &store,
            &AlwaysInvalid,
            &key(),
            &AmountText("150".to_string()),
            &sig(),
        )
        .await
        .unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.reason, Reason::SignatureInvalid);
    }

    #[tokio::test]
    async fn tracks_latest_and_added_amount() {
        let store = MemoryStore::new();
        let sender = Address::from([0xaa; 20]);
        seed_open_channel(&store, sender).await;

        let first = insert_state_update(
            &store,
            &AlwaysValid,
            &key(),
            &AmountText("2".to_string()),
            &sig(),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(first.status.is_latest);

        let second = insert_state_update(
            &store,
            &AlwaysValid,
            &key(),
            &AmountText("1".to_string()),
            &sig(),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!second.status.is_latest);
    }

    #[tokio::test]
    async fn dupe_insert_is_idempotent() {
        let store = MemoryStore::new();
        let sender = Address::from([0xaa; 20]);
        seed_open_channel(&store, sender).await;

        let first = insert_state_update(
            &store,
            &AlwaysValid,
            &key(),
            &AmountText("150".to_string()),
            &sig(),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(first.created);

        let second = insert_state_update(
            &store,
            &AlwaysValid,
            &key(),
            &AmountText("150".to_string()),
            &sig(),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!second.created);
        assert_eq!(second.id, first.id);
    }
}
