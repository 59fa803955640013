use std::convert::TryFrom;

use channel_crypto::{Hash32, SignatureVerifier};
use chrono::Utc;
use serde::Serialize;

use crate::admission::{self, AdmissionError, InsertStateUpdateResult};
use crate::correlate::recorrelate_intents;
use crate::reason::Reason;
use crate::reorg::{self, ReorgResult};
use crate::status::get_channel_status;
use crate::store::Store;
use crate::types::{ChannelEvent, ChannelIntent, ChannelKey, ChannelStatus, StateUpdate};
use crate::wire::{
    domain_from_crypto_error, ChannelEventInput, ChannelIntentInput, ChannelKeyInput,
    StateUpdateInput,
};

/// `selftest()`'s result shape.
#[derive(Clone, Debug, Serialize)]
pub struct SelfTestResult {
    pub version_info: String,
}

/// The public facade gathering every ledger operation, generic over the
/// storage primitive and the injected signature-verification capability so
/// production wiring and tests differ only in which two types they pick.
pub struct ChannelLedger<S: Store, V: SignatureVerifier> {
    store: S,
    verifier: V,
}

impl<S: Store, V: SignatureVerifier> ChannelLedger<S, V> {
    pub fn new(store: S, verifier: V) -> Self {
        ChannelLedger { store, verifier }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn setup_database(&self) -> anyhow::Result<()> {
        self.store.setup_database().await
    }

    pub fn selftest(&self) -> SelfTestResult {
        SelfTestResult {
            version_info: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub async fn get_state_update_status(
        &self,
        input: StateUpdateInput,
    ) -> anyhow::Result<Result<crate::types::StateUpdateStatus, Reason>> {
        let key = match input.key.clone().validate() {
            Ok(k) => k,
            Err(reason) => return Ok(Err(reason)),
        };
        let signature = match input.validate_signature() {
            Ok(s) => s,
            Err(reason) => return Ok(Err(reason)),
        };
        let status = admission::get_state_update_status(
            &self.store,
            &self.verifier,
            &key,
            &input.amount,
            &signature,
        )
        .await?;
        Ok(Ok(status))
    }

    /// `insert_state_update(u)`. Returns the outer `Result` for
    /// storage failures, the middle `Result` for shape-validation rejections
    /// (never written anywhere), and the inner `Result` for admission
    /// quarantine (written to `invalid_state_updates`).
    pub async fn insert_state_update(
        &self,
        input: StateUpdateInput,
    ) -> anyhow::Result<Result<InsertStateUpdateResult, InsertStateUpdateRejection>> {
        let key = match input.key.clone().validate() {
            Ok(k) => k,
            Err(reason) => return Ok(Err(InsertStateUpdateRejection::Validation(reason))),
        };
        let signature = match input.validate_signature() {
            Ok(s) => s,
            Err(reason) => return Ok(Err(InsertStateUpdateRejection::Validation(reason))),
        };

        match admission::insert_state_update(
            &self.store,
            &self.verifier,
            &key,
            &input.amount,
            &signature,
        )
        .await?
        {
            Ok(result) => Ok(Ok(result)),
            Err(e) => Ok(Err(InsertStateUpdateRejection::Admission(e))),
        }
    }

    pub async fn get_latest_state(
        &self,
        key: ChannelKeyInput,
    ) -> anyhow::Result<Result<Option<StateUpdate>, Reason>> {
        let key = match key.validate() {
            Ok(k) => k,
            Err(reason) => return Ok(Err(reason)),
        };
        Ok(Ok(self.store.get_latest_state_update(&key).await?))
    }

    pub async fn insert_channel_event(
        &self,
        input: ChannelEventInput,
    ) -> anyhow::Result<Result<ChannelStatus, Reason>> {
        let key = match input.key.validate() {
            Ok(k) => k,
            Err(reason) => return Ok(Err(reason)),
        };
        let block_hash = match Hash32::try_from(input.block_hash.as_str()) {
            Ok(h) => h,
            Err(e) => return Ok(Err(Reason::DomainCheckFailed(domain_from_crypto_error(&e)))),
        };
        let sender = match channel_crypto::Address::try_from(input.sender.as_str()) {
            Ok(a) => a,
            Err(e) => return Ok(Err(Reason::DomainCheckFailed(domain_from_crypto_error(&e)))),
        };
        let fields = match input.fields.validate(sender) {
            Ok(f) => f,
            Err(reason) => return Ok(Err(reason)),
        };

        let event = ChannelEvent {
            id: None,
            key: key.clone(),
            ts: Utc::now(),
            block_number: input.block_number,
            block_hash,
            block_is_valid: true,
            sender,
            fields,
        };
        self.store.insert_channel_event(event).await?;
        recorrelate_intents(&self.store, &key).await?;
        Ok(Ok(get_channel_status(&self.store, &key, true).await?))
    }

    pub async fn insert_channel_intent(
        &self,
        input: ChannelIntentInput,
    ) -> anyhow::Result<Result<ChannelStatus, Reason>> {
        let key = match input.key.validate() {
            Ok(k) => k,
            Err(reason) => return Ok(Err(reason)),
        };
        let sender = match channel_crypto::Address::try_from(input.sender.as_str()) {
            Ok(a) => a,
            Err(e) => return Ok(Err(Reason::DomainCheckFailed(domain_from_crypto_error(&e)))),
        };
        let fields = match input.fields.validate(sender) {
            Ok(f) => f,
            Err(reason) => return Ok(Err(reason)),
        };

        let intent = ChannelIntent {
            id: None,
            key: key.clone(),
            ts: Utc::now(),
            block_number: input.block_number,
            block_hash: None,
            sender,
            fields,
        };
        self.store.insert_channel_intent(intent).await?;
        recorrelate_intents(&self.store, &key).await?;
        Ok(Ok(get_channel_status(&self.store, &key, true).await?))
    }

    pub async fn set_recent_blocks(
        &self,
        chain_id: u32,
        first_block_num: i64,
        hashes: &[Hash32],
    ) -> anyhow::Result<ReorgResult> {
        reorg::set_recent_blocks(&self.store, chain_id, first_block_num, hashes).await
    }

    pub async fn get_channel_status(
        &self,
        key: ChannelKeyInput,
        include_intents: bool,
    ) -> anyhow::Result<Result<ChannelStatus, Reason>> {
        let key = match key.validate() {
            Ok(k) => k,
            Err(reason) => return Ok(Err(reason)),
        };
        Ok(Ok(get_channel_status(&self.store, &key, include_intents).await?))
    }

    pub async fn get_channel_events(
        &self,
        key: ChannelKeyInput,
        include_intents: bool,
    ) -> anyhow::Result<Result<Vec<crate::types::LedgerEvent>, Reason>> {
        let key = match key.validate() {
            Ok(k) => k,
            Err(reason) => return Ok(Err(reason)),
        };
        let events = self.store.get_channel_events(&key).await?;
        let mut ledger_events: Vec<crate::types::LedgerEvent> = events
            .into_iter()
            .filter(|e| e.block_is_valid)
            .map(crate::types::LedgerEvent::Chain)
            .collect();
        if include_intents {
            let intents = self.store.get_channel_intents(&key).await?;
            ledger_events.extend(
                intents
                    .into_iter()
                    .filter(|i| i.block_hash.is_none())
                    .map(crate::types::LedgerEvent::Intent),
            );
        }
        ledger_events.sort_by(crate::types::ledger_order);
        Ok(Ok(ledger_events))
    }
}

/// Everything `insert_state_update` can come back as besides success.
#[derive(Clone, Debug, thiserror::Error)]
pub enum InsertStateUpdateRejection {
    #[error("{0}")]
    Validation(Reason),
    #[error(transparent)]
    Admission(#[from] AdmissionError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::wire::AmountText;
    use channel_crypto::AlwaysValid;

    fn ledger() -> ChannelLedger<MemoryStore, AlwaysValid> {
        ChannelLedger::new(MemoryStore::new(), AlwaysValid)
    }

    fn key_input() -> ChannelKeyInput {
        ChannelKeyInput {
            chain_id: Some(1),
            contract_id: Some("11".repeat(20)),
            channel_id: Some("22".repeat(32)),
        }
    }

    fn create_event_input(sender: &str) -> ChannelEventInput {
        ChannelEventInput {
            key: key_input(),
            block_number: 1,
            block_hash: "aa".repeat(32),
            sender: sender.to_string(),
            fields: crate::wire::EventFieldsInput {
                event_type: crate::types::EventType::DidCreateChannel,
                receiver: Some("bb".repeat(20)),
                settlement_period: Some(17),
                until: Some(7890),
                value: Some(AmountText("0".to_string())),
                payment: None,
                odd_value: None,
            },
        }
    }

    #[tokio::test]
    async fn happy_lifecycle_end_to_end() {
        let ledger = ledger();
        let sender = "aa".repeat(20);

        ledger
            .insert_channel_event(create_event_input(&sender))
            .await
            .unwrap()
            .unwrap();

        let deposit = ChannelEventInput {
            key: key_input(),
            block_number: 2,
            block_hash: "bb".repeat(32),
            sender: sender.clone(),
            fields: crate::wire::EventFieldsInput {
                event_type: crate::types::EventType::DidDeposit,
                receiver: None,
                settlement_period: None,
                until: None,
                value: Some(AmountText("500".to_string())),
                payment: None,
                odd_value: None,
            },
        };
        let status = ledger.insert_channel_event(deposit).await.unwrap().unwrap();
        assert_eq!(status.channel.unwrap().value.to_string(), "500");

        let update = StateUpdateInput {
            key: key_input(),
            amount: AmountText("150".to_string()),
            signature: "00".repeat(65),
        };
        let result = ledger.insert_state_update(update).await.unwrap().unwrap();
        assert_eq!(result.channel_payment.unwrap().to_string(), "150");
        assert_eq!(result.channel_remaining_balance.unwrap().to_string(), "350");
    }

    #[tokio::test]
    async fn missing_chain_id_raises_must_not_be_null() {
        let ledger = ledger();
        let key = ChannelKeyInput {
            chain_id: None,
            contract_id: Some("11".repeat(20)),
            channel_id: Some("22".repeat(32)),
        };
        let result = ledger.get_latest_state(key).await.unwrap();
        assert_eq!(
            result.unwrap_err(),
            Reason::MustNotBeNull("chain_id".to_string())
        );
    }

    #[tokio::test]
    async fn double_create_with_different_sender_is_logical_invalid() {
        let ledger = ledger();
        ledger
            .insert_channel_event(create_event_input(&"aa".repeat(20)))
            .await
            .unwrap()
            .unwrap();

        let second = ChannelEventInput {
            key: key_input(),
            block_number: 2,
            block_hash: "cc".repeat(32),
            sender: "dd".repeat(20),
            fields: crate::wire::EventFieldsInput {
                event_type: crate::types::EventType::DidCreateChannel,
                receiver: Some("ee".repeat(20)),
                settlement_period: Some(1),
                until: Some(1),
                value: Some(AmountText("0".to_string())),
                payment: None,
                odd_value: None,
            },
        };
        let status = ledger.insert_channel_event(second).await.unwrap().unwrap();
        assert!(status.is_invalid);
        assert_eq!(
            status.is_invalid_reason.unwrap(),
            "invalid channel state for event DidCreateChannel: got CS_OPEN but should be NULL"
        );
    }

    #[tokio::test]
    async fn intent_promotion_is_order_independent() {
        let ledger = ledger();
        let sender = "aa".repeat(20);

        let intent = ChannelIntentInput {
            key: key_input(),
            block_number: 1,
            sender: sender.clone(),
            fields: crate::wire::EventFieldsInput {
                event_type: crate::types::EventType::DidCreateChannel,
                receiver: Some("bb".repeat(20)),
                settlement_period: Some(17),
                until: Some(7890),
                value: Some(AmountText("0".to_string())),
                payment: None,
                odd_value: None,
            },
        };
        ledger.insert_channel_intent(intent).await.unwrap().unwrap();

        let mut event_input = create_event_input(&sender);
        event_input.block_number = 2;
        ledger.insert_channel_event(event_input).await.unwrap().unwrap();

        let events = ledger
            .get_channel_events(key_input(), true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_intent());
    }
}
