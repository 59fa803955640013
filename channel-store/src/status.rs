use crate::reducer::fold_internal;
use crate::store::Store;
use crate::types::{
    ledger_order, ChannelEvent, ChannelIntent, ChannelKey, ChannelStatus, LedgerEvent, StateUpdate,
};

/// Pure core of `get_channel_status`: folds already-fetched events/intents
/// and a latest-state lookup into a `ChannelStatus`. Factored out so
/// `reorg::apply_reorg` can build a channel's post-flip status from data it
/// already holds inside a transaction, instead of re-reading through the
/// `Store` trait's own (separately committed) calls.
pub fn compose_channel_status(
    events: Vec<ChannelEvent>,
    intents: Vec<ChannelIntent>,
    latest_state: Option<StateUpdate>,
) -> ChannelStatus {
    let mut ledger_events: Vec<LedgerEvent> = Vec::new();
    ledger_events.extend(
        events
            .into_iter()
            .filter(|e| e.block_is_valid)
            .map(LedgerEvent::Chain),
    );
    ledger_events.extend(
        intents
            .into_iter()
            .filter(|i| i.block_hash.is_none())
            .map(LedgerEvent::Intent),
    );
    ledger_events.sort_by(ledger_order);

    let fold = fold_internal(&ledger_events);

    let current_payment = latest_state.as_ref().map(|s| s.amount.clone());
    let current_remaining_balance = match (&fold.channel, &latest_state) {
        (Some(channel), Some(state)) => channel.value.checked_sub(&state.amount),
        _ => None,
    };

    ChannelStatus {
        channel: fold.channel,
        latest_state,
        current_payment,
        current_remaining_balance,
        latest_event: fold.latest_event.as_ref().map(Into::into),
        latest_intent_event: fold.latest_intent_event.as_ref().map(Into::into),
        latest_chain_event: fold.latest_chain_event.as_ref().map(Into::into),
        is_invalid: fold.is_invalid,
        is_invalid_reason: fold.is_invalid_reason,
    }
}

/// Composes the reducer with the latest state-update lookup.
pub async fn get_channel_status<S: Store>(
    store: &S,
    key: &ChannelKey,
    include_intents: bool,
) -> anyhow::Result<ChannelStatus> {
    let events = store.get_channel_events(key).await?;
    let intents = if include_intents {
        store.get_channel_intents(key).await?
    } else {
        Vec::new()
    };
    let latest_state = store.get_latest_state_update(key).await?;

    Ok(compose_channel_status(events, intents, latest_state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::types::{ChannelEvent, ChannelIntent, EventFields, EventType};
    use channel_crypto::{Address, Hash32, Wei};
    use chrono::Utc;
    use std::str::FromStr;

    fn key() -> ChannelKey {
        ChannelKey {
            chain_id: 1,
            contract_id: Address::from([0x11; 20]),
            channel_id: Hash32::from([0x22; 32]),
        }
    }

    #[tokio::test]
    async fn settle_intent_reports_intent_state() {
        let store = MemoryStore::new();
        store
            .insert_channel_event(ChannelEvent {
                id: None,
                key: key(),
                ts: Utc::now(),
                block_number: 1,
                block_hash: Hash32::from([1; 32]),
                block_is_valid: true,
                sender: Address::from([0xaa; 20]),
                fields: EventFields::DidCreateChannel {
                    sender: Address::from([0xaa; 20]),
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
                sender: Address::from([0xaa; 20]),
                fields: EventFields::DidDeposit {
                    value: Wei::from_str("500").unwrap(),
                },
            })
            .await
            .unwrap();
        store
            .insert_channel_intent(ChannelIntent {
                id: None,
                key: key(),
                ts: Utc::now(),
                block_number: 3,
                block_hash: None,
                sender: Address::from([0xaa; 20]),
                fields: EventFields::DidStartSettle {
                    payment: Wei::from_str("123").unwrap(),
                },
            })
            .await
            .unwrap();

        let status = get_channel_status(&store, &key(), true).await.unwrap();
        let channel = status.channel.unwrap();
        assert!(channel.state_is_intent);
        assert_eq!(
            status.latest_intent_event.unwrap().event_type,
            EventType::DidStartSettle
        );
        assert_eq!(
            status.latest_chain_event.unwrap().event_type,
            EventType::DidDeposit
        );
    }
}
