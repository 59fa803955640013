use channel_crypto::Hash32;

use crate::store::Store;
use crate::types::{ChannelEvent, ChannelIntent, ChannelKey};

/// Pure core of the intent/observation invariant: for each intent, the hash
/// of the most-recently-inserted valid chain event that matches it on
/// `sender`/`fields` with `block_number >= intent.block_number`, or `None`
/// if no such event exists. Returns only the intents whose `(id, new_hash)`
/// differs from what they already carry, so a caller can apply exactly the
/// writes that are needed.
///
/// Factored out of `recorrelate_intents` so `reorg::apply_reorg` can run it
/// against events/intents already fetched inside a transaction, instead of
/// re-reading through the `Store` trait's own (separately committed) calls.
pub fn compute_recorrelation(
    events: &[ChannelEvent],
    intents: &[ChannelIntent],
) -> Vec<(i64, Option<Hash32>)> {
    intents
        .iter()
        .filter_map(|intent| {
            let matching = events
                .iter()
                .filter(|e| {
                    e.block_is_valid
                        && e.block_number >= intent.block_number
                        && e.sender == intent.sender
                        && e.fields == intent.fields
                })
                // "most recently inserted" == highest assigned id, since ids
                // are handed out monotonically on insert.
                .max_by_key(|e| e.id.unwrap_or(i64::MIN));

            let new_hash = matching.map(|e| e.block_hash);
            if new_hash != intent.block_hash {
                intent.id.map(|id| (id, new_hash))
            } else {
                None
            }
        })
        .collect()
}

/// Re-establishes the intent/observation invariant for every intent on
/// `key`. Called after every insert, update, or delete of a chain event
/// touching this channel — the three triggers named in the design.
pub async fn recorrelate_intents<S: Store>(store: &S, key: &ChannelKey) -> anyhow::Result<()> {
    let events = store.get_channel_events(key).await?;
    let intents = store.get_channel_intents(key).await?;

    for (id, new_hash) in compute_recorrelation(&events, &intents) {
        store.set_intent_block_hash(id, new_hash).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::types::{ChannelEvent, ChannelIntent, EventFields};
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

    fn create_fields() -> EventFields {
        EventFields::DidCreateChannel {
            sender: Address::from([0xaa; 20]),
            receiver: Address::from([0xbb; 20]),
            settlement_period: 17,
            until: 7890,
            value: Wei::from_str("0").unwrap(),
        }
    }

    #[tokio::test]
    async fn intent_promotes_when_matching_event_arrives() {
        let store = MemoryStore::new();
        let intent = store
            .insert_channel_intent(ChannelIntent {
                id: None,
                key: key(),
                ts: Utc::now(),
                block_number: 1,
                block_hash: None,
                sender: Address::from([0xaa; 20]),
                fields: create_fields(),
            })
            .await
            .unwrap();
        assert!(intent.block_hash.is_none());

        let event = store
            .insert_channel_event(ChannelEvent {
                id: None,
                key: key(),
                ts: Utc::now(),
                block_number: 2,
                block_hash: Hash32::from([0x33; 32]),
                block_is_valid: true,
                sender: Address::from([0xaa; 20]),
                fields: create_fields(),
            })
            .await
            .unwrap();

        recorrelate_intents(&store, &key()).await.unwrap();

        let intents = store.get_channel_intents(&key()).await.unwrap();
        assert_eq!(intents[0].block_hash, Some(event.block_hash));
    }

    #[tokio::test]
    async fn intent_tracks_surviving_event_after_reorg() {
        let store = MemoryStore::new();
        store
            .insert_channel_intent(ChannelIntent {
                id: None,
                key: key(),
                ts: Utc::now(),
                block_number: 1,
                block_hash: None,
                sender: Address::from([0xaa; 20]),
                fields: create_fields(),
            })
            .await
            .unwrap();

        let first = store
            .insert_channel_event(ChannelEvent {
                id: None,
                key: key(),
                ts: Utc::now(),
                block_number: 2,
                block_hash: Hash32::from([0x33; 32]),
                block_is_valid: true,
                sender: Address::from([0xaa; 20]),
                fields: create_fields(),
            })
            .await
            .unwrap();
        recorrelate_intents(&store, &key()).await.unwrap();

        // reorg: first event becomes invalid, a new one at the same block
        // takes its place.
        store
            .set_event_validity(first.id.unwrap(), false)
            .await
            .unwrap();
        let second = store
            .insert_channel_event(ChannelEvent {
                id: None,
                key: key(),
                ts: Utc::now(),
                block_number: 2,
                block_hash: Hash32::from([0x44; 32]),
                block_is_valid: true,
                sender: Address::from([0xaa; 20]),
                fields: create_fields(),
            })
            .await
            .unwrap();
        recorrelate_intents(&store, &key()).await.unwrap();

        let intents = store.get_channel_intents(&key()).await.unwrap();
        assert_eq!(intents[0].block_hash, Some(second.block_hash));
    }
}
