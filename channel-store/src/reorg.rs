use channel_crypto::Hash32;

use crate::store::Store;
use crate::types::{ChannelEvent, ChannelKey, ChannelStatus};

pub struct ReorgResult {
    pub updated_event_count: usize,
    pub updated_channels: Vec<ChannelStatus>,
}

/// Pure core of `set_recent_blocks`: given the chain events already read
/// back from storage for `chain_id` from `first_block_num` onward, returns
/// the `(event_id, new_valid)` pairs whose validity actually changes against
/// the canonical suffix `hashes`, plus the distinct channel keys touched, in
/// first-touched order. An event past the end of `hashes` is always
/// invalidated.
///
/// Factored out so `Store::apply_reorg` implementations can compute the
/// flips without re-deriving this logic per backend.
pub fn compute_flips(
    events: &[ChannelEvent],
    first_block_num: i64,
    hashes: &[Hash32],
) -> (Vec<(i64, bool)>, Vec<ChannelKey>) {
    let mut flips = Vec::new();
    let mut touched_keys: Vec<ChannelKey> = Vec::new();

    for event in events {
        let idx = (event.block_number - first_block_num) as usize;
        let new_valid = hashes.get(idx).map(|h| *h == event.block_hash).unwrap_or(false);
        if new_valid != event.block_is_valid {
            let id = event.id.expect("events read back from storage carry an id");
            flips.push((id, new_valid));
            if !touched_keys.contains(&event.key) {
                touched_keys.push(event.key.clone());
            }
        }
    }

    (flips, touched_keys)
}

/// `set_recent_blocks`: interprets `hashes` as the canonical suffix starting
/// at `first_block_num` on `chain_id`. Flips `block_is_valid` on every
/// stored chain event whose hash disagrees with the asserted list,
/// including events past the end of the list, which are always invalidated.
/// Delegates to `Store::apply_reorg` so the flips, intent recorrelation, and
/// post-flip channel snapshots happen as one atomic unit.
pub async fn set_recent_blocks<S: Store>(
    store: &S,
    chain_id: u32,
    first_block_num: i64,
    hashes: &[Hash32],
) -> anyhow::Result<ReorgResult> {
    store.apply_reorg(chain_id, first_block_num, hashes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::types::{ChannelEvent, EventFields};
    use channel_crypto::{Address, Wei};
    use chrono::Utc;
    use std::str::FromStr;

    fn key() -> ChannelKey {
        ChannelKey {
            chain_id: 1,
            contract_id: Address::from([0x11; 20]),
            channel_id: Hash32::from([0x22; 32]),
        }
    }

    async fn deposit_event(
        store: &MemoryStore,
        block_number: i64,
        block_hash: Hash32,
        value: &str,
    ) {
        store
            .insert_channel_event(ChannelEvent {
                id: None,
                key: key(),
                ts: Utc::now(),
                block_number,
                block_hash,
                block_is_valid: true,
                sender: Address::from([0xaa; 20]),
                fields: EventFields::DidDeposit {
                    value: Wei::from_str(value).unwrap(),
                },
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reorg_flips_orphaned_blocks() {
        let store = MemoryStore::new();
        store
            .insert_channel_event(ChannelEvent {
                id: None,
                key: key(),
                ts: Utc::now(),
                block_number: 1,
                block_hash: Hash32::from([0xa; 32]),
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
        deposit_event(&store, 2, Hash32::from([0xb; 32]), "1").await;
        deposit_event(&store, 3, Hash32::from([0xc; 32]), "2").await;

        let result = set_recent_blocks(
            &store,
            1,
            1,
            &[Hash32::from([0xa; 32]), Hash32::from([0xb; 32])],
        )
        .await
        .unwrap();
        assert_eq!(result.updated_event_count, 1);
        assert_eq!(
            result.updated_channels[0]
                .channel
                .as_ref()
                .unwrap()
                .value
                .to_string(),
            "1"
        );

        let result = set_recent_blocks(
            &store,
            1,
            1,
            &[
                Hash32::from([0xa; 32]),
                Hash32::from([0xff; 32]),
                Hash32::from([0xc; 32]),
            ],
        )
        .await
        .unwrap();
        assert_eq!(result.updated_event_count, 2);
        assert_eq!(
            result.updated_channels[0]
                .channel
                .as_ref()
                .unwrap()
                .value
                .to_string(),
            "2"
        );
    }
}
