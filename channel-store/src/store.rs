use async_trait::async_trait;
use channel_crypto::{Hash32, Wei};

use crate::reason::Reason;
use crate::reorg::ReorgResult;
use crate::types::{ChannelEvent, ChannelIntent, ChannelKey, StateUpdate, StateUpdateStatus};

/// Storage primitives the rest of the crate is generic over. `PgStore` backs
/// production; `MemoryStore` backs this crate's own tests and is suitable
/// for embedding in a downstream consumer's tests without a database.
#[async_trait]
pub trait Store: Send + Sync {
    type LockGuard: Send;

    async fn setup_database(&self) -> anyhow::Result<()>;

    /// Per-channel serialization for admission and chain-event writes.
    async fn lock_channel(&self, key: &ChannelKey) -> anyhow::Result<Self::LockGuard>;

    // -- state updates --

    async fn get_state_update_by_amount(
        &self,
        key: &ChannelKey,
        amount: &Wei,
    ) -> anyhow::Result<Option<StateUpdate>>;

    async fn get_latest_state_update(
        &self,
        key: &ChannelKey,
    ) -> anyhow::Result<Option<StateUpdate>>;

    /// Inserts a state update. Returns `Ok(true)` if a new row was written,
    /// `Ok(false)` if an identical row already existed (idempotent dupe).
    async fn insert_state_update(&self, update: &StateUpdate) -> anyhow::Result<bool>;

    async fn quarantine_state_update(
        &self,
        update: &StateUpdate,
        reason: &Reason,
        status: Option<&StateUpdateStatus>,
    ) -> anyhow::Result<()>;

    // -- channel events --

    async fn insert_channel_event(&self, event: ChannelEvent) -> anyhow::Result<ChannelEvent>;

    async fn get_channel_events(&self, key: &ChannelKey) -> anyhow::Result<Vec<ChannelEvent>>;

    async fn events_from_block(
        &self,
        chain_id: u32,
        first_block_num: i64,
    ) -> anyhow::Result<Vec<ChannelEvent>>;

    async fn set_event_validity(&self, id: i64, valid: bool) -> anyhow::Result<()>;

    // -- channel intents --

    async fn insert_channel_intent(&self, intent: ChannelIntent) -> anyhow::Result<ChannelIntent>;

    async fn get_channel_intents(&self, key: &ChannelKey) -> anyhow::Result<Vec<ChannelIntent>>;

    async fn set_intent_block_hash(
        &self,
        id: i64,
        block_hash: Option<Hash32>,
    ) -> anyhow::Result<()>;

    // -- reorg --

    /// Batch-transaction primitive behind `reorg::set_recent_blocks`: flips
    /// `block_is_valid` on every stored chain event on `chain_id` from
    /// `first_block_num` onward whose hash disagrees with `hashes`,
    /// recorrelates intents for every channel touched, and returns each
    /// touched channel's post-flip status — all as one unit, so a
    /// concurrent reader never observes a partially-applied reorg.
    /// `PgStore` runs the whole thing inside one transaction; `MemoryStore`
    /// holds its single write lock for the whole call.
    async fn apply_reorg(
        &self,
        chain_id: u32,
        first_block_num: i64,
        hashes: &[Hash32],
    ) -> anyhow::Result<ReorgResult>;
}
