use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use channel_crypto::Hash32;
use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::correlate::compute_recorrelation;
use crate::reason::Reason;
use crate::reorg::{compute_flips, ReorgResult};
use crate::status::compose_channel_status;
use crate::store::Store;
use crate::types::{ChannelEvent, ChannelIntent, ChannelKey, StateUpdate, StateUpdateStatus};

struct QuarantinedUpdate {
    #[allow(dead_code)]
    update: StateUpdate,
    #[allow(dead_code)]
    reason: Reason,
    #[allow(dead_code)]
    status: Option<StateUpdateStatus>,
}

#[derive(Default)]
struct Ledger {
    next_event_id: i64,
    next_intent_id: i64,
    next_update_id: i64,
    events: Vec<ChannelEvent>,
    intents: Vec<ChannelIntent>,
    updates: Vec<StateUpdate>,
    quarantined: Vec<QuarantinedUpdate>,
}

/// In-process `Store`: a single `RwLock<Ledger>` plus a per-channel
/// `tokio::sync::Mutex` map standing in for `PgStore`'s advisory locks.
/// Deterministic, no I/O, suitable for this crate's own tests and for
/// downstream consumers' tests.
#[derive(Default)]
pub struct MemoryStore {
    ledger: RwLock<Ledger>,
    locks: SyncMutex<HashMap<ChannelKey, Arc<AsyncMutex<()>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &ChannelKey) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type LockGuard = OwnedMutexGuard<()>;

    async fn setup_database(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn lock_channel(&self, key: &ChannelKey) -> anyhow::Result<Self::LockGuard> {
        let mutex = self.lock_for(key);
        Ok(mutex.lock_owned().await)
    }

    async fn get_state_update_by_amount(
        &self,
        key: &ChannelKey,
        amount: &channel_crypto::Wei,
    ) -> anyhow::Result<Option<StateUpdate>> {
        let ledger = self.ledger.read();
        Ok(ledger
            .updates
            .iter()
            .find(|u| &u.key == key && &u.amount == amount)
            .cloned())
    }

    async fn get_latest_state_update(
        &self,
        key: &ChannelKey,
    ) -> anyhow::Result<Option<StateUpdate>> {
        let ledger = self.ledger.read();
        Ok(ledger
            .updates
            .iter()
            .filter(|u| &u.key == key)
            .max_by(|a, b| a.amount.as_biguint().cmp(b.amount.as_biguint()))
            .cloned())
    }

    async fn insert_state_update(&self, update: &StateUpdate) -> anyhow::Result<bool> {
        let mut ledger = self.ledger.write();
        let exists = ledger
            .updates
            .iter()
            .any(|u| u.key == update.key && u.amount == update.amount);
        if exists {
            return Ok(false);
        }
        let id = ledger.next_update_id;
        ledger.next_update_id += 1;
        let mut stored = update.clone();
        stored.id = Some(id);
        ledger.updates.push(stored);
        Ok(true)
    }

    async fn quarantine_state_update(
        &self,
        update: &StateUpdate,
        reason: &Reason,
        status: Option<&StateUpdateStatus>,
    ) -> anyhow::Result<()> {
        let mut ledger = self.ledger.write();
        ledger.quarantined.push(QuarantinedUpdate {
            update: update.clone(),
            reason: reason.clone(),
            status: status.cloned(),
        });
        Ok(())
    }

    async fn insert_channel_event(&self, mut event: ChannelEvent) -> anyhow::Result<ChannelEvent> {
        let mut ledger = self.ledger.write();
        let id = ledger.next_event_id;
        ledger.next_event_id += 1;
        event.id = Some(id);
        ledger.events.push(event.clone());
        Ok(event)
    }

    async fn get_channel_events(&self, key: &ChannelKey) -> anyhow::Result<Vec<ChannelEvent>> {
        let ledger = self.ledger.read();
        Ok(ledger
            .events
            .iter()
            .filter(|e| &e.key == key)
            .cloned()
            .collect())
    }

    async fn events_from_block(
        &self,
        chain_id: u32,
        first_block_num: i64,
    ) -> anyhow::Result<Vec<ChannelEvent>> {
        let ledger = self.ledger.read();
        Ok(ledger
            .events
            .iter()
            .filter(|e| e.key.chain_id == chain_id && e.block_number >= first_block_num)
            .cloned()
            .collect())
    }

    async fn set_event_validity(&self, id: i64, valid: bool) -> anyhow::Result<()> {
        let mut ledger = self.ledger.write();
        if let Some(event) = ledger.events.iter_mut().find(|e| e.id == Some(id)) {
            event.block_is_valid = valid;
        }
        Ok(())
    }

    async fn insert_channel_intent(
        &self,
        mut intent: ChannelIntent,
    ) -> anyhow::Result<ChannelIntent> {
        let mut ledger = self.ledger.write();
        let id = ledger.next_intent_id;
        ledger.next_intent_id += 1;
        intent.id = Some(id);
        ledger.intents.push(intent.clone());
        Ok(intent)
    }

    async fn get_channel_intents(&self, key: &ChannelKey) -> anyhow::Result<Vec<ChannelIntent>> {
        let ledger = self.ledger.read();
        Ok(ledger
            .intents
            .iter()
            .filter(|i| &i.key == key)
            .cloned()
            .collect())
    }

    async fn set_intent_block_hash(
        &self,
        id: i64,
        block_hash: Option<Hash32>,
    ) -> anyhow::Result<()> {
        let mut ledger = self.ledger.write();
        if let Some(intent) = ledger.intents.iter_mut().find(|i| i.id == Some(id)) {
            intent.block_hash = block_hash;
        }
        Ok(())
    }

    /// One write-guard scope for the whole operation: no other call can
    /// observe the event table between the flip loop and the status reads.
    async fn apply_reorg(
        &self,
        chain_id: u32,
        first_block_num: i64,
        hashes: &[Hash32],
    ) -> anyhow::Result<ReorgResult> {
        let mut ledger = self.ledger.write();

        let matching: Vec<ChannelEvent> = ledger
            .events
            .iter()
            .filter(|e| e.key.chain_id == chain_id && e.block_number >= first_block_num)
            .cloned()
            .collect();
        let (flips, touched_keys) = compute_flips(&matching, first_block_num, hashes);

        for (id, new_valid) in &flips {
            if let Some(event) = ledger.events.iter_mut().find(|e| e.id == Some(*id)) {
                event.block_is_valid = *new_valid;
            }
        }

        let mut updated_channels = Vec::with_capacity(touched_keys.len());
        for key in &touched_keys {
            let events: Vec<ChannelEvent> = ledger
                .events
                .iter()
                .filter(|e| &e.key == key)
                .cloned()
                .collect();
            let intents: Vec<ChannelIntent> = ledger
                .intents
                .iter()
                .filter(|i| &i.key == key)
                .cloned()
                .collect();

            for (id, new_hash) in compute_recorrelation(&events, &intents) {
                if let Some(intent) = ledger.intents.iter_mut().find(|i| i.id == Some(id)) {
                    intent.block_hash = new_hash;
                }
            }

            let events: Vec<ChannelEvent> = ledger
                .events
                .iter()
                .filter(|e| &e.key == key)
                .cloned()
                .collect();
            let intents: Vec<ChannelIntent> = ledger
                .intents
                .iter()
                .filter(|i| &i.key == key)
                .cloned()
                .collect();
            let latest_state = ledger
                .updates
                .iter()
                .filter(|u| &u.key == key)
                .max_by(|a, b| a.amount.as_biguint().cmp(b.amount.as_biguint()))
                .cloned();

            updated_channels.push(compose_channel_status(events, intents, latest_state));
        }

        Ok(ReorgResult {
            updated_event_count: flips.len(),
            updated_channels,
        })
    }
}
