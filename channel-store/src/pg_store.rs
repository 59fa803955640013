use std::convert::TryFrom;
use std::str::FromStr;

use async_trait::async_trait;
use channel_crypto::{Address, Hash32, Signature65, Wei};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::{BigDecimal, Json};
use sqlx::{PgPool, Postgres, Row};

use crate::correlate::compute_recorrelation;
use crate::reason::Reason;
use crate::reorg::{compute_flips, ReorgResult};
use crate::status::compose_channel_status;
use crate::store::Store;
use crate::types::{ChannelEvent, ChannelIntent, ChannelKey, StateUpdate, StateUpdateStatus};

/// Production `Store`: `sqlx::PgPool`-backed, with a per-channel
/// `pg_advisory_xact_lock` standing in for row-level locking since the
/// three logs are append-only and have no natural row to lock per channel.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(PgStore { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        PgStore { pool }
    }
}

fn channel_key_advisory_lock_id(key: &ChannelKey) -> i64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() as i64
}

fn wei_to_decimal(amount: &Wei) -> anyhow::Result<BigDecimal> {
    BigDecimal::from_str(&amount.to_string()).map_err(|e| anyhow::anyhow!("amount out of range: {e}"))
}

fn decimal_to_wei(decimal: BigDecimal) -> anyhow::Result<Wei> {
    let (digits, scale) = decimal.as_bigint_and_exponent();
    if scale != 0 {
        anyhow::bail!("stored amount {decimal} is not an integer");
    }
    Wei::from_str(&digits.to_string())
        .map_err(|e| anyhow::anyhow!("stored amount is not a valid wei value: {e}"))
}

fn intent_row_to_intent(key: ChannelKey, row: sqlx::postgres::PgRow) -> anyhow::Result<ChannelIntent> {
    let block_hash: Option<String> = row.try_get("block_hash")?;
    Ok(ChannelIntent {
        id: Some(row.try_get("id")?),
        key,
        ts: row.try_get("ts")?,
        block_number: row.try_get("block_number")?,
        block_hash: block_hash.map(|h| Hash32::try_from(h.as_str())).transpose()?,
        sender: Address::try_from(row.try_get::<String, _>("sender")?.as_str())?,
        fields: serde_json::from_value(row.try_get("fields")?)?,
    })
}

fn event_row_to_event(
    chain_id: i64,
    contract_id: String,
    channel_id: String,
    id: i64,
    ts: DateTime<Utc>,
    block_number: i64,
    block_hash: String,
    block_is_valid: bool,
    sender: String,
    fields: serde_json::Value,
) -> anyhow::Result<ChannelEvent> {
    Ok(ChannelEvent {
        id: Some(id),
        key: ChannelKey {
            chain_id: u32::try_from(chain_id)?,
            contract_id: Address::try_from(contract_id.as_str())?,
            channel_id: Hash32::try_from(channel_id.as_str())?,
        },
        ts,
        block_number,
        block_hash: Hash32::try_from(block_hash.as_str())?,
        block_is_valid,
        sender: Address::try_from(sender.as_str())?,
        fields: serde_json::from_value(fields)?,
    })
}

#[async_trait]
impl Store for PgStore {
    type LockGuard = sqlx::Transaction<'static, Postgres>;

    async fn setup_database(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Takes the lock via `pg_advisory_xact_lock` inside its own
    /// transaction; the lock is released automatically when the guard
    /// drops (the transaction is never committed, only ever rolled back),
    /// so there is no explicit unlock call to forget.
    async fn lock_channel(&self, key: &ChannelKey) -> anyhow::Result<Self::LockGuard> {
        let mut txn = self.pool.begin().await?;
        sqlx::query("select pg_advisory_xact_lock($1)")
            .bind(channel_key_advisory_lock_id(key))
            .execute(&mut txn)
            .await?;
        Ok(txn)
    }

    async fn get_state_update_by_amount(
        &self,
        key: &ChannelKey,
        amount: &Wei,
    ) -> anyhow::Result<Option<StateUpdate>> {
        let row = sqlx::query(
            "select id, amount, ts, signature from state_updates \
             where chain_id = $1 and contract_id = $2 and channel_id = $3 and amount = $4",
        )
        .bind(key.chain_id as i64)
        .bind(key.contract_id.to_hex())
        .bind(key.channel_id.to_hex())
        .bind(wei_to_decimal(amount)?)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(StateUpdate {
                id: Some(row.try_get::<i64, _>("id")?),
                key: key.clone(),
                amount: decimal_to_wei(row.try_get::<BigDecimal, _>("amount")?)?,
                ts: row.try_get("ts")?,
                signature: Signature65::try_from(row.try_get::<String, _>("signature")?.as_str())?,
            })
        })
        .transpose()
    }

    async fn get_latest_state_update(
        &self,
        key: &ChannelKey,
    ) -> anyhow::Result<Option<StateUpdate>> {
        let row = sqlx::query(
            "select id, amount, ts, signature from state_updates \
             where chain_id = $1 and contract_id = $2 and channel_id = $3 \
             order by amount desc limit 1",
        )
        .bind(key.chain_id as i64)
        .bind(key.contract_id.to_hex())
        .bind(key.channel_id.to_hex())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(StateUpdate {
                id: Some(row.try_get::<i64, _>("id")?),
                key: key.clone(),
                amount: decimal_to_wei(row.try_get::<BigDecimal, _>("amount")?)?,
                ts: row.try_get("ts")?,
                signature: Signature65::try_from(row.try_get::<String, _>("signature")?.as_str())?,
            })
        })
        .transpose()
    }

    async fn insert_state_update(&self, update: &StateUpdate) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "insert into state_updates (chain_id, contract_id, channel_id, amount, ts, signature) \
             values ($1, $2, $3, $4, $5, $6) \
             on conflict (chain_id, contract_id, channel_id, amount) do nothing",
        )
        .bind(update.key.chain_id as i64)
        .bind(update.key.contract_id.to_hex())
        .bind(update.key.channel_id.to_hex())
        .bind(wei_to_decimal(&update.amount)?)
        .bind(update.ts)
        .bind(update.signature.to_hex())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn quarantine_state_update(
        &self,
        update: &StateUpdate,
        reason: &Reason,
        status: Option<&StateUpdateStatus>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "insert into invalid_state_updates \
             (chain_id, contract_id, channel_id, amount, signature, ts, reason, status) \
             values ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(update.key.chain_id as i64)
        .bind(update.key.contract_id.to_hex())
        .bind(update.key.channel_id.to_hex())
        .bind(update.amount.to_string())
        .bind(update.signature.to_hex())
        .bind(update.ts)
        .bind(reason.tag())
        .bind(status.map(Json))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_channel_event(&self, mut event: ChannelEvent) -> anyhow::Result<ChannelEvent> {
        let row = sqlx::query(
            "insert into channel_events \
             (chain_id, contract_id, channel_id, ts, block_number, block_hash, block_is_valid, sender, event_type, fields) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             returning id",
        )
        .bind(event.key.chain_id as i64)
        .bind(event.key.contract_id.to_hex())
        .bind(event.key.channel_id.to_hex())
        .bind(event.ts)
        .bind(event.block_number)
        .bind(event.block_hash.to_hex())
        .bind(event.block_is_valid)
        .bind(event.sender.to_hex())
        .bind(event.fields.event_type().as_str())
        .bind(Json(&event.fields))
        .fetch_one(&self.pool)
        .await?;

        event.id = Some(row.try_get("id")?);
        Ok(event)
    }

    async fn get_channel_events(&self, key: &ChannelKey) -> anyhow::Result<Vec<ChannelEvent>> {
        let rows = sqlx::query(
            "select id, ts, block_number, block_hash, block_is_valid, sender, fields \
             from channel_events where chain_id = $1 and contract_id = $2 and channel_id = $3 \
             order by block_number, block_hash nulls first, ts",
        )
        .bind(key.chain_id as i64)
        .bind(key.contract_id.to_hex())
        .bind(key.channel_id.to_hex())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                event_row_to_event(
                    key.chain_id as i64,
                    key.contract_id.to_hex(),
                    key.channel_id.to_hex(),
                    row.try_get("id")?,
                    row.try_get("ts")?,
                    row.try_get("block_number")?,
                    row.try_get("block_hash")?,
                    row.try_get("block_is_valid")?,
                    row.try_get("sender")?,
                    row.try_get("fields")?,
                )
            })
            .collect()
    }

    async fn events_from_block(
        &self,
        chain_id: u32,
        first_block_num: i64,
    ) -> anyhow::Result<Vec<ChannelEvent>> {
        let rows = sqlx::query(
            "select chain_id, contract_id, channel_id, id, ts, block_number, block_hash, \
             block_is_valid, sender, fields from channel_events \
             where chain_id = $1 and block_number >= $2",
        )
        .bind(chain_id as i64)
        .bind(first_block_num)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                event_row_to_event(
                    row.try_get("chain_id")?,
                    row.try_get("contract_id")?,
                    row.try_get("channel_id")?,
                    row.try_get("id")?,
                    row.try_get("ts")?,
                    row.try_get("block_number")?,
                    row.try_get("block_hash")?,
                    row.try_get("block_is_valid")?,
                    row.try_get("sender")?,
                    row.try_get("fields")?,
                )
            })
            .collect()
    }

    async fn set_event_validity(&self, id: i64, valid: bool) -> anyhow::Result<()> {
        sqlx::query("update channel_events set block_is_valid = $1 where id = $2")
            .bind(valid)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_channel_intent(
        &self,
        mut intent: ChannelIntent,
    ) -> anyhow::Result<ChannelIntent> {
        let row = sqlx::query(
            "insert into channel_intents \
             (chain_id, contract_id, channel_id, ts, block_number, block_hash, sender, event_type, fields) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             returning id",
        )
        .bind(intent.key.chain_id as i64)
        .bind(intent.key.contract_id.to_hex())
        .bind(intent.key.channel_id.to_hex())
        .bind(intent.ts)
        .bind(intent.block_number)
        .bind(intent.block_hash.map(|h| h.to_hex()))
        .bind(intent.sender.to_hex())
        .bind(intent.fields.event_type().as_str())
        .bind(Json(&intent.fields))
        .fetch_one(&self.pool)
        .await?;

        intent.id = Some(row.try_get("id")?);
        Ok(intent)
    }

    async fn get_channel_intents(&self, key: &ChannelKey) -> anyhow::Result<Vec<ChannelIntent>> {
        let rows = sqlx::query(
            "select id, ts, block_number, block_hash, sender, fields from channel_intents \
             where chain_id = $1 and contract_id = $2 and channel_id = $3 \
             order by block_number, block_hash nulls first, ts",
        )
        .bind(key.chain_id as i64)
        .bind(key.contract_id.to_hex())
        .bind(key.channel_id.to_hex())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let block_hash: Option<String> = row.try_get("block_hash")?;
                Ok(ChannelIntent {
                    id: Some(row.try_get("id")?),
                    key: key.clone(),
                    ts: row.try_get("ts")?,
                    block_number: row.try_get("block_number")?,
                    block_hash: block_hash
                        .map(|h| Hash32::try_from(h.as_str()))
                        .transpose()?,
                    sender: Address::try_from(row.try_get::<String, _>("sender")?.as_str())?,
                    fields: serde_json::from_value(row.try_get("fields")?)?,
                })
            })
            .collect()
    }

    async fn set_intent_block_hash(
        &self,
        id: i64,
        block_hash: Option<Hash32>,
    ) -> anyhow::Result<()> {
        sqlx::query("update channel_intents set block_hash = $1 where id = $2")
            .bind(block_hash.map(|h| h.to_hex()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Runs the whole operation inside one transaction: the flip loop,
    /// intent recorrelation for every touched channel, and the post-flip
    /// status reads all happen against the same `Transaction`, so no other
    /// connection can observe the reorg until it commits.
    async fn apply_reorg(
        &self,
        chain_id: u32,
        first_block_num: i64,
        hashes: &[Hash32],
    ) -> anyhow::Result<ReorgResult> {
        let mut txn = self.pool.begin().await?;

        let rows = sqlx::query(
            "select chain_id, contract_id, channel_id, id, ts, block_number, block_hash, \
             block_is_valid, sender, fields from channel_events \
             where chain_id = $1 and block_number >= $2",
        )
        .bind(chain_id as i64)
        .bind(first_block_num)
        .fetch_all(&mut txn)
        .await?;
        let events: Vec<ChannelEvent> = rows
            .into_iter()
            .map(|row| {
                event_row_to_event(
                    row.try_get("chain_id")?,
                    row.try_get("contract_id")?,
                    row.try_get("channel_id")?,
                    row.try_get("id")?,
                    row.try_get("ts")?,
                    row.try_get("block_number")?,
                    row.try_get("block_hash")?,
                    row.try_get("block_is_valid")?,
                    row.try_get("sender")?,
                    row.try_get("fields")?,
                )
            })
            .collect::<anyhow::Result<_>>()?;

        let (flips, touched_keys) = compute_flips(&events, first_block_num, hashes);

        for (id, new_valid) in &flips {
            sqlx::query("update channel_events set block_is_valid = $1 where id = $2")
                .bind(new_valid)
                .bind(id)
                .execute(&mut txn)
                .await?;
        }

        let mut updated_channels = Vec::with_capacity(touched_keys.len());
        for key in &touched_keys {
            let event_rows = sqlx::query(
                "select id, ts, block_number, block_hash, block_is_valid, sender, fields \
                 from channel_events where chain_id = $1 and contract_id = $2 and channel_id = $3 \
                 order by block_number, block_hash nulls first, ts",
            )
            .bind(key.chain_id as i64)
            .bind(key.contract_id.to_hex())
            .bind(key.channel_id.to_hex())
            .fetch_all(&mut txn)
            .await?;
            let events_for_key: Vec<ChannelEvent> = event_rows
                .into_iter()
                .map(|row| {
                    event_row_to_event(
                        key.chain_id as i64,
                        key.contract_id.to_hex(),
                        key.channel_id.to_hex(),
                        row.try_get("id")?,
                        row.try_get("ts")?,
                        row.try_get("block_number")?,
                        row.try_get("block_hash")?,
                        row.try_get("block_is_valid")?,
                        row.try_get("sender")?,
                        row.try_get("fields")?,
                    )
                })
                .collect::<anyhow::Result<_>>()?;

            let intent_rows = sqlx::query(
                "select id, ts, block_number, block_hash, sender, fields from channel_intents \
                 where chain_id = $1 and contract_id = $2 and channel_id = $3 \
                 order by block_number, block_hash nulls first, ts",
            )
            .bind(key.chain_id as i64)
            .bind(key.contract_id.to_hex())
            .bind(key.channel_id.to_hex())
            .fetch_all(&mut txn)
            .await?;
            let intents_for_key: Vec<ChannelIntent> = intent_rows
                .into_iter()
                .map(|row| intent_row_to_intent(key.clone(), row))
                .collect::<anyhow::Result<_>>()?;

            for (id, new_hash) in compute_recorrelation(&events_for_key, &intents_for_key) {
                sqlx::query("update channel_intents set block_hash = $1 where id = $2")
                    .bind(new_hash.map(|h| h.to_hex()))
                    .bind(id)
                    .execute(&mut txn)
                    .await?;
            }

            // re-read intents: the loop above may have just changed their
            // block_hash, and the status snapshot must reflect that.
            let intent_rows = sqlx::query(
                "select id, ts, block_number, block_hash, sender, fields from channel_intents \
                 where chain_id = $1 and contract_id = $2 and channel_id = $3 \
                 order by block_number, block_hash nulls first, ts",
            )
            .bind(key.chain_id as i64)
            .bind(key.contract_id.to_hex())
            .bind(key.channel_id.to_hex())
            .fetch_all(&mut txn)
            .await?;
            let intents_for_key: Vec<ChannelIntent> = intent_rows
                .into_iter()
                .map(|row| intent_row_to_intent(key.clone(), row))
                .collect::<anyhow::Result<_>>()?;

            let state_row = sqlx::query(
                "select id, amount, ts, signature from state_updates \
                 where chain_id = $1 and contract_id = $2 and channel_id = $3 \
                 order by amount desc limit 1",
            )
            .bind(key.chain_id as i64)
            .bind(key.contract_id.to_hex())
            .bind(key.channel_id.to_hex())
            .fetch_optional(&mut txn)
            .await?;
            let latest_state = state_row
                .map(|row| {
                    Ok::<_, anyhow::Error>(StateUpdate {
                        id: Some(row.try_get::<i64, _>("id")?),
                        key: key.clone(),
                        amount: decimal_to_wei(row.try_get::<BigDecimal, _>("amount")?)?,
                        ts: row.try_get("ts")?,
                        signature: Signature65::try_from(row.try_get::<String, _>("signature")?.as_str())?,
                    })
                })
                .transpose()?;

            updated_channels.push(compose_channel_status(
                events_for_key,
                intents_for_key,
                latest_state,
            ));
        }

        txn.commit().await?;

        Ok(ReorgResult {
            updated_event_count: flips.len(),
            updated_channels,
        })
    }
}
