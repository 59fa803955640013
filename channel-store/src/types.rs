use std::cmp::Ordering;

use channel_crypto::{Address, Hash32, Signature65, Wei};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub chain_id: u32,
    pub contract_id: Address,
    pub channel_id: Hash32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum EventType {
    DidCreateChannel,
    DidDeposit,
    DidStartSettle,
    DidSettle,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DidCreateChannel => "DidCreateChannel",
            EventType::DidDeposit => "DidDeposit",
            EventType::DidStartSettle => "DidStartSettle",
            EventType::DidSettle => "DidSettle",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The event-type-specific payload carried by a chain event or an intent.
/// Equality here is the deep field-equality the correlation engine relies on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EventFields {
    DidCreateChannel {
        sender: Address,
        receiver: Address,
        settlement_period: i64,
        until: i64,
        value: Wei,
    },
    DidDeposit {
        value: Wei,
    },
    DidStartSettle {
        payment: Wei,
    },
    DidSettle {
        payment: Wei,
        odd_value: Wei,
    },
}

impl EventFields {
    pub fn event_type(&self) -> EventType {
        match self {
            EventFields::DidCreateChannel { .. } => EventType::DidCreateChannel,
            EventFields::DidDeposit { .. } => EventType::DidDeposit,
            EventFields::DidStartSettle { .. } => EventType::DidStartSettle,
            EventFields::DidSettle { .. } => EventType::DidSettle,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub id: Option<i64>,
    pub key: ChannelKey,
    pub ts: DateTime<Utc>,
    pub block_number: i64,
    pub block_hash: Hash32,
    pub block_is_valid: bool,
    pub sender: Address,
    pub fields: EventFields,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelIntent {
    pub id: Option<i64>,
    pub key: ChannelKey,
    pub ts: DateTime<Utc>,
    pub block_number: i64,
    pub block_hash: Option<Hash32>,
    pub sender: Address,
    pub fields: EventFields,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub id: Option<i64>,
    pub key: ChannelKey,
    pub amount: Wei,
    pub ts: DateTime<Utc>,
    pub signature: Signature65,
}

/// A uniform view over a chain event or an intent, used wherever the two
/// streams are merged and sorted together under the shared ordering key.
#[derive(Clone, Debug, PartialEq)]
pub enum LedgerEvent {
    Chain(ChannelEvent),
    Intent(ChannelIntent),
}

impl LedgerEvent {
    pub fn block_number(&self) -> i64 {
        match self {
            LedgerEvent::Chain(e) => e.block_number,
            LedgerEvent::Intent(i) => i.block_number,
        }
    }

    pub fn block_hash(&self) -> Option<&Hash32> {
        match self {
            LedgerEvent::Chain(e) => Some(&e.block_hash),
            LedgerEvent::Intent(i) => i.block_hash.as_ref(),
        }
    }

    pub fn ts(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::Chain(e) => e.ts,
            LedgerEvent::Intent(i) => i.ts,
        }
    }

    pub fn sender(&self) -> &Address {
        match self {
            LedgerEvent::Chain(e) => &e.sender,
            LedgerEvent::Intent(i) => &i.sender,
        }
    }

    pub fn fields(&self) -> &EventFields {
        match self {
            LedgerEvent::Chain(e) => &e.fields,
            LedgerEvent::Intent(i) => &i.fields,
        }
    }

    pub fn is_intent(&self) -> bool {
        matches!(self, LedgerEvent::Intent(_))
    }
}

/// Ordering key per the data model: `(block_number, block_hash NULLS FIRST, ts)`.
pub fn ledger_order(a: &LedgerEvent, b: &LedgerEvent) -> Ordering {
    a.block_number()
        .cmp(&b.block_number())
        .then_with(|| match (a.block_hash(), b.block_hash()) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => x.to_hex().cmp(&y.to_hex()),
        })
        .then_with(|| a.ts().cmp(&b.ts()))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChannelState {
    Open,
    Settling,
    Settled,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Open => "CS_OPEN",
            ChannelState::Settling => "CS_SETTLING",
            ChannelState::Settled => "CS_SETTLED",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived, never stored: the output of folding a channel's event stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub key: ChannelKey,
    pub sender: Option<Address>,
    pub receiver: Option<Address>,
    pub value: Wei,
    pub settlement_period: Option<i64>,
    pub until: Option<i64>,
    pub payment: Option<Wei>,
    pub odd_value: Option<Wei>,
    pub state: Option<ChannelState>,
    pub state_is_intent: bool,
    pub opened_on: Option<DateTime<Utc>>,
    pub settlement_started_on: Option<DateTime<Utc>>,
    pub settlement_finalized_on: Option<DateTime<Utc>>,
}

impl Channel {
    pub fn new(key: ChannelKey) -> Self {
        Channel {
            key,
            sender: None,
            receiver: None,
            value: Wei::zero(),
            settlement_period: None,
            until: None,
            payment: None,
            odd_value: None,
            state: None,
            state_is_intent: false,
            opened_on: None,
            settlement_started_on: None,
            settlement_finalized_on: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DupeStatus {
    Dupe,
    Distinct,
    /// Reserved for a future explicit-sequence-number protocol; see the
    /// open question on conflict classification. Never produced today.
    Conflict,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateUpdateStatus {
    pub signature_valid: bool,
    pub is_latest: bool,
    pub added_amount: Option<Wei>,
    pub dupe_status: DupeStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub channel: Option<Channel>,
    pub latest_state: Option<StateUpdate>,
    pub current_payment: Option<Wei>,
    pub current_remaining_balance: Option<Wei>,
    pub latest_event: Option<LedgerEventView>,
    pub latest_intent_event: Option<LedgerEventView>,
    pub latest_chain_event: Option<LedgerEventView>,
    pub is_invalid: bool,
    pub is_invalid_reason: Option<String>,
}

/// A `serde`-friendly summary of a `LedgerEvent`, used only on output;
/// `LedgerEvent` itself is not serialized because it borrows nothing but
/// does carry two different id spaces that do not need to round-trip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEventView {
    pub is_intent: bool,
    pub event_type: EventType,
    pub block_number: i64,
    pub block_hash: Option<String>,
    pub ts: DateTime<Utc>,
}

impl From<&LedgerEvent> for LedgerEventView {
    fn from(e: &LedgerEvent) -> Self {
        LedgerEventView {
            is_intent: e.is_intent(),
            event_type: e.fields().event_type(),
            block_number: e.block_number(),
            block_hash: e.block_hash().map(|h| h.to_hex()),
            ts: e.ts(),
        }
    }
}
