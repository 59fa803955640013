use std::convert::TryFrom;

use channel_crypto::{Address, Hash32, Signature65};
use serde::Deserialize;

use crate::reason::Reason;
use crate::types::{ChannelKey, EventFields, EventType};

/// Raw wire text for a wei amount: deserialization only enforces "must be
/// text", never sign or digits — that is content validation and happens
/// during admission so a negative amount can be quarantined with a specific
/// reason instead of failing at the door. Mirrors `channel_crypto::Wei`'s
/// visitor, minus the non-negativity check.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct AmountText(pub String);

impl<'de> Deserialize<'de> for AmountText {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = AmountText;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a decimal string amount")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<AmountText, E> {
                Ok(AmountText(v.to_string()))
            }

            fn visit_u64<E: serde::de::Error>(self, _v: u64) -> Result<AmountText, E> {
                Err(E::custom("amount must be text, not a number"))
            }

            fn visit_i64<E: serde::de::Error>(self, _v: i64) -> Result<AmountText, E> {
                Err(E::custom("amount must be text, not a number"))
            }

            fn visit_f64<E: serde::de::Error>(self, _v: f64) -> Result<AmountText, E> {
                Err(E::custom("amount must be text, not a number"))
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

/// Wire shape of a `(chain_id, contract_id, channel_id)` triple before it has
/// been checked for missing fields and domain violations. Every public
/// operation keyed on a channel takes this, not `ChannelKey` directly, so
/// that a caller's missing/malformed field surfaces the exact wording named
/// in the external-interfaces section instead of a generic deserialize error.
#[derive(Clone, Debug, Deserialize)]
pub struct ChannelKeyInput {
    pub chain_id: Option<u32>,
    pub contract_id: Option<String>,
    pub channel_id: Option<String>,
}

impl ChannelKeyInput {
    pub fn validate(self) -> Result<ChannelKey, Reason> {
        let chain_id = self
            .chain_id
            .ok_or_else(|| Reason::MustNotBeNull("chain_id".to_string()))?;
        let contract_id = self
            .contract_id
            .ok_or_else(|| Reason::MustNotBeNull("contract_id".to_string()))?;
        let channel_id = self
            .channel_id
            .ok_or_else(|| Reason::MustNotBeNull("channel_id".to_string()))?;

        let contract_id = Address::try_from(contract_id.as_str())
            .map_err(|e| Reason::DomainCheckFailed(domain_from_crypto_error(&e)))?;
        let channel_id = Hash32::try_from(channel_id.as_str())
            .map_err(|e| Reason::DomainCheckFailed(domain_from_crypto_error(&e)))?;

        Ok(ChannelKey {
            chain_id,
            contract_id,
            channel_id,
        })
    }
}

impl From<&ChannelKey> for ChannelKeyInput {
    fn from(key: &ChannelKey) -> Self {
        ChannelKeyInput {
            chain_id: Some(key.chain_id),
            contract_id: Some(key.contract_id.to_hex()),
            channel_id: Some(key.channel_id.to_hex()),
        }
    }
}

pub(crate) fn domain_from_crypto_error(e: &channel_crypto::CryptoError) -> String {
    match e {
        channel_crypto::CryptoError::WrongLength(domain) => domain.to_string(),
        other => other.to_string(),
    }
}

/// Wire shape of a chain event or intent's event-type-specific payload,
/// accepting every field as optional so a missing one raises
/// `"<field> must not be null"` instead of a generic parse failure.
///
/// Deliberately has no `sender` field of its own: `ChannelEventInput` and
/// `ChannelIntentInput` flatten this struct alongside their own top-level
/// `sender`, and a second `sender` key here would collide with it under
/// `#[serde(flatten)]` (the outer field wins, leaving this one always
/// `None`). `DidCreateChannel`'s sender is filled in from that top-level
/// field by the caller instead — see `validate`.
#[derive(Clone, Debug, Deserialize)]
pub struct EventFieldsInput {
    pub event_type: EventType,
    pub receiver: Option<String>,
    pub settlement_period: Option<i64>,
    pub until: Option<i64>,
    pub value: Option<AmountText>,
    pub payment: Option<AmountText>,
    pub odd_value: Option<AmountText>,
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, Reason> {
    value.ok_or_else(|| Reason::MustNotBeNull(field.to_string()))
}

fn parse_address(raw: String, _field: &str) -> Result<Address, Reason> {
    Address::try_from(raw.as_str()).map_err(|e| Reason::DomainCheckFailed(domain_from_crypto_error(&e)))
}

fn parse_wei(raw: AmountText, _field: &str) -> Result<channel_crypto::Wei, Reason> {
    raw.0
        .parse()
        .map_err(|_| Reason::DomainCheckFailed("wei".to_string()))
}

impl EventFieldsInput {
    /// `sender` is the already-parsed top-level sender of the enclosing
    /// event/intent, reused here for `DidCreateChannel` rather than read a
    /// second time off the wire (see the struct doc comment).
    pub fn validate(self, sender: Address) -> Result<EventFields, Reason> {
        Ok(match self.event_type {
            EventType::DidCreateChannel => EventFields::DidCreateChannel {
                sender,
                receiver: parse_address(require(self.receiver, "receiver")?, "receiver")?,
                settlement_period: require(self.settlement_period, "settlement_period")?,
                until: require(self.until, "until")?,
                value: parse_wei(require(self.value, "value")?, "value")?,
            },
            EventType::DidDeposit => EventFields::DidDeposit {
                value: parse_wei(require(self.value, "value")?, "value")?,
            },
            EventType::DidStartSettle => EventFields::DidStartSettle {
                payment: parse_wei(require(self.payment, "payment")?, "payment")?,
            },
            EventType::DidSettle => EventFields::DidSettle {
                payment: parse_wei(require(self.payment, "payment")?, "payment")?,
                odd_value: parse_wei(require(self.odd_value, "odd_value")?, "odd_value")?,
            },
        })
    }
}

/// Wire shape of `insert_channel_event`'s argument.
#[derive(Clone, Debug, Deserialize)]
pub struct ChannelEventInput {
    #[serde(flatten)]
    pub key: ChannelKeyInput,
    pub block_number: i64,
    pub block_hash: String,
    pub sender: String,
    #[serde(flatten)]
    pub fields: EventFieldsInput,
}

/// Wire shape of `insert_channel_intent`'s argument: same as
/// `ChannelEventInput` but `block_hash` is absent (the engine fills it in).
#[derive(Clone, Debug, Deserialize)]
pub struct ChannelIntentInput {
    #[serde(flatten)]
    pub key: ChannelKeyInput,
    pub block_number: i64,
    pub sender: String,
    #[serde(flatten)]
    pub fields: EventFieldsInput,
}

/// Wire shape of `insert_state_update`'s argument.
#[derive(Clone, Debug, Deserialize)]
pub struct StateUpdateInput {
    #[serde(flatten)]
    pub key: ChannelKeyInput,
    pub amount: AmountText,
    pub signature: String,
}

impl StateUpdateInput {
    pub fn validate_signature(&self) -> Result<Signature65, Reason> {
        Signature65::try_from(self.signature.as_str())
            .map_err(|e| Reason::DomainCheckFailed(domain_from_crypto_error(&e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_key_input_rejects_missing_chain_id() {
        let input = ChannelKeyInput {
            chain_id: None,
            contract_id: Some("11".repeat(20)),
            channel_id: Some("22".repeat(32)),
        };
        assert_eq!(
            input.validate().unwrap_err(),
            Reason::MustNotBeNull("chain_id".to_string())
        );
    }

    #[test]
    fn channel_key_input_rejects_bad_domain() {
        let input = ChannelKeyInput {
            chain_id: Some(1),
            contract_id: Some("ab".to_string()),
            channel_id: Some("22".repeat(32)),
        };
        let err = input.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "value for domain eth_address violates check constraint"
        );
    }

    #[test]
    fn event_fields_input_rejects_missing_field() {
        let input = EventFieldsInput {
            event_type: EventType::DidDeposit,
            receiver: None,
            settlement_period: None,
            until: None,
            value: None,
            payment: None,
            odd_value: None,
        };
        let sender = Address::try_from(format!("0x{}", "aa".repeat(20)).as_str()).unwrap();
        assert_eq!(
            input.validate(sender).unwrap_err(),
            Reason::MustNotBeNull("value".to_string())
        );
    }

    #[test]
    fn amount_text_rejects_json_number() {
        let err = serde_json::from_str::<AmountText>("123").unwrap_err();
        assert!(err.to_string().contains("must be text"));
    }

    /// The collision this guards against: `ChannelEventInput` flattens
    /// `EventFieldsInput` alongside its own top-level `sender`. Deserializing
    /// straight off the wire's JSON shape (not hand-built in Rust) must still
    /// produce a usable `DidCreateChannel` sender.
    #[test]
    fn channel_event_input_round_trips_create_channel_from_json() {
        let sender_hex = "aa".repeat(20);
        let json = format!(
            r#"{{"chain_id":1,"contract_id":"{contract}","channel_id":"{channel}",
                "block_number":1,"block_hash":"{block_hash}","sender":"{sender}",
                "event_type":"DidCreateChannel","receiver":"{receiver}",
                "settlement_period":17,"until":7890,"value":"0"}}"#,
            contract = "11".repeat(20),
            channel = "22".repeat(32),
            block_hash = "aa".repeat(32),
            sender = sender_hex,
            receiver = "bb".repeat(20),
        );

        let input: ChannelEventInput = serde_json::from_str(&json).unwrap();
        let sender = Address::try_from(input.sender.as_str()).unwrap();
        let fields = input.fields.validate(sender).unwrap();
        match fields {
            EventFields::DidCreateChannel {
                sender: fields_sender,
                ..
            } => assert_eq!(fields_sender.to_hex(), sender_hex),
            other => panic!("expected DidCreateChannel, got {other:?}"),
        }
    }
}
