use crate::types::{Channel, ChannelState, EventFields, LedgerEvent};

/// Outcome of folding one event into a channel.
pub struct ApplyResult {
    pub channel: Channel,
    pub is_invalid: bool,
    pub is_invalid_reason: Option<String>,
}

fn state_label(state: Option<ChannelState>) -> String {
    match state {
        Some(s) => s.as_str().to_string(),
        None => "NULL".to_string(),
    }
}

fn precondition_violation(
    channel: &Channel,
    event_type: &'static str,
    expected: &[Option<ChannelState>],
) -> String {
    let expected_str = expected
        .iter()
        .map(|s| state_label(*s))
        .collect::<Vec<_>>()
        .join(" or ");
    format!(
        "invalid channel state for event {}: got {} but should be {}",
        event_type,
        state_label(channel.state),
        expected_str
    )
}

/// Applies a single event to a channel (or seeds a fresh one from `None`),
/// per the transition table. Never panics; preconditions that fail come
/// back as `is_invalid` with a human-readable reason instead.
pub fn apply_internal(channel: Option<Channel>, event: &LedgerEvent) -> ApplyResult {
    let key_source = channel.as_ref();
    let mut channel = channel.unwrap_or_else(|| {
        // seeded lazily below once we know the event's key; placeholder
        // channel is replaced immediately after this closure for the
        // NULL-state case.
        Channel::new(crate::types::ChannelKey {
            chain_id: 0,
            contract_id: event.sender().clone(),
            channel_id: channel_crypto::Hash32::from([0u8; 32]),
        })
    });
    if key_source.is_none() {
        channel.key = match event {
            LedgerEvent::Chain(e) => e.key.clone(),
            LedgerEvent::Intent(i) => i.key.clone(),
        };
    }

    if event.is_intent() {
        channel.state_is_intent = true;
    }

    let fields = event.fields().clone();
    match fields {
        EventFields::DidCreateChannel {
            sender,
            receiver,
            settlement_period,
            until,
            value,
        } => {
            if channel.state.is_some() {
                let reason = precondition_violation(&channel, "DidCreateChannel", &[None]);
                return ApplyResult {
                    channel,
                    is_invalid: true,
                    is_invalid_reason: Some(reason),
                };
            }
            channel.state = Some(ChannelState::Open);
            channel.sender = Some(sender);
            channel.receiver = Some(receiver);
            channel.settlement_period = Some(settlement_period);
            channel.until = Some(until);
            channel.value = value;
            channel.opened_on = Some(event.ts());
        }
        EventFields::DidDeposit { value } => {
            if channel.state != Some(ChannelState::Open) {
                let reason =
                    precondition_violation(&channel, "DidDeposit", &[Some(ChannelState::Open)]);
                return ApplyResult {
                    channel,
                    is_invalid: true,
                    is_invalid_reason: Some(reason),
                };
            }
            channel.value = channel.value.checked_add(&value);
        }
        EventFields::DidStartSettle { payment } => {
            if channel.state != Some(ChannelState::Open) {
                let reason = precondition_violation(
                    &channel,
                    "DidStartSettle",
                    &[Some(ChannelState::Open)],
                );
                return ApplyResult {
                    channel,
                    is_invalid: true,
                    is_invalid_reason: Some(reason),
                };
            }
            channel.state = Some(ChannelState::Settling);
            channel.settlement_started_on = Some(event.ts());
            if let Some(period) = channel.settlement_period {
                channel.until = Some(event.ts().timestamp() + period);
            }
            channel.payment = Some(payment);
        }
        EventFields::DidSettle { payment, odd_value } => {
            if !matches!(
                channel.state,
                Some(ChannelState::Open) | Some(ChannelState::Settling)
            ) {
                let reason = precondition_violation(
                    &channel,
                    "DidSettle",
                    &[Some(ChannelState::Open), Some(ChannelState::Settling)],
                );
                return ApplyResult {
                    channel,
                    is_invalid: true,
                    is_invalid_reason: Some(reason),
                };
            }
            channel.state = Some(ChannelState::Settled);
            channel.settlement_finalized_on = Some(event.ts());
            channel.payment = Some(payment);
            channel.odd_value = Some(odd_value);
        }
    }

    ApplyResult {
        channel,
        is_invalid: false,
        is_invalid_reason: None,
    }
}

/// Result of folding an entire ordered event stream.
pub struct FoldResult {
    pub channel: Option<Channel>,
    pub is_invalid: bool,
    pub is_invalid_reason: Option<String>,
    pub latest_event: Option<LedgerEvent>,
    pub latest_intent_event: Option<LedgerEvent>,
    pub latest_chain_event: Option<LedgerEvent>,
}

/// Folds an already-ordered event stream (see `types::ledger_order`) into a
/// channel snapshot, halting at the first precondition violation. The
/// caller reports the pre-violation snapshot; nothing after the offending
/// event is applied.
pub fn fold_internal(events: &[LedgerEvent]) -> FoldResult {
    let mut channel: Option<Channel> = None;
    let mut latest_event = None;
    let mut latest_intent_event = None;
    let mut latest_chain_event = None;

    for event in events {
        let result = apply_internal(channel.clone(), event);
        if result.is_invalid {
            return FoldResult {
                channel: Some(result.channel),
                is_invalid: true,
                is_invalid_reason: result.is_invalid_reason,
                latest_event,
                latest_intent_event,
                latest_chain_event,
            };
        }
        channel = Some(result.channel);
        latest_event = Some(event.clone());
        match event {
            LedgerEvent::Intent(_) => latest_intent_event = Some(event.clone()),
            LedgerEvent::Chain(_) => latest_chain_event = Some(event.clone()),
        }
    }

    FoldResult {
        channel,
        is_invalid: false,
        is_invalid_reason: None,
        latest_event,
        latest_intent_event,
        latest_chain_event,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use channel_crypto::{Address, Hash32, Wei};
    use chrono::Utc;
    use std::convert::TryFrom;
    use std::str::FromStr;

    fn addr(n: u8) -> Address {
        Address::from([n; 20])
    }

    fn hash(n: u8) -> Hash32 {
        Hash32::from([n; 32])
    }

    fn key() -> crate::types::ChannelKey {
        crate::types::ChannelKey {
            chain_id: 1,
            contract_id: addr(0x11),
            channel_id: hash(0x22),
        }
    }

    fn chain_event(block_number: i64, fields: EventFields) -> LedgerEvent {
        LedgerEvent::Chain(crate::types::ChannelEvent {
            id: None,
            key: key(),
            ts: Utc::now(),
            block_number,
            block_hash: hash(block_number as u8),
            block_is_valid: true,
            sender: addr(0xaa),
            fields,
        })
    }

    #[test]
    fn happy_lifecycle() {
        let events = vec![
            chain_event(
                1,
                EventFields::DidCreateChannel {
                    sender: addr(0xaa),
                    receiver: addr(0xbb),
                    settlement_period: 17,
                    until: 7890,
                    value: Wei::from_str("0").unwrap(),
                },
            ),
            chain_event(
                2,
                EventFields::DidDeposit {
                    value: Wei::from_str("500").unwrap(),
                },
            ),
        ];
        let result = fold_internal(&events);
        assert!(!result.is_invalid);
        let channel = result.channel.unwrap();
        assert_eq!(channel.state, Some(ChannelState::Open));
        assert_eq!(channel.value.to_string(), "500");
    }

    #[test]
    fn double_create_is_logical_invalid() {
        let events = vec![
            chain_event(
                1,
                EventFields::DidCreateChannel {
                    sender: addr(0xaa),
                    receiver: addr(0xbb),
                    settlement_period: 17,
                    until: 7890,
                    value: Wei::from_str("0").unwrap(),
                },
            ),
            chain_event(
                2,
                EventFields::DidCreateChannel {
                    sender: addr(0xcc),
                    receiver: addr(0xdd),
                    settlement_period: 1,
                    until: 1,
                    value: Wei::from_str("0").unwrap(),
                },
            ),
        ];
        let result = fold_internal(&events);
        assert!(result.is_invalid);
        assert_eq!(
            result.is_invalid_reason.unwrap(),
            "invalid channel state for event DidCreateChannel: got CS_OPEN but should be NULL"
        );
    }

    #[test]
    fn deposit_without_create_is_logical_invalid() {
        let events = vec![chain_event(
            1,
            EventFields::DidDeposit {
                value: Wei::from_str("1").unwrap(),
            },
        )];
        let result = fold_internal(&events);
        assert!(result.is_invalid);
        assert_eq!(
            result.is_invalid_reason.unwrap(),
            "invalid channel state for event DidDeposit: got NULL but should be CS_OPEN"
        );
    }
}
