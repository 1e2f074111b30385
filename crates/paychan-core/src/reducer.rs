//! Pure channel fold.
//!
//! Folds an ordered event stream into the derived channel aggregate. The
//! fold is deterministic over the canonically-sorted stream: feeding the
//! same multiset of events in any insertion order yields the same aggregate
//! once all are present.
//!
//! Each event kind carries a precondition on the channel state. A violated
//! precondition does not fail the fold as an error: it marks the aggregate
//! invalid with a reason, keeps the pre-violation snapshot, and stops
//! consuming events. Later reorgs may remove the offending event, at which
//! point the aggregate heals on the next read.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::domain::{ChannelId, DomainError, EthAddress};
use crate::events::{ChannelEventRecord, EventKind, EventPayload, EventSource};
use crate::wei::Wei;

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    /// Accepting deposits and payments.
    #[serde(rename = "OPEN")]
    Open,
    /// Settlement countdown running.
    #[serde(rename = "SETTLING")]
    Settling,
    /// Settlement finalized.
    #[serde(rename = "SETTLED")]
    Settled,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "CS_OPEN",
            Self::Settling => "CS_SETTLING",
            Self::Settled => "CS_SETTLED",
        })
    }
}

/// The derived channel aggregate. Never stored; recomputed on demand from
/// the surviving events in canonical order.
#[derive(Debug, Clone, Serialize)]
pub struct Channel {
    /// Chain the broker contract lives on.
    pub chain_id: u32,
    /// Broker contract address.
    pub contract_id: EthAddress,
    /// Channel identifier.
    pub channel_id: ChannelId,
    /// Paying side.
    pub sender: EthAddress,
    /// Receiving side.
    pub receiver: EthAddress,
    /// Cumulative deposited value in wei.
    pub value: Wei,
    /// Settlement period in seconds.
    pub settlement_period: u64,
    /// Expiry, Unix epoch seconds.
    pub until: f64,
    /// Payment claimed at settlement, when settlement has begun.
    pub payment: Option<Wei>,
    /// Remainder returned to the sender, once settled.
    pub odd_value: Option<Wei>,
    /// Lifecycle state.
    pub state: ChannelState,
    /// True once any consumed event was an uncorrelated intent; sticky.
    pub state_is_intent: bool,
    /// Timestamp of the create event.
    pub opened_on: f64,
    /// Timestamp of the settlement start, if any.
    pub settlement_started_on: Option<f64>,
    /// Timestamp of the settlement finalization, if any.
    pub settlement_finalized_on: Option<f64>,
}

/// Why a single `apply` step refused an event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// The event's precondition on the channel state was violated.
    #[error("invalid channel state for event {event_type}: got {got} but should be {expected}")]
    InvalidState {
        /// Offending event kind name.
        event_type: &'static str,
        /// Actual state (`CS_*`), or `NULL` for an absent channel.
        got: String,
        /// Required state(s).
        expected: &'static str,
    },

    /// The payload was malformed (missing field, bad domain). These are
    /// hard errors: they should have been rejected at insertion.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

fn state_name(channel: Option<&Channel>) -> String {
    channel.map_or_else(|| "NULL".to_string(), |c| c.state.to_string())
}

/// Applies one event to the channel aggregate.
///
/// # Errors
///
/// Returns [`ApplyError::InvalidState`] on a precondition violation and
/// [`ApplyError::Domain`] on a malformed payload.
pub fn apply(channel: Option<Channel>, event: &ChannelEventRecord) -> Result<Channel, ApplyError> {
    let payload = EventPayload::from_value(event.event_type, &event.fields)?;
    match payload {
        EventPayload::CreateChannel(create) => {
            if channel.is_some() {
                return Err(ApplyError::InvalidState {
                    event_type: EventKind::DidCreateChannel.as_str(),
                    got: state_name(channel.as_ref()),
                    expected: "NULL",
                });
            }
            Ok(Channel {
                chain_id: event.key.chain_id,
                contract_id: event.key.contract_id.clone(),
                channel_id: event.key.channel_id.clone(),
                sender: create.sender,
                receiver: create.receiver,
                value: create.value,
                settlement_period: create.settlement_period,
                until: create.until,
                payment: None,
                odd_value: None,
                state: ChannelState::Open,
                state_is_intent: false,
                opened_on: event.ts,
                settlement_started_on: None,
                settlement_finalized_on: None,
            })
        }
        EventPayload::Deposit(deposit) => {
            let mut ch = match channel {
                Some(ch) if ch.state == ChannelState::Open => ch,
                other => {
                    return Err(ApplyError::InvalidState {
                        event_type: EventKind::DidDeposit.as_str(),
                        got: state_name(other.as_ref()),
                        expected: "CS_OPEN",
                    })
                }
            };
            ch.value = &ch.value + &deposit.value;
            Ok(ch)
        }
        EventPayload::StartSettle(start) => {
            let mut ch = match channel {
                Some(ch) if ch.state == ChannelState::Open => ch,
                other => {
                    return Err(ApplyError::InvalidState {
                        event_type: EventKind::DidStartSettle.as_str(),
                        got: state_name(other.as_ref()),
                        expected: "CS_OPEN",
                    })
                }
            };
            ch.state = ChannelState::Settling;
            ch.settlement_started_on = Some(event.ts);
            #[allow(clippy::cast_precision_loss)]
            {
                ch.until = event.ts + ch.settlement_period as f64;
            }
            ch.payment = Some(start.payment);
            Ok(ch)
        }
        EventPayload::Settle(settle) => {
            let mut ch = match channel {
                Some(ch)
                    if ch.state == ChannelState::Open || ch.state == ChannelState::Settling =>
                {
                    ch
                }
                other => {
                    return Err(ApplyError::InvalidState {
                        event_type: EventKind::DidSettle.as_str(),
                        got: state_name(other.as_ref()),
                        expected: "CS_OPEN or CS_SETTLING",
                    })
                }
            };
            ch.state = ChannelState::Settled;
            ch.settlement_finalized_on = Some(event.ts);
            ch.payment = Some(settle.payment);
            ch.odd_value = Some(settle.odd_value);
            Ok(ch)
        }
    }
}

/// Result of folding an event stream.
#[derive(Debug, Clone, Default)]
pub struct ChannelFold {
    /// The aggregate, or `None` for a never-created channel (or a stream
    /// that violated on its first event).
    pub channel: Option<Channel>,
    /// True when the fold halted on a precondition violation.
    pub is_invalid: bool,
    /// Human-readable violation reason.
    pub is_invalid_reason: Option<String>,
    /// Last event observed before the fold stopped, any source.
    pub latest_event: Option<ChannelEventRecord>,
    /// Last intent event observed before the fold stopped.
    pub latest_intent_event: Option<ChannelEventRecord>,
    /// Last chain event observed before the fold stopped.
    pub latest_chain_event: Option<ChannelEventRecord>,
}

/// Folds canonically-ordered events into a [`ChannelFold`].
///
/// On a precondition violation the offending event still counts as observed
/// for the `latest_*` trackers, but it is not applied and nothing after it
/// is processed.
///
/// # Errors
///
/// Returns [`DomainError`] when a stored payload is malformed; precondition
/// violations are reported in-band, not as errors.
pub fn fold(events: &[ChannelEventRecord]) -> Result<ChannelFold, DomainError> {
    let mut out = ChannelFold::default();
    let mut channel: Option<Channel> = None;

    for event in events {
        out.latest_event = Some(event.clone());
        match event.source {
            EventSource::Intent => out.latest_intent_event = Some(event.clone()),
            EventSource::Chain => out.latest_chain_event = Some(event.clone()),
        }

        match apply(channel.clone(), event) {
            Ok(mut next) => {
                next.state_is_intent |= event.block_hash.is_none();
                channel = Some(next);
            }
            Err(err @ ApplyError::InvalidState { .. }) => {
                out.channel = channel;
                out.is_invalid = true;
                out.is_invalid_reason = Some(err.to_string());
                return Ok(out);
            }
            Err(ApplyError::Domain(err)) => return Err(err),
        }
    }

    out.channel = channel;
    Ok(out)
}
