//! Channel status query.
//!
//! Composes the event enumeration, the pure fold, and the latest
//! state-update lookup into the status document readers consume.

use rusqlite::Connection;
use serde::Serialize;

use super::events::channel_events_tx;
use super::state_updates::{latest_state_tx, StateUpdateRecord};
use super::{ChannelStore, StoreError};
use crate::events::{ChannelEventRecord, ChannelKey, ChannelKeyDoc};
use crate::reducer::{self, Channel};
use crate::wei::Wei;

/// Aggregate view of one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    /// Derived channel aggregate; null for a never-seen channel.
    pub channel: Option<Channel>,
    /// Latest state update by amount, if any.
    pub latest_state: Option<StateUpdateRecord>,
    /// Amount of the latest state update.
    pub current_payment: Option<Wei>,
    /// `channel.value - current_payment`, when both sides exist.
    pub current_remaining_balance: Option<Wei>,
    /// Last event the fold observed, any source.
    pub latest_event: Option<ChannelEventRecord>,
    /// Last intent event the fold observed.
    pub latest_intent_event: Option<ChannelEventRecord>,
    /// Last chain event the fold observed.
    pub latest_chain_event: Option<ChannelEventRecord>,
    /// True when the fold halted on a precondition violation.
    pub is_invalid: bool,
    /// Violation reason, when invalid.
    pub is_invalid_reason: Option<String>,
}

impl ChannelStore {
    /// Derives the channel's aggregate status from its surviving events and
    /// its latest state update.
    ///
    /// # Errors
    ///
    /// Returns `<field> must not be null` for an incomplete key, and
    /// database errors unchanged.
    pub fn get_channel_status(
        &self,
        key: &ChannelKeyDoc,
        include_intents: bool,
    ) -> Result<ChannelStatus, StoreError> {
        let key = key.validate()?;
        let conn = self.connection().lock().unwrap();
        channel_status_tx(&conn, &key, include_intents)
    }
}

/// Status computation inside the caller's transaction, so reorg and
/// admission report snapshots consistent with their own writes.
pub(crate) fn channel_status_tx(
    conn: &Connection,
    key: &ChannelKey,
    include_intents: bool,
) -> Result<ChannelStatus, StoreError> {
    let events = channel_events_tx(conn, key, include_intents)?;
    let fold = reducer::fold(&events)?;
    let latest_state = latest_state_tx(conn, key)?;

    let current_payment = latest_state.as_ref().map(|state| state.amount.clone());
    let current_remaining_balance = match (&fold.channel, &latest_state) {
        (Some(channel), Some(state)) => Some(&channel.value - &state.amount),
        _ => None,
    };

    Ok(ChannelStatus {
        channel: fold.channel,
        latest_state,
        current_payment,
        current_remaining_balance,
        latest_event: fold.latest_event,
        latest_intent_event: fold.latest_intent_event,
        latest_chain_event: fold.latest_chain_event,
        is_invalid: fold.is_invalid,
        is_invalid_reason: fold.is_invalid_reason,
    })
}
