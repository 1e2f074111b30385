//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use paychan_core::{
    AcceptAllVerifier, ChannelEventDoc, ChannelIntentDoc, ChannelKeyDoc, ChannelStore,
    StateUpdateDoc, Wei,
};
use serde_json::{json, Value};

pub const CONTRACT: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const SENDER: &str = "cccccccccccccccccccccccccccccccccccccccc";
pub const RECEIVER: &str = "dddddddddddddddddddddddddddddddddddddddd";

pub fn channel_id() -> String {
    "b".repeat(64)
}

pub fn block_hash(tag: char) -> String {
    tag.to_string().repeat(64)
}

pub fn store() -> ChannelStore {
    ChannelStore::in_memory(Arc::new(AcceptAllVerifier)).expect("failed to open store")
}

pub fn key_doc() -> ChannelKeyDoc {
    ChannelKeyDoc::new(1, CONTRACT, &channel_id())
}

pub fn event_doc(
    block_number: u64,
    hash: &str,
    ts: f64,
    event_type: &str,
    fields: Value,
) -> ChannelEventDoc {
    ChannelEventDoc {
        chain_id: Some(1),
        contract_id: Some(CONTRACT.to_string()),
        channel_id: Some(channel_id()),
        ts: Some(ts),
        block_number: Some(block_number),
        block_hash: Some(hash.to_string()),
        sender: Some(SENDER.to_string()),
        event_type: Some(event_type.to_string()),
        fields: Some(fields),
    }
}

pub fn intent_doc(block_number: u64, event_type: &str, fields: Value) -> ChannelIntentDoc {
    ChannelIntentDoc {
        chain_id: Some(1),
        contract_id: Some(CONTRACT.to_string()),
        channel_id: Some(channel_id()),
        block_number: Some(block_number),
        sender: Some(SENDER.to_string()),
        event_type: Some(event_type.to_string()),
        fields: Some(fields),
    }
}

pub fn update_doc(amount: &str) -> StateUpdateDoc {
    StateUpdateDoc {
        chain_id: Some(1),
        contract_id: Some(CONTRACT.to_string()),
        channel_id: Some(channel_id()),
        ts: Some(1000.0),
        amount: Some(Wei::new(amount).expect("failed to parse wei")),
        signature: Some("0".repeat(130)),
        sender: Some(SENDER.to_string()),
    }
}

pub fn create_fields() -> Value {
    json!({
        "sender": SENDER,
        "receiver": RECEIVER,
        "settlement_period": 17,
        "until": 7890,
        "value": "0",
    })
}

pub fn deposit_fields(value: &str) -> Value {
    json!({ "value": value })
}
