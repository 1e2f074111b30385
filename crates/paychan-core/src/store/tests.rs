//! Tests for the storage layer.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::crypto::AcceptAllVerifier;
use crate::events::{
    ChannelEventDoc, ChannelIntentDoc, ChannelKeyDoc, EventKind, EventSource, StateUpdateDoc,
};

fn contract() -> String {
    "a".repeat(40)
}

fn channel() -> String {
    "b".repeat(64)
}

fn sender() -> String {
    "c".repeat(40)
}

fn block_hash(tag: char) -> String {
    tag.to_string().repeat(64)
}

fn store() -> ChannelStore {
    ChannelStore::in_memory(Arc::new(AcceptAllVerifier)).expect("failed to open store")
}

fn key_doc() -> ChannelKeyDoc {
    ChannelKeyDoc::new(1, &contract(), &channel())
}

fn event_doc(
    block_number: u64,
    hash: &str,
    ts: f64,
    event_type: &str,
    fields: serde_json::Value,
) -> ChannelEventDoc {
    ChannelEventDoc {
        chain_id: Some(1),
        contract_id: Some(contract()),
        channel_id: Some(channel()),
        ts: Some(ts),
        block_number: Some(block_number),
        block_hash: Some(hash.to_string()),
        sender: Some(sender()),
        event_type: Some(event_type.to_string()),
        fields: Some(fields),
    }
}

fn intent_doc(block_number: u64, event_type: &str, fields: serde_json::Value) -> ChannelIntentDoc {
    ChannelIntentDoc {
        chain_id: Some(1),
        contract_id: Some(contract()),
        channel_id: Some(channel()),
        block_number: Some(block_number),
        sender: Some(sender()),
        event_type: Some(event_type.to_string()),
        fields: Some(fields),
    }
}

fn update_doc(amount: &str) -> StateUpdateDoc {
    StateUpdateDoc {
        chain_id: Some(1),
        contract_id: Some(contract()),
        channel_id: Some(channel()),
        ts: Some(100.0),
        amount: Some(crate::wei::Wei::new(amount).expect("failed to parse wei")),
        signature: Some("0".repeat(130)),
        sender: Some(sender()),
    }
}

fn create_fields() -> serde_json::Value {
    json!({
        "sender": sender(),
        "receiver": "d".repeat(40),
        "settlement_period": 17,
        "until": 7890,
        "value": "0",
    })
}

#[test]
fn test_open_on_disk_and_setup_is_idempotent() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("channels.db");
    let store =
        ChannelStore::open(&path, Arc::new(AcceptAllVerifier)).expect("failed to open store");
    store.setup_database().expect("first setup failed");
    store.setup_database().expect("second setup failed");
}

#[test]
fn test_selftest_reports_versions() {
    let info = store().selftest().expect("selftest failed");
    assert_eq!(info.package, "paychan-core");
    assert!(!info.version.is_empty());
    assert!(!info.sqlite_version.is_empty());
}

#[test]
fn test_stats_counts_rows() {
    let store = store();
    store
        .insert_channel_event(&event_doc(
            1,
            &block_hash('e'),
            10.0,
            "DidCreateChannel",
            create_fields(),
        ))
        .expect("failed to insert event");
    store
        .insert_state_update(&update_doc("5"))
        .expect("failed to insert update");

    let stats = store.stats().expect("failed to get stats");
    assert_eq!(stats.channel_event_count, 1);
    assert_eq!(stats.state_update_count, 1);
    assert_eq!(stats.channel_intent_count, 0);
    assert_eq!(stats.invalid_state_update_count, 0);
}

#[test]
fn test_event_insert_returns_status() {
    let store = store();
    let status = store
        .insert_channel_event(&event_doc(
            1,
            &block_hash('e'),
            10.0,
            "DidCreateChannel",
            create_fields(),
        ))
        .expect("failed to insert event");
    let ch = status.channel.expect("channel missing");
    assert_eq!(ch.state.to_string(), "CS_OPEN");
    assert_eq!(ch.settlement_period, 17);
}

#[test]
fn test_get_channel_events_ordering() {
    let store = store();
    // Inserted out of block order; enumeration must sort canonically.
    store
        .insert_channel_event(&event_doc(
            2,
            &block_hash('f'),
            20.0,
            "DidDeposit",
            json!({"value": "1"}),
        ))
        .expect("failed to insert deposit");
    store
        .insert_channel_event(&event_doc(
            1,
            &block_hash('e'),
            10.0,
            "DidCreateChannel",
            create_fields(),
        ))
        .expect("failed to insert create");
    store
        .insert_channel_intent(&intent_doc(2, "DidStartSettle", json!({"payment": "1"})))
        .expect("failed to insert intent");

    let events = store
        .get_channel_events(&key_doc(), true)
        .expect("failed to enumerate");
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].event_type, EventKind::DidCreateChannel);
    // The intent's null hash sorts before the chain event at block 2.
    assert_eq!(events[1].source, EventSource::Intent);
    assert_eq!(events[2].event_type, EventKind::DidDeposit);

    let chain_only = store
        .get_channel_events(&key_doc(), false)
        .expect("failed to enumerate");
    assert_eq!(chain_only.len(), 2);
}

#[test]
fn test_intent_correlates_against_existing_event() {
    let store = store();
    store
        .insert_channel_event(&event_doc(
            2,
            &block_hash('e'),
            10.0,
            "DidCreateChannel",
            create_fields(),
        ))
        .expect("failed to insert event");
    store
        .insert_channel_intent(&intent_doc(1, "DidCreateChannel", create_fields()))
        .expect("failed to insert intent");

    // The intent bound to the chain event, so the merged stream has one row.
    let events = store
        .get_channel_events(&key_doc(), true)
        .expect("failed to enumerate");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, EventSource::Chain);
}

#[test]
fn test_event_correlates_pending_intent() {
    let store = store();
    store
        .insert_channel_intent(&intent_doc(1, "DidCreateChannel", create_fields()))
        .expect("failed to insert intent");
    store
        .insert_channel_event(&event_doc(
            2,
            &block_hash('e'),
            10.0,
            "DidCreateChannel",
            create_fields(),
        ))
        .expect("failed to insert event");

    let events = store
        .get_channel_events(&key_doc(), true)
        .expect("failed to enumerate");
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].block_hash.as_ref().map(|h| h.as_hex().to_string()),
        Some(block_hash('e'))
    );
}

#[test]
fn test_intent_with_different_fields_stays_pending() {
    let store = store();
    store
        .insert_channel_intent(&intent_doc(1, "DidDeposit", json!({"value": "5"})))
        .expect("failed to insert intent");
    store
        .insert_channel_event(&event_doc(
            2,
            &block_hash('e'),
            10.0,
            "DidDeposit",
            json!({"value": "6"}),
        ))
        .expect("failed to insert event");

    let events = store
        .get_channel_events(&key_doc(), true)
        .expect("failed to enumerate");
    // Payloads differ, so both rows survive: the intent is still pending.
    assert_eq!(events.len(), 2);
    assert!(events.iter().any(|e| e.source == EventSource::Intent));
}

#[test]
fn test_reorg_flips_validity_and_counts() {
    let store = store();
    store
        .insert_channel_event(&event_doc(
            1,
            &block_hash('a'),
            10.0,
            "DidCreateChannel",
            create_fields(),
        ))
        .expect("insert create");
    store
        .insert_channel_event(&event_doc(
            2,
            &block_hash('b'),
            20.0,
            "DidDeposit",
            json!({"value": "1"}),
        ))
        .expect("insert deposit");

    // Asserting only block 1 orphans the deposit at block 2.
    let outcome = store
        .set_recent_blocks(1, 1, &[block_hash('a')])
        .expect("failed to set recent blocks");
    assert_eq!(outcome.updated_event_count, 1);
    assert_eq!(outcome.updated_channels.len(), 1);
    let ch = outcome.updated_channels[0]
        .channel
        .as_ref()
        .expect("channel missing");
    assert_eq!(ch.value, crate::wei::Wei::zero());

    // Re-asserting the original suffix restores it.
    let outcome = store
        .set_recent_blocks(1, 1, &[block_hash('a'), block_hash('b')])
        .expect("failed to set recent blocks");
    assert_eq!(outcome.updated_event_count, 1);
    let ch = outcome.updated_channels[0]
        .channel
        .as_ref()
        .expect("channel missing");
    assert_eq!(ch.value, crate::wei::Wei::from(1));
}

#[test]
fn test_reorg_ignores_blocks_below_first() {
    let store = store();
    store
        .insert_channel_event(&event_doc(
            1,
            &block_hash('a'),
            10.0,
            "DidCreateChannel",
            create_fields(),
        ))
        .expect("insert create");

    let outcome = store
        .set_recent_blocks(1, 5, &[block_hash('f')])
        .expect("failed to set recent blocks");
    assert_eq!(outcome.updated_event_count, 0);
    assert!(outcome.updated_channels.is_empty());
}

#[test]
fn test_reorg_other_chain_untouched() {
    let store = store();
    store
        .insert_channel_event(&event_doc(
            1,
            &block_hash('a'),
            10.0,
            "DidCreateChannel",
            create_fields(),
        ))
        .expect("insert create");

    let outcome = store
        .set_recent_blocks(2, 1, &[block_hash('f')])
        .expect("failed to set recent blocks");
    assert_eq!(outcome.updated_event_count, 0);

    let status = store
        .get_channel_status(&key_doc(), true)
        .expect("failed to get status");
    assert!(status.channel.is_some());
}

#[test]
fn test_latest_state_uses_numeric_comparison() {
    let store = store();
    store
        .insert_state_update(&update_doc("9"))
        .expect("failed to insert");
    store
        .insert_state_update(&update_doc("10"))
        .expect("failed to insert");

    // Lexicographic TEXT comparison would pick "9"; numeric must pick "10".
    let latest = store
        .get_latest_state(&key_doc())
        .expect("failed to get latest")
        .expect("latest missing");
    assert_eq!(latest.amount, crate::wei::Wei::from(10));
}

#[test]
fn test_get_latest_state_missing_field() {
    let store = store();
    let incomplete = ChannelKeyDoc {
        chain_id: Some(1),
        contract_id: None,
        channel_id: Some(channel()),
    };
    let err = store
        .get_latest_state(&incomplete)
        .expect_err("must fail");
    assert_eq!(err.to_string(), "contract_id must not be null");
}

#[test]
fn test_quarantine_log_is_readable() {
    let store = store();
    let err = store
        .insert_state_update(&update_doc("-5"))
        .expect_err("negative amount must be rejected");
    let doc = match &err {
        AdmissionError::Rejected { .. } => err.rejection_document().expect("document missing"),
        AdmissionError::Store(other) => panic!("unexpected store error: {other}"),
    };
    assert!(doc.error);
    assert_eq!(doc.reason, "negative_amount");

    let quarantined = store
        .get_invalid_state_updates(10)
        .expect("failed to read quarantine");
    assert_eq!(quarantined.len(), 1);
    assert_eq!(quarantined[0].reason, "negative_amount");
    assert!(quarantined[0].status.is_some());

    // Nothing reached the state-update log.
    assert!(store
        .get_latest_state(&key_doc())
        .expect("failed to get latest")
        .is_none());
}

#[test]
fn test_concurrent_admissions_serialize() {
    use std::thread;

    let store = Arc::new(store());
    let mut handles = Vec::new();
    for amount in 1..=8u64 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            store
                .insert_state_update(&update_doc(&amount.to_string()))
                .expect("failed to insert update");
        }));
    }
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    // Whatever the interleaving, the end state is a sequential one: all
    // eight rows stored, the maximum amount on top.
    assert_eq!(store.stats().expect("stats failed").state_update_count, 8);
    let latest = store
        .get_latest_state(&key_doc())
        .expect("failed to get latest")
        .expect("latest missing");
    assert_eq!(latest.amount, crate::wei::Wei::from(8));
}

#[test]
fn test_status_for_never_seen_channel() {
    let status = store()
        .get_channel_status(&key_doc(), true)
        .expect("failed to get status");
    assert!(status.channel.is_none());
    assert!(status.latest_state.is_none());
    assert!(status.latest_event.is_none());
    assert!(status.latest_intent_event.is_none());
    assert!(status.latest_chain_event.is_none());
    assert!(!status.is_invalid);
}
