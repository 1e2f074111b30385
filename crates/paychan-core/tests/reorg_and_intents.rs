//! Reorg processing and intent promotion across competing chain histories.

mod common;

use common::{block_hash, create_fields, deposit_fields, event_doc, intent_doc, key_doc, store};
use paychan_core::{EventSource, Wei};

#[test]
fn test_reorg_rewrites_channel_value() {
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
            deposit_fields("1"),
        ))
        .expect("insert deposit 1");
    store
        .insert_channel_event(&event_doc(
            3,
            &block_hash('c'),
            30.0,
            "DidDeposit",
            deposit_fields("2"),
        ))
        .expect("insert deposit 2");

    let status = store
        .get_channel_status(&key_doc(), true)
        .expect("failed to get status");
    assert_eq!(status.channel.expect("channel missing").value, Wei::from(3));

    // Canonical list stops at block 2: the deposit at block 3 is orphaned.
    let outcome = store
        .set_recent_blocks(1, 1, &[block_hash('a'), block_hash('b')])
        .expect("failed to set recent blocks");
    assert_eq!(outcome.updated_event_count, 1);
    assert_eq!(outcome.updated_channels.len(), 1);
    assert_eq!(
        outcome.updated_channels[0]
            .channel
            .as_ref()
            .expect("channel missing")
            .value,
        Wei::from(1)
    );

    // New canonical list replaces block 2 and restores block 3.
    let outcome = store
        .set_recent_blocks(1, 1, &[block_hash('a'), block_hash('x'), block_hash('c')])
        .expect("failed to set recent blocks");
    assert_eq!(outcome.updated_event_count, 2);
    assert_eq!(
        outcome.updated_channels[0]
            .channel
            .as_ref()
            .expect("channel missing")
            .value,
        Wei::from(2)
    );
}

#[test]
fn test_reorg_updated_channels_reflect_post_update_snapshot() {
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
            deposit_fields("5"),
        ))
        .expect("insert deposit");

    let outcome = store
        .set_recent_blocks(1, 2, &[block_hash('z')])
        .expect("failed to set recent blocks");
    // The snapshot in the outcome must already exclude the orphaned deposit.
    let snapshot = &outcome.updated_channels[0];
    assert_eq!(
        snapshot.channel.as_ref().expect("channel missing").value,
        Wei::zero()
    );
    let direct = store
        .get_channel_status(&key_doc(), true)
        .expect("failed to get status");
    assert_eq!(
        direct.channel.expect("channel missing").value,
        Wei::zero()
    );
}

#[test]
fn test_intent_promotion_intent_first() {
    let store = store();
    store
        .insert_channel_intent(&intent_doc(1, "DidCreateChannel", create_fields()))
        .expect("insert intent");
    store
        .insert_channel_event(&event_doc(
            2,
            &block_hash('a'),
            10.0,
            "DidCreateChannel",
            create_fields(),
        ))
        .expect("insert event");

    let events = store
        .get_channel_events(&key_doc(), true)
        .expect("failed to enumerate");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, EventSource::Chain);
    assert_eq!(
        events[0].block_hash.as_ref().expect("hash missing").as_hex(),
        block_hash('a')
    );
}

#[test]
fn test_intent_promotion_event_first() {
    let store = store();
    store
        .insert_channel_event(&event_doc(
            2,
            &block_hash('a'),
            10.0,
            "DidCreateChannel",
            create_fields(),
        ))
        .expect("insert event");
    store
        .insert_channel_intent(&intent_doc(1, "DidCreateChannel", create_fields()))
        .expect("insert intent");

    let events = store
        .get_channel_events(&key_doc(), true)
        .expect("failed to enumerate");
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].block_hash.as_ref().expect("hash missing").as_hex(),
        block_hash('a')
    );
}

#[test]
fn test_intent_tracks_surviving_event_through_reorg() {
    let store = store();
    store
        .insert_channel_intent(&intent_doc(1, "DidCreateChannel", create_fields()))
        .expect("insert intent");
    // Two competing create events at block 2.
    store
        .insert_channel_event(&event_doc(
            2,
            &block_hash('a'),
            10.0,
            "DidCreateChannel",
            create_fields(),
        ))
        .expect("insert event a");
    store
        .insert_channel_event(&event_doc(
            2,
            &block_hash('b'),
            11.0,
            "DidCreateChannel",
            create_fields(),
        ))
        .expect("insert event b");

    // Before any assertion the intent is bound to the most recent insert.
    // Assert hash `a` as canonical for block 2: event b is orphaned and the
    // intent must rebind to the survivor.
    store
        .set_recent_blocks(1, 2, &[block_hash('a')])
        .expect("failed to set recent blocks");

    let events = store
        .get_channel_events(&key_doc(), true)
        .expect("failed to enumerate");
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].block_hash.as_ref().expect("hash missing").as_hex(),
        block_hash('a')
    );

    // Flip the canonical choice to hash `b`; the intent follows it.
    store
        .set_recent_blocks(1, 2, &[block_hash('b')])
        .expect("failed to set recent blocks");
    let events = store
        .get_channel_events(&key_doc(), true)
        .expect("failed to enumerate");
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].block_hash.as_ref().expect("hash missing").as_hex(),
        block_hash('b')
    );
}

#[test]
fn test_orphaning_every_match_reopens_the_intent() {
    let store = store();
    store
        .insert_channel_intent(&intent_doc(1, "DidCreateChannel", create_fields()))
        .expect("insert intent");
    store
        .insert_channel_event(&event_doc(
            2,
            &block_hash('a'),
            10.0,
            "DidCreateChannel",
            create_fields(),
        ))
        .expect("insert event");

    // No canonical block matches: the chain event is orphaned and the
    // intent's hash clears back to null, standing in for the missing event.
    store
        .set_recent_blocks(1, 1, &[block_hash('x'), block_hash('y')])
        .expect("failed to set recent blocks");

    let events = store
        .get_channel_events(&key_doc(), true)
        .expect("failed to enumerate");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, EventSource::Intent);
    assert!(events[0].block_hash.is_none());

    let status = store
        .get_channel_status(&key_doc(), true)
        .expect("failed to get status");
    let ch = status.channel.expect("channel missing");
    assert!(ch.state_is_intent);
}

#[test]
fn test_intent_floor_is_not_a_ceiling() {
    let store = store();
    // Intent declared at block 5; a matching event lands at block 9.
    store
        .insert_channel_intent(&intent_doc(5, "DidCreateChannel", create_fields()))
        .expect("insert intent");
    store
        .insert_channel_event(&event_doc(
            9,
            &block_hash('a'),
            10.0,
            "DidCreateChannel",
            create_fields(),
        ))
        .expect("insert event");

    let events = store
        .get_channel_events(&key_doc(), true)
        .expect("failed to enumerate");
    assert_eq!(events.len(), 1);

    // An event *below* the floor must not absorb the intent.
    let store2 = common::store();
    store2
        .insert_channel_intent(&intent_doc(5, "DidCreateChannel", create_fields()))
        .expect("insert intent");
    store2
        .insert_channel_event(&event_doc(
            3,
            &block_hash('a'),
            10.0,
            "DidCreateChannel",
            create_fields(),
        ))
        .expect("insert event");
    let events = store2
        .get_channel_events(&key_doc(), true)
        .expect("failed to enumerate");
    assert_eq!(events.len(), 2);
}
