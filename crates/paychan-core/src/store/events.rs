//! Event and intent insertion, plus the intent-correlation engine.
//!
//! Correlation invariant: for every intent, `block_hash` equals the hash of
//! the most recently inserted *valid* chain event with the same channel,
//! sender, event type, and deep-equal payload, at a block number at or above
//! the intent's floor; otherwise null. The engine re-establishes the
//! invariant on every write that can disturb it: chain-event insert, intent
//! insert, and validity flips from the reorg processor.

use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::debug;

use super::status::channel_status_tx;
use super::{now_epoch_seconds, ChannelStatus, ChannelStore, StoreError};
use crate::domain::{BlockHash, ChannelId, EthAddress};
use crate::events::{
    ChannelEventDoc, ChannelEventRecord, ChannelIntentDoc, ChannelKey, ChannelKeyDoc, EventKind,
    EventSource,
};

impl ChannelStore {
    /// Records an observed on-chain channel event and rebinds any matching
    /// intents to its block hash.
    ///
    /// Returns the channel status (intents included) as of the insert.
    ///
    /// # Errors
    ///
    /// Returns `<field> must not be null` / domain violations for malformed
    /// input, and database errors unchanged.
    pub fn insert_channel_event(&self, doc: &ChannelEventDoc) -> Result<ChannelStatus, StoreError> {
        let event = doc.validate()?;
        let mut conn = self.connection().lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO channel_events
               (chain_id, contract_id, channel_id, ts, block_number, block_hash,
                block_is_valid, sender, event_type, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?9)",
            params![
                event.key.chain_id,
                event.key.contract_id.as_hex(),
                event.key.channel_id.as_hex(),
                event.ts,
                event.block_number as i64,
                event.block_hash.as_hex(),
                event.sender.as_hex(),
                event.event_type.as_str(),
                event.fields.to_string(),
            ],
        )?;
        let id = tx.last_insert_rowid();

        let rebound = correlate_after_event_insert(
            &tx,
            &event.key,
            &event.sender,
            event.event_type,
            &event.fields,
            event.block_number,
            &event.block_hash,
        )?;
        if rebound > 0 {
            debug!(
                event_id = id,
                rebound, "chain event insert rebound matching intents"
            );
        }

        let status = channel_status_tx(&tx, &event.key, true)?;
        tx.commit()?;
        Ok(status)
    }

    /// Declares an anticipated on-chain event. The store stamps the server
    /// time and immediately correlates the intent against already-observed
    /// chain events, so the correlation invariant holds after this write.
    ///
    /// Returns the channel status (intents included) as of the insert.
    ///
    /// # Errors
    ///
    /// Returns `<field> must not be null` / domain violations for malformed
    /// input, and database errors unchanged.
    pub fn insert_channel_intent(
        &self,
        doc: &ChannelIntentDoc,
    ) -> Result<ChannelStatus, StoreError> {
        let intent = doc.validate()?;
        let mut conn = self.connection().lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO channel_intents
               (chain_id, contract_id, channel_id, ts, block_number, block_hash,
                sender, event_type, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?8)",
            params![
                intent.key.chain_id,
                intent.key.contract_id.as_hex(),
                intent.key.channel_id.as_hex(),
                now_epoch_seconds(),
                intent.block_number as i64,
                intent.sender.as_hex(),
                intent.event_type.as_str(),
                intent.fields.to_string(),
            ],
        )?;
        let id = tx.last_insert_rowid();

        let matched = latest_matching_event_hash(
            &tx,
            &intent.key,
            &intent.sender,
            intent.event_type,
            &intent.fields,
            intent.block_number,
        )?;
        if let Some(hash) = &matched {
            tx.execute(
                "UPDATE channel_intents SET block_hash = ?1 WHERE id = ?2",
                params![hash.as_hex(), id],
            )?;
            debug!(intent_id = id, "intent correlated on insert");
        }

        let status = channel_status_tx(&tx, &intent.key, true)?;
        tx.commit()?;
        Ok(status)
    }

    /// Returns the merged per-channel event stream in canonical order:
    /// valid chain events plus, when `include_intents`, intents that no
    /// chain event has absorbed yet.
    ///
    /// # Errors
    ///
    /// Returns `<field> must not be null` for an incomplete key, and
    /// database errors unchanged.
    pub fn get_channel_events(
        &self,
        key: &ChannelKeyDoc,
        include_intents: bool,
    ) -> Result<Vec<ChannelEventRecord>, StoreError> {
        let key = key.validate()?;
        let conn = self.connection().lock().unwrap();
        channel_events_tx(&conn, &key, include_intents)
    }
}

/// Raw event row shared by both logs before domain re-validation.
type RawEventRow = (
    i64,
    u32,
    String,
    String,
    f64,
    i64,
    Option<String>,
    bool,
    String,
    String,
    String,
);

fn record_from_raw(raw: RawEventRow, source: EventSource) -> Result<ChannelEventRecord, StoreError> {
    let (id, chain_id, contract_id, channel_id, ts, block_number, block_hash, block_is_valid, sender, event_type, fields) =
        raw;
    Ok(ChannelEventRecord {
        id,
        source,
        key: ChannelKey {
            chain_id,
            contract_id: EthAddress::new(&contract_id)?,
            channel_id: ChannelId::new(&channel_id)?,
        },
        ts,
        block_number: block_number as u64,
        block_hash: block_hash.as_deref().map(BlockHash::new).transpose()?,
        block_is_valid,
        sender: EthAddress::new(&sender)?,
        event_type: EventKind::parse(&event_type)?,
        fields: serde_json::from_str(&fields)?,
    })
}

/// Enumerates the channel's merged stream inside the caller's transaction.
pub(crate) fn channel_events_tx(
    conn: &Connection,
    key: &ChannelKey,
    include_intents: bool,
) -> Result<Vec<ChannelEventRecord>, StoreError> {
    let mut records = Vec::new();

    let mut stmt = conn.prepare(
        "SELECT id, chain_id, contract_id, channel_id, ts, block_number, block_hash,
                block_is_valid, sender, event_type, fields
         FROM channel_events
         WHERE chain_id = ?1 AND contract_id = ?2 AND channel_id = ?3
           AND block_is_valid = 1",
    )?;
    let rows = stmt
        .query_map(
            params![key.chain_id, key.contract_id.as_hex(), key.channel_id.as_hex()],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                    row.get(10)?,
                ))
            },
        )?
        .collect::<Result<Vec<RawEventRow>, _>>()?;
    for raw in rows {
        records.push(record_from_raw(raw, EventSource::Chain)?);
    }

    if include_intents {
        let mut stmt = conn.prepare(
            "SELECT id, chain_id, contract_id, channel_id, ts, block_number, block_hash,
                    1, sender, event_type, fields
             FROM channel_intents
             WHERE chain_id = ?1 AND contract_id = ?2 AND channel_id = ?3
               AND block_hash IS NULL",
        )?;
        let rows = stmt
            .query_map(
                params![key.chain_id, key.contract_id.as_hex(), key.channel_id.as_hex()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                        row.get(10)?,
                    ))
                },
            )?
            .collect::<Result<Vec<RawEventRow>, _>>()?;
        for raw in rows {
            records.push(record_from_raw(raw, EventSource::Intent)?);
        }
    }

    records.sort_by(ChannelEventRecord::canonical_cmp);
    Ok(records)
}

/// Deep payload equality over the stored JSON text.
fn fields_equal(stored: &str, expected: &Value) -> bool {
    serde_json::from_str::<Value>(stored).is_ok_and(|parsed| &parsed == expected)
}

/// Insert trigger: an intent declares a block floor, not a ceiling, so every
/// matching intent with `block_number <= inserted.block_number` rebinds to
/// the freshly inserted event's hash. Returns the number of rebound intents.
#[allow(clippy::too_many_arguments)]
fn correlate_after_event_insert(
    conn: &Connection,
    key: &ChannelKey,
    sender: &EthAddress,
    event_type: EventKind,
    fields: &Value,
    block_number: u64,
    block_hash: &BlockHash,
) -> Result<usize, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, fields FROM channel_intents
         WHERE chain_id = ?1 AND contract_id = ?2 AND channel_id = ?3
           AND sender = ?4 AND event_type = ?5 AND block_number <= ?6",
    )?;
    let candidates = stmt
        .query_map(
            params![
                key.chain_id,
                key.contract_id.as_hex(),
                key.channel_id.as_hex(),
                sender.as_hex(),
                event_type.as_str(),
                block_number as i64,
            ],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let mut rebound = 0;
    for (intent_id, stored_fields) in candidates {
        if fields_equal(&stored_fields, fields) {
            conn.execute(
                "UPDATE channel_intents SET block_hash = ?1 WHERE id = ?2",
                params![block_hash.as_hex(), intent_id],
            )?;
            rebound += 1;
        }
    }
    Ok(rebound)
}

/// The most recently inserted valid chain event matching an intent, if any.
fn latest_matching_event_hash(
    conn: &Connection,
    key: &ChannelKey,
    sender: &EthAddress,
    event_type: EventKind,
    fields: &Value,
    min_block_number: u64,
) -> Result<Option<BlockHash>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT block_hash, fields FROM channel_events
         WHERE chain_id = ?1 AND contract_id = ?2 AND channel_id = ?3
           AND sender = ?4 AND event_type = ?5 AND block_number >= ?6
           AND block_is_valid = 1
         ORDER BY id DESC",
    )?;
    let candidates = stmt
        .query_map(
            params![
                key.chain_id,
                key.contract_id.as_hex(),
                key.channel_id.as_hex(),
                sender.as_hex(),
                event_type.as_str(),
                min_block_number as i64,
            ],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    for (hash, stored_fields) in candidates {
        if fields_equal(&stored_fields, fields) {
            return Ok(Some(BlockHash::new(&hash)?));
        }
    }
    Ok(None)
}

/// Update/delete trigger: recomputes every intent of a channel against the
/// invariant (most recently inserted valid match, or null). Returns the
/// number of intents whose binding changed.
pub(crate) fn recorrelate_channel_intents(
    conn: &Connection,
    key: &ChannelKey,
) -> Result<usize, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, sender, event_type, fields, block_number, block_hash
         FROM channel_intents
         WHERE chain_id = ?1 AND contract_id = ?2 AND channel_id = ?3",
    )?;
    let intents = stmt
        .query_map(
            params![key.chain_id, key.contract_id.as_hex(), key.channel_id.as_hex()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let mut changed = 0;
    for (intent_id, sender, event_type, fields_text, block_number, current_hash) in intents {
        let sender = EthAddress::new(&sender)?;
        let event_type = EventKind::parse(&event_type)?;
        let fields: Value = serde_json::from_str(&fields_text)?;

        let expected =
            latest_matching_event_hash(conn, key, &sender, event_type, &fields, block_number as u64)?;
        let expected_hex = expected.as_ref().map(|h| h.as_hex().to_string());

        if expected_hex != current_hash {
            conn.execute(
                "UPDATE channel_intents SET block_hash = ?1 WHERE id = ?2",
                params![expected_hex, intent_id],
            )?;
            changed += 1;
        }
    }
    if changed > 0 {
        debug!(changed, "intent recorrelation adjusted bindings");
    }
    Ok(changed)
}
