//! Reorg processor.
//!
//! `set_recent_blocks` asserts the canonical block-hash suffix of a chain.
//! Every stored chain event at or above the asserted start is re-judged:
//! its hash either matches the canonical hash for its height (valid) or it
//! does not (orphaned). The processor never rewrites hashes; it only
//! toggles `block_is_valid`, and the correlation engine rebinds intents
//! over the flips.

use serde::Serialize;
use tracing::info;

use super::events::recorrelate_channel_intents;
use super::status::channel_status_tx;
use super::{ChannelStatus, ChannelStore, StoreError};
use crate::domain::{BlockHash, ChannelId, EthAddress};
use crate::events::ChannelKey;

/// Result of one `set_recent_blocks` call.
#[derive(Debug, Serialize)]
pub struct ReorgOutcome {
    /// Number of chain events whose validity actually changed.
    pub updated_event_count: u64,
    /// Post-update statuses of the channels touched by those flips, in
    /// first-flip order.
    pub updated_channels: Vec<ChannelStatus>,
}

impl ChannelStore {
    /// Asserts that `hashes` is the canonical block list of `chain_id`
    /// starting at `first_block_num`, flipping validity on every chain
    /// event that disagrees. Events below `first_block_num` are never
    /// touched; events past the end of the list are orphaned.
    ///
    /// # Errors
    ///
    /// Returns domain violations for malformed hashes, and database errors
    /// unchanged.
    pub fn set_recent_blocks(
        &self,
        chain_id: u32,
        first_block_num: u64,
        hashes: &[String],
    ) -> Result<ReorgOutcome, StoreError> {
        let canonical = hashes
            .iter()
            .map(|h| BlockHash::new(h))
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.connection().lock().unwrap();
        let tx = conn.transaction()?;

        let mut stmt = tx.prepare(
            "SELECT id, contract_id, channel_id, block_number, block_hash, block_is_valid
             FROM channel_events
             WHERE chain_id = ?1 AND block_number >= ?2
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![chain_id, first_block_num as i64],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, bool>(5)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut updated_event_count = 0u64;
        let mut touched: Vec<ChannelKey> = Vec::new();

        for (id, contract_id, channel_id, block_number, block_hash, was_valid) in rows {
            let index = (block_number as u64).checked_sub(first_block_num);
            let expected = index
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| canonical.get(i));
            let now_valid = expected.is_some_and(|h| h.as_hex() == block_hash);

            if now_valid == was_valid {
                continue;
            }
            tx.execute(
                "UPDATE channel_events SET block_is_valid = ?1 WHERE id = ?2",
                rusqlite::params![now_valid, id],
            )?;
            updated_event_count += 1;

            let key = ChannelKey {
                chain_id,
                contract_id: EthAddress::new(&contract_id)?,
                channel_id: ChannelId::new(&channel_id)?,
            };
            if !touched.contains(&key) {
                touched.push(key);
            }
        }

        // Validity changed under the intents; re-establish the correlation
        // invariant before snapshotting the affected channels.
        let mut updated_channels = Vec::with_capacity(touched.len());
        for key in &touched {
            recorrelate_channel_intents(&tx, key)?;
        }
        for key in &touched {
            updated_channels.push(channel_status_tx(&tx, key, true)?);
        }

        tx.commit()?;
        info!(
            chain_id,
            first_block_num,
            asserted = hashes.len(),
            updated_event_count,
            channels = updated_channels.len(),
            "recent blocks asserted"
        );

        Ok(ReorgOutcome {
            updated_event_count,
            updated_channels,
        })
    }
}
