//! SQLite-backed channel store.
//!
//! The store keeps the three append-only logs (`state_updates`,
//! `channel_events`, `channel_intents`) and the quarantine log
//! (`invalid_state_updates`) in a single SQLite database with WAL mode.
//! Every mutating operation runs inside one transaction on a mutex-guarded
//! connection, which serializes writers: two concurrent admissions for the
//! same channel always observe each other's committed state.
//!
//! The public operations are spread over this module's files by concern:
//! event/intent insertion and the correlation engine in `events`, the reorg
//! processor in `reorg`, state-update admission in `state_updates`, and the
//! channel status query in `status`.

// SQLite row ids and counts are i64 but never negative in practice.
// Mutex poisoning indicates a panic in another thread, which is
// unrecoverable.
#![allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::missing_panics_doc
)]

mod events;
mod reorg;
mod state_updates;
mod status;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::crypto::SignatureVerifier;
use crate::domain::DomainError;

pub use reorg::ReorgOutcome;
pub use state_updates::{
    AdmissionError, DupeStatus, RejectReason, RejectionDocument, StateUpdateOutcome,
    StateUpdateRecord, StateUpdateStatus,
};
pub use status::ChannelStatus;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database error from SQLite, propagated unchanged.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Input-shape or domain validation failure.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A stored payload could not be parsed back as JSON.
    #[error("stored payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Version information returned by [`ChannelStore::selftest`].
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    /// Crate name.
    pub package: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Linked SQLite version.
    pub sqlite_version: &'static str,
}

/// Row counts per log.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    /// Rows in `state_updates`.
    pub state_update_count: u64,
    /// Rows in `channel_events`.
    pub channel_event_count: u64,
    /// Rows in `channel_intents`.
    pub channel_intent_count: u64,
    /// Rows in `invalid_state_updates`.
    pub invalid_state_update_count: u64,
}

/// One quarantined state update. Append-only; never read by the reducer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidStateUpdateRecord {
    /// Row id.
    pub id: i64,
    /// Quarantine time, Unix epoch seconds.
    pub created_at: f64,
    /// Quarantine reason (`signature_invalid`, `conflict`,
    /// `negative_amount`, `invalid_state: …`).
    pub reason: String,
    /// Status snapshot at quarantine time, when computable.
    pub status: Option<Value>,
    /// The raw document as received.
    pub raw: Value,
}

/// The SQLite-backed payment-channel ledger.
pub struct ChannelStore {
    conn: Arc<Mutex<Connection>>,
    verifier: Arc<dyn SignatureVerifier>,
    #[allow(dead_code)]
    path: Option<PathBuf>,
}

impl ChannelStore {
    /// Opens or creates a store at `path` with the given signature verifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(
        path: impl AsRef<Path>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            verifier,
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory store, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory(verifier: Arc<dyn SignatureVerifier>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            verifier,
            path: None,
        })
    }

    /// Idempotent schema installation. Safe to call on a live database.
    ///
    /// # Errors
    ///
    /// Returns an error if a schema statement fails.
    pub fn setup_database(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Reports version information for the crate and the linked SQLite.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable.
    pub fn selftest(&self) -> Result<VersionInfo, StoreError> {
        let conn = self.conn.lock().unwrap();
        // A trivial query proves the connection is alive.
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(VersionInfo {
            package: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            sqlite_version: rusqlite::version(),
        })
    }

    /// Gathers row counts per log.
    ///
    /// # Errors
    ///
    /// Returns an error if a count query fails.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count = |table: &str| -> Result<u64, rusqlite::Error> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
        };
        Ok(StoreStats {
            state_update_count: count("state_updates")?,
            channel_event_count: count("channel_events")?,
            channel_intent_count: count("channel_intents")?,
            invalid_state_update_count: count("invalid_state_updates")?,
        })
    }

    /// Reads the most recent quarantined state updates, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored blob is unreadable.
    pub fn get_invalid_state_updates(
        &self,
        limit: u64,
    ) -> Result<Vec<InvalidStateUpdateRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, created_at, reason, status, raw
             FROM invalid_state_updates
             ORDER BY id DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (id, created_at, reason, status, raw) in rows {
            records.push(InvalidStateUpdateRecord {
                id,
                created_at,
                reason,
                status: status.map(|s| serde_json::from_str(&s)).transpose()?,
                raw: serde_json::from_str(&raw)?,
            });
        }
        Ok(records)
    }

    /// Borrows the injected verifier.
    pub(crate) fn verifier(&self) -> &dyn SignatureVerifier {
        self.verifier.as_ref()
    }

    /// Borrows the shared connection.
    pub(crate) fn connection(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }
}

/// Current wall-clock time as Unix epoch seconds.
pub(crate) fn now_epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
