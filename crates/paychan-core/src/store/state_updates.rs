//! State-update admission and lookup.
//!
//! Admission classifies every incoming update against the channel's latest
//! committed state inside a single transaction: signature first, then
//! conflict, then negativity, then duplicate-vs-distinct. Rejections are
//! never silent: each one lands in the `invalid_state_updates` quarantine
//! log with its reason and whatever status snapshot was computable.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::status::channel_status_tx;
use super::{now_epoch_seconds, ChannelStore, StoreError};
use crate::crypto::{state_update_digest, SignatureVerifier};
use crate::domain::{ChannelId, DomainError, EthAddress, SignatureHex};
use crate::events::{ChannelKey, ChannelKeyDoc, StateUpdate, StateUpdateDoc};
use crate::wei::Wei;

/// Duplicate classification of an incoming update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DupeStatus {
    /// No stored update with this amount exists for the channel.
    Distinct,
    /// An exact amount match already exists.
    Dupe,
    /// Reserved: same sequence, different content. Not produced by the
    /// current rule, but preserved in the status shape.
    Conflict,
}

/// Admission status of a state update (computed before any write).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateUpdateStatus {
    /// Whether the signature verifies against the channel's sender.
    pub signature_valid: bool,
    /// Whether the amount is at or above the channel's current maximum.
    pub is_latest: bool,
    /// `amount - latest.amount` when `is_latest`, else null.
    pub added_amount: Option<Wei>,
    /// Duplicate classification.
    pub dupe_status: DupeStatus,
}

/// One stored state update.
#[derive(Debug, Clone, Serialize)]
pub struct StateUpdateRecord {
    /// Row id.
    pub id: i64,
    /// Insertion time, Unix epoch seconds.
    pub created_at: f64,
    /// Channel identity.
    #[serde(flatten)]
    pub key: ChannelKey,
    /// Update timestamp, Unix epoch seconds.
    pub ts: f64,
    /// Cumulative payment amount.
    pub amount: Wei,
    /// Signature over the update digest.
    pub signature: SignatureHex,
}

/// Why an update was quarantined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The signature did not verify.
    SignatureInvalid,
    /// Reserved conflict classification.
    Conflict,
    /// The amount was negative.
    NegativeAmount,
    /// A domain check failed at insertion; carries the underlying message.
    InvalidState(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SignatureInvalid => f.write_str("signature_invalid"),
            Self::Conflict => f.write_str("conflict"),
            Self::NegativeAmount => f.write_str("negative_amount"),
            Self::InvalidState(message) => write!(f, "invalid_state: {message}"),
        }
    }
}

impl Serialize for RejectReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Wire shape of an admission rejection: `{error, reason, status?}`.
#[derive(Debug, Clone, Serialize)]
pub struct RejectionDocument {
    /// Always true.
    pub error: bool,
    /// Quarantine reason.
    pub reason: String,
    /// Status snapshot, when one was computable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StateUpdateStatus>,
}

/// Errors from [`ChannelStore::insert_state_update`].
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The update was quarantined. The offending row is in
    /// `invalid_state_updates`; nothing was appended to `state_updates`.
    #[error("state update rejected: {reason}")]
    Rejected {
        /// Quarantine reason.
        reason: RejectReason,
        /// Status snapshot, when one was computable.
        status: Option<StateUpdateStatus>,
    },

    /// Validation or storage failure; nothing was quarantined.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DomainError> for AdmissionError {
    fn from(err: DomainError) -> Self {
        Self::Store(StoreError::Domain(err))
    }
}

impl AdmissionError {
    /// Renders a rejection as its wire document; `None` for storage errors.
    #[must_use]
    pub fn rejection_document(&self) -> Option<RejectionDocument> {
        match self {
            Self::Rejected { reason, status } => Some(RejectionDocument {
                error: true,
                reason: reason.to_string(),
                status: status.clone(),
            }),
            Self::Store(_) => None,
        }
    }
}

/// Result of a successful admission.
#[derive(Debug, Clone, Serialize)]
pub struct StateUpdateOutcome {
    /// Row id of the stored update (the pre-existing row for duplicates).
    pub id: i64,
    /// False when the update was an exact duplicate of a stored row.
    pub created: bool,
    /// Admission status as computed before the write.
    pub status: StateUpdateStatus,
    /// Whether this update is (now) the channel's latest.
    pub is_latest: bool,
    /// The channel's latest state after admission.
    pub latest_state: Option<StateUpdateRecord>,
    /// Balance delta this update contributed, when it was the latest.
    pub added_amount: Option<Wei>,
    /// The channel's current payment (latest amount).
    pub channel_payment: Option<Wei>,
    /// `channel.value - channel_payment`, when both sides exist.
    pub channel_remaining_balance: Option<Wei>,
}

impl ChannelStore {
    /// Looks up the channel's latest state update (maximum amount).
    ///
    /// # Errors
    ///
    /// Returns `<field> must not be null` for an incomplete key, and
    /// database errors unchanged.
    pub fn get_latest_state(
        &self,
        key: &ChannelKeyDoc,
    ) -> Result<Option<StateUpdateRecord>, StoreError> {
        let key = key.validate()?;
        let conn = self.connection().lock().unwrap();
        latest_state_tx(&conn, &key)
    }

    /// Computes the admission status of an update without writing anything.
    ///
    /// # Errors
    ///
    /// Fails loud on every validation problem (this operation has no
    /// quarantine side), and passes database errors through unchanged.
    pub fn get_state_update_status(
        &self,
        doc: &StateUpdateDoc,
    ) -> Result<StateUpdateStatus, StoreError> {
        let update = doc.validate()?;
        let conn = self.connection().lock().unwrap();
        status_tx(&conn, self.verifier(), &update)
    }

    /// Admits a state update: verifies, classifies, then appends or
    /// quarantines, reporting the resulting balance movement.
    ///
    /// Duplicate admissions are idempotent: the second call returns
    /// `created = false` and storage is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Rejected`] for quarantined updates and
    /// [`AdmissionError::Store`] for shape errors and storage failures.
    pub fn insert_state_update(
        &self,
        doc: &StateUpdateDoc,
    ) -> Result<StateUpdateOutcome, AdmissionError> {
        // Shape errors fail loud before any row is written.
        doc.validate_presence().map_err(StoreError::Domain)?;

        let mut conn = self.connection().lock().unwrap();
        let tx = conn.transaction().map_err(StoreError::Database)?;

        // Content errors quarantine instead: a malformed domain value is
        // data about the counterparty, not about us.
        let update = match doc.validate() {
            Ok(update) => update,
            Err(domain_err) => {
                let reason = RejectReason::InvalidState(domain_err.to_string());
                return Err(reject(tx, doc, reason, None));
            }
        };

        let status = status_tx(&tx, self.verifier(), &update)?;

        if !status.signature_valid {
            return Err(reject(tx, doc, RejectReason::SignatureInvalid, Some(status)));
        }
        if status.dupe_status == DupeStatus::Conflict {
            return Err(reject(tx, doc, RejectReason::Conflict, Some(status)));
        }
        if update.amount.is_negative() {
            return Err(reject(tx, doc, RejectReason::NegativeAmount, Some(status)));
        }

        let (id, created) = match status.dupe_status {
            DupeStatus::Dupe => {
                let existing = find_exact_amount(&tx, &update.key, &update.amount)?
                    .map_or(0, |record| record.id);
                debug!(id = existing, "duplicate state update; storage unchanged");
                (existing, false)
            }
            DupeStatus::Distinct | DupeStatus::Conflict => {
                match insert_row(&tx, &update) {
                    Ok(id) => (id, true),
                    // Domain-check failures at the storage layer quarantine;
                    // anything else is a real storage error and propagates.
                    Err(rusqlite::Error::SqliteFailure(inner, message))
                        if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        let detail = message
                            .unwrap_or_else(|| "constraint violation".to_string());
                        let reason = RejectReason::InvalidState(detail);
                        return Err(reject(tx, doc, reason, Some(status)));
                    }
                    Err(err) => return Err(StoreError::Database(err).into()),
                }
            }
        };

        let latest_state = latest_state_tx(&tx, &update.key)?;
        let channel = channel_status_tx(&tx, &update.key, true)?;
        tx.commit().map_err(StoreError::Database)?;

        let channel_payment = latest_state.as_ref().map(|state| state.amount.clone());
        let channel_remaining_balance = match (&channel.channel, &latest_state) {
            (Some(ch), Some(state)) => Some(&ch.value - &state.amount),
            _ => None,
        };

        Ok(StateUpdateOutcome {
            id,
            created,
            is_latest: status.is_latest,
            added_amount: status.added_amount.clone(),
            status,
            latest_state,
            channel_payment,
            channel_remaining_balance,
        })
    }
}

/// Quarantines `doc` and commits, then builds the rejection error. A failure
/// while quarantining wins over the rejection itself.
fn reject(
    tx: rusqlite::Transaction<'_>,
    doc: &StateUpdateDoc,
    reason: RejectReason,
    status: Option<StateUpdateStatus>,
) -> AdmissionError {
    let result = quarantine_tx(&tx, &reason, status.as_ref(), doc)
        .and_then(|_| tx.commit().map_err(StoreError::Database));
    match result {
        Ok(()) => {
            warn!(%reason, "state update quarantined");
            AdmissionError::Rejected { reason, status }
        }
        Err(err) => AdmissionError::Store(err),
    }
}

fn quarantine_tx(
    conn: &Connection,
    reason: &RejectReason,
    status: Option<&StateUpdateStatus>,
    doc: &StateUpdateDoc,
) -> Result<i64, StoreError> {
    let status_json = status.map(serde_json::to_string).transpose()?;
    let raw = serde_json::to_string(doc)?;
    conn.execute(
        "INSERT INTO invalid_state_updates (created_at, reason, status, raw)
         VALUES (?1, ?2, ?3, ?4)",
        params![now_epoch_seconds(), reason.to_string(), status_json, raw],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_row(conn: &Connection, update: &StateUpdate) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO state_updates
           (created_at, chain_id, contract_id, channel_id, ts, amount, signature)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            now_epoch_seconds(),
            update.key.chain_id,
            update.key.contract_id.as_hex(),
            update.key.channel_id.as_hex(),
            update.ts,
            update.amount.to_string(),
            update.signature.as_hex(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

type RawStateUpdateRow = (i64, f64, u32, String, String, f64, String, String);

fn record_from_raw(raw: RawStateUpdateRow) -> Result<StateUpdateRecord, StoreError> {
    let (id, created_at, chain_id, contract_id, channel_id, ts, amount, signature) = raw;
    Ok(StateUpdateRecord {
        id,
        created_at,
        key: ChannelKey {
            chain_id,
            contract_id: EthAddress::new(&contract_id)?,
            channel_id: ChannelId::new(&channel_id)?,
        },
        ts,
        amount: Wei::new(&amount)?,
        signature: SignatureHex::new(&signature)?,
    })
}

/// Latest state update by amount inside the caller's transaction.
///
/// Amounts are decimal TEXT of arbitrary length, so the maximum is taken
/// with big-integer comparison here rather than SQL `MAX`.
pub(crate) fn latest_state_tx(
    conn: &Connection,
    key: &ChannelKey,
) -> Result<Option<StateUpdateRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, created_at, chain_id, contract_id, channel_id, ts, amount, signature
         FROM state_updates
         WHERE chain_id = ?1 AND contract_id = ?2 AND channel_id = ?3",
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
                    row.get(6)?,
                    row.get(7)?,
                ))
            },
        )?
        .collect::<Result<Vec<RawStateUpdateRow>, _>>()?;

    let mut latest: Option<StateUpdateRecord> = None;
    for raw in rows {
        let record = record_from_raw(raw)?;
        let is_newer = latest
            .as_ref()
            .is_none_or(|current| record.amount > current.amount);
        if is_newer {
            latest = Some(record);
        }
    }
    Ok(latest)
}

fn find_exact_amount(
    conn: &Connection,
    key: &ChannelKey,
    amount: &Wei,
) -> Result<Option<StateUpdateRecord>, StoreError> {
    let raw = conn
        .query_row(
            "SELECT id, created_at, chain_id, contract_id, channel_id, ts, amount, signature
             FROM state_updates
             WHERE chain_id = ?1 AND contract_id = ?2 AND channel_id = ?3 AND amount = ?4",
            params![
                key.chain_id,
                key.contract_id.as_hex(),
                key.channel_id.as_hex(),
                amount.to_string(),
            ],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            },
        )
        .optional()?;
    raw.map(record_from_raw).transpose()
}

/// Computes the admission status inside the caller's transaction.
///
/// The signature is checked against the sender the channel expects (from its
/// create event) when the channel is known, falling back to the sender
/// declared on the update. No known sender means no verifiable signature.
pub(crate) fn status_tx(
    conn: &Connection,
    verifier: &dyn SignatureVerifier,
    update: &StateUpdate,
) -> Result<StateUpdateStatus, StoreError> {
    let channel = channel_status_tx(conn, &update.key, true)?;
    let expected_sender = channel
        .channel
        .as_ref()
        .map(|ch| ch.sender.clone())
        .or_else(|| update.sender.clone());

    // An unbuildable digest (negative or oversized amount) degrades to the
    // empty byte string: no honest signature verifies over it, while an
    // injected accept-all verifier still lets admission reach its own
    // classification of the amount.
    let digest = state_update_digest(
        update.key.chain_id,
        &update.key.contract_id,
        &update.key.channel_id,
        &update.amount,
    )
    .unwrap_or_default();
    let signature_valid =
        expected_sender.is_some_and(|sender| verifier.verify(&sender, &digest, &update.signature));

    let latest = latest_state_tx(conn, &update.key)?;
    let is_latest = latest
        .as_ref()
        .is_none_or(|current| update.amount >= current.amount);
    let added_amount = if is_latest {
        Some(match &latest {
            Some(current) => &update.amount - &current.amount,
            None => update.amount.clone(),
        })
    } else {
        None
    };

    let dupe_status = if find_exact_amount(conn, &update.key, &update.amount)?.is_some() {
        DupeStatus::Dupe
    } else {
        DupeStatus::Distinct
    };

    Ok(StateUpdateStatus {
        signature_valid,
        is_latest,
        added_amount,
        dupe_status,
    })
}
