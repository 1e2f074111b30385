//! Event kinds, typed payloads, wire documents, and the merged event record.
//!
//! Feeders hand the store JSON-shaped documents with optional fields; each
//! document validates into its typed form at the operation boundary, so a
//! missing key surfaces as `<field> must not be null` before anything is
//! written. Payloads stay JSON in storage (key-sorted by `serde_json`) and
//! are re-typed by the reducer.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{BlockHash, ChannelId, DomainError, EthAddress, SignatureHex};
use crate::wei::Wei;

/// The four on-chain occurrences the broker contract emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Channel opened between a sender and a receiver.
    DidCreateChannel,
    /// Additional value deposited into an open channel.
    DidDeposit,
    /// Settlement countdown started by the sender.
    DidStartSettle,
    /// Settlement finalized; the channel is closed.
    DidSettle,
}

impl EventKind {
    /// Stable wire name of the event kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DidCreateChannel => "DidCreateChannel",
            Self::DidDeposit => "DidDeposit",
            Self::DidStartSettle => "DidStartSettle",
            Self::DidSettle => "DidSettle",
        }
    }

    /// Strict parse: unknown names are a domain violation.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::CheckViolation`] for unknown event types.
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "DidCreateChannel" => Ok(Self::DidCreateChannel),
            "DidDeposit" => Ok(Self::DidDeposit),
            "DidStartSettle" => Ok(Self::DidStartSettle),
            "DidSettle" => Ok(Self::DidSettle),
            _ => Err(DomainError::CheckViolation {
                domain: "channel_event_type",
            }),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which log a merged event row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// A locally-declared intent (`channel_intents`).
    Intent,
    /// An observed on-chain event (`channel_events`).
    Chain,
}

impl EventSource {
    /// Intents sort before chain events on otherwise-equal keys, matching
    /// the null-hash-first rule.
    fn rank(self) -> u8 {
        match self {
            Self::Intent => 0,
            Self::Chain => 1,
        }
    }
}

/// The identity of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ChannelKey {
    /// Chain the broker contract lives on.
    pub chain_id: u32,
    /// Broker contract address.
    pub contract_id: EthAddress,
    /// Channel identifier within the contract.
    pub channel_id: ChannelId,
}

/// One row of the merged per-channel event stream.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelEventRecord {
    /// Row id within its source log (insertion order tie-breaker).
    pub id: i64,
    /// Source log of the row.
    pub source: EventSource,
    /// Channel the event belongs to.
    #[serde(flatten)]
    pub key: ChannelKey,
    /// Event timestamp, Unix epoch seconds.
    pub ts: f64,
    /// Block the event was observed in (for intents: the block floor).
    pub block_number: u64,
    /// Block hash; null for uncorrelated intents.
    pub block_hash: Option<BlockHash>,
    /// Whether the block is on the canonical chain (always true for intents).
    pub block_is_valid: bool,
    /// Account that produced the on-chain transaction.
    pub sender: EthAddress,
    /// Event kind.
    pub event_type: EventKind,
    /// Type-specific payload.
    pub fields: Value,
}

impl ChannelEventRecord {
    /// Canonical per-channel ordering: `(block_number, block_hash NULLS
    /// FIRST, ts)` with source and insertion id as deterministic
    /// tie-breakers. An intent at block N precedes a chain event at block N.
    #[must_use]
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.block_number
            .cmp(&other.block_number)
            .then_with(|| match (&self.block_hash, &other.block_hash) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
            .then_with(|| self.ts.total_cmp(&other.ts))
            .then_with(|| self.source.rank().cmp(&other.source.rank()))
            .then_with(|| self.id.cmp(&other.id))
    }
}

// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

/// Payload of `DidCreateChannel`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateChannelFields {
    /// Paying side of the channel.
    pub sender: EthAddress,
    /// Receiving side of the channel.
    pub receiver: EthAddress,
    /// Settlement period in seconds.
    pub settlement_period: u64,
    /// Initial expiry, Unix epoch seconds.
    pub until: f64,
    /// Initial channel value in wei (typically zero).
    pub value: Wei,
}

/// Payload of `DidDeposit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositFields {
    /// Deposited value in wei.
    pub value: Wei,
}

/// Payload of `DidStartSettle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartSettleFields {
    /// Payment amount claimed at settlement start.
    pub payment: Wei,
}

/// Payload of `DidSettle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleFields {
    /// Final payment amount.
    pub payment: Wei,
    /// Remainder returned to the sender.
    pub odd_value: Wei,
}

/// A parsed, type-checked event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// `DidCreateChannel` payload.
    CreateChannel(CreateChannelFields),
    /// `DidDeposit` payload.
    Deposit(DepositFields),
    /// `DidStartSettle` payload.
    StartSettle(StartSettleFields),
    /// `DidSettle` payload.
    Settle(SettleFields),
}

impl EventPayload {
    /// Extracts the typed payload for `kind` from raw JSON fields.
    ///
    /// # Errors
    ///
    /// Returns `<field> must not be null` for missing or null required
    /// fields, `must be text` for numeric wei values, and domain violations
    /// for malformed addresses or amounts.
    pub fn from_value(kind: EventKind, fields: &Value) -> Result<Self, DomainError> {
        match kind {
            EventKind::DidCreateChannel => Ok(Self::CreateChannel(CreateChannelFields {
                sender: address_field(fields, "sender")?,
                receiver: address_field(fields, "receiver")?,
                settlement_period: u64_field(fields, "settlement_period")?,
                until: seconds_field(fields, "until")?,
                value: wei_field(fields, "value")?,
            })),
            EventKind::DidDeposit => Ok(Self::Deposit(DepositFields {
                value: wei_field(fields, "value")?,
            })),
            EventKind::DidStartSettle => Ok(Self::StartSettle(StartSettleFields {
                payment: wei_field(fields, "payment")?,
            })),
            EventKind::DidSettle => Ok(Self::Settle(SettleFields {
                payment: wei_field(fields, "payment")?,
                odd_value: wei_field(fields, "odd_value")?,
            })),
        }
    }
}

fn require<'a>(fields: &'a Value, field: &str) -> Result<&'a Value, DomainError> {
    match fields.get(field) {
        None | Some(Value::Null) => Err(DomainError::null_field(field)),
        Some(value) => Ok(value),
    }
}

fn wei_field(fields: &Value, field: &str) -> Result<Wei, DomainError> {
    match require(fields, field)? {
        Value::String(s) => Wei::new(s),
        Value::Number(_) => Err(DomainError::NotText { domain: "wei" }),
        _ => Err(DomainError::CheckViolation { domain: "wei" }),
    }
}

fn address_field(fields: &Value, field: &str) -> Result<EthAddress, DomainError> {
    match require(fields, field)? {
        Value::String(s) => EthAddress::new(s),
        _ => Err(DomainError::CheckViolation {
            domain: "eth_address",
        }),
    }
}

fn u64_field(fields: &Value, field: &str) -> Result<u64, DomainError> {
    require(fields, field)?
        .as_u64()
        .ok_or(DomainError::CheckViolation {
            domain: "integer_seconds",
        })
}

fn seconds_field(fields: &Value, field: &str) -> Result<f64, DomainError> {
    require(fields, field)?
        .as_f64()
        .ok_or(DomainError::CheckViolation {
            domain: "unix_seconds",
        })
}

// ---------------------------------------------------------------------------
// Wire documents
// ---------------------------------------------------------------------------

fn required<T>(value: Option<T>, field: &str) -> Result<T, DomainError> {
    value.ok_or_else(|| DomainError::null_field(field))
}

fn key_from_parts(
    chain_id: Option<u32>,
    contract_id: Option<&String>,
    channel_id: Option<&String>,
) -> Result<ChannelKey, DomainError> {
    Ok(ChannelKey {
        chain_id: required(chain_id, "chain_id")?,
        contract_id: EthAddress::new(required(contract_id, "contract_id")?)?,
        channel_id: ChannelId::new(required(channel_id, "channel_id")?)?,
    })
}

/// Wire identity of a channel, all fields optional until validated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelKeyDoc {
    /// Chain id.
    pub chain_id: Option<u32>,
    /// Broker contract address (hex).
    pub contract_id: Option<String>,
    /// Channel identifier (hex).
    pub channel_id: Option<String>,
}

impl ChannelKeyDoc {
    /// Builds a key document from typed parts.
    #[must_use]
    pub fn new(chain_id: u32, contract_id: &str, channel_id: &str) -> Self {
        Self {
            chain_id: Some(chain_id),
            contract_id: Some(contract_id.to_string()),
            channel_id: Some(channel_id.to_string()),
        }
    }

    /// Validates into a typed [`ChannelKey`].
    ///
    /// # Errors
    ///
    /// Returns `<field> must not be null` for missing fields and domain
    /// violations for malformed hex.
    pub fn validate(&self) -> Result<ChannelKey, DomainError> {
        key_from_parts(
            self.chain_id,
            self.contract_id.as_ref(),
            self.channel_id.as_ref(),
        )
    }
}

/// Wire document for an observed on-chain channel event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelEventDoc {
    /// Chain id.
    pub chain_id: Option<u32>,
    /// Broker contract address (hex).
    pub contract_id: Option<String>,
    /// Channel identifier (hex).
    pub channel_id: Option<String>,
    /// Event timestamp, Unix epoch seconds.
    pub ts: Option<f64>,
    /// Block number the event was observed in.
    pub block_number: Option<u64>,
    /// Hash of that block.
    pub block_hash: Option<String>,
    /// Transaction sender.
    pub sender: Option<String>,
    /// Event kind name.
    pub event_type: Option<String>,
    /// Type-specific payload.
    pub fields: Option<Value>,
}

/// A validated on-chain channel event, ready for insertion.
#[derive(Debug, Clone)]
pub struct ChannelEventInput {
    /// Channel identity.
    pub key: ChannelKey,
    /// Event timestamp, Unix epoch seconds.
    pub ts: f64,
    /// Block number.
    pub block_number: u64,
    /// Block hash.
    pub block_hash: BlockHash,
    /// Transaction sender.
    pub sender: EthAddress,
    /// Event kind.
    pub event_type: EventKind,
    /// Payload, type-checked against the kind.
    pub fields: Value,
}

impl ChannelEventDoc {
    /// Validates into a typed [`ChannelEventInput`], type-checking the
    /// payload against the event kind.
    ///
    /// # Errors
    ///
    /// Returns `<field> must not be null` for missing fields (including
    /// required payload fields) and domain violations for malformed values.
    pub fn validate(&self) -> Result<ChannelEventInput, DomainError> {
        let key = key_from_parts(
            self.chain_id,
            self.contract_id.as_ref(),
            self.channel_id.as_ref(),
        )?;
        let event_type = EventKind::parse(required(self.event_type.as_ref(), "event_type")?)?;
        let fields = required(self.fields.clone(), "fields")?;
        EventPayload::from_value(event_type, &fields)?;
        Ok(ChannelEventInput {
            key,
            ts: required(self.ts, "ts")?,
            block_number: required(self.block_number, "block_number")?,
            block_hash: BlockHash::new(required(self.block_hash.as_ref(), "block_hash")?)?,
            sender: EthAddress::new(required(self.sender.as_ref(), "sender")?)?,
            event_type,
            fields,
        })
    }

    /// The key portion of this document.
    #[must_use]
    pub fn key_doc(&self) -> ChannelKeyDoc {
        ChannelKeyDoc {
            chain_id: self.chain_id,
            contract_id: self.contract_id.clone(),
            channel_id: self.channel_id.clone(),
        }
    }
}

/// Wire document for a locally-declared intent event. The store assigns the
/// timestamp; `block_number` is the last-known block at declaration time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelIntentDoc {
    /// Chain id.
    pub chain_id: Option<u32>,
    /// Broker contract address (hex).
    pub contract_id: Option<String>,
    /// Channel identifier (hex).
    pub channel_id: Option<String>,
    /// Last-known block number at intent time (the correlation floor).
    pub block_number: Option<u64>,
    /// Transaction sender the anticipated event will carry.
    pub sender: Option<String>,
    /// Anticipated event kind name.
    pub event_type: Option<String>,
    /// Anticipated payload.
    pub fields: Option<Value>,
}

/// A validated intent event, ready for insertion.
#[derive(Debug, Clone)]
pub struct ChannelIntentInput {
    /// Channel identity.
    pub key: ChannelKey,
    /// Correlation floor block number.
    pub block_number: u64,
    /// Anticipated transaction sender.
    pub sender: EthAddress,
    /// Anticipated event kind.
    pub event_type: EventKind,
    /// Anticipated payload, type-checked against the kind.
    pub fields: Value,
}

impl ChannelIntentDoc {
    /// Validates into a typed [`ChannelIntentInput`].
    ///
    /// # Errors
    ///
    /// Returns `<field> must not be null` for missing fields and domain
    /// violations for malformed values.
    pub fn validate(&self) -> Result<ChannelIntentInput, DomainError> {
        let key = key_from_parts(
            self.chain_id,
            self.contract_id.as_ref(),
            self.channel_id.as_ref(),
        )?;
        let event_type = EventKind::parse(required(self.event_type.as_ref(), "event_type")?)?;
        let fields = required(self.fields.clone(), "fields")?;
        EventPayload::from_value(event_type, &fields)?;
        Ok(ChannelIntentInput {
            key,
            block_number: required(self.block_number, "block_number")?,
            sender: EthAddress::new(required(self.sender.as_ref(), "sender")?)?,
            event_type,
            fields,
        })
    }

    /// The key portion of this document.
    #[must_use]
    pub fn key_doc(&self) -> ChannelKeyDoc {
        ChannelKeyDoc {
            chain_id: self.chain_id,
            contract_id: self.contract_id.clone(),
            channel_id: self.channel_id.clone(),
        }
    }
}

/// Wire document for a signed off-chain state update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateUpdateDoc {
    /// Chain id.
    pub chain_id: Option<u32>,
    /// Broker contract address (hex).
    pub contract_id: Option<String>,
    /// Channel identifier (hex).
    pub channel_id: Option<String>,
    /// Update timestamp, Unix epoch seconds.
    pub ts: Option<f64>,
    /// Cumulative payment amount in wei (text on the wire).
    pub amount: Option<Wei>,
    /// 65-byte signature over the update digest (hex).
    pub signature: Option<String>,
    /// Declared sender; used for verification only until the channel's
    /// on-chain sender is known.
    pub sender: Option<String>,
}

/// A validated state update.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    /// Channel identity.
    pub key: ChannelKey,
    /// Update timestamp, Unix epoch seconds.
    pub ts: f64,
    /// Cumulative payment amount.
    pub amount: Wei,
    /// Signature over the update digest.
    pub signature: SignatureHex,
    /// Declared sender, when the wire carried one.
    pub sender: Option<EthAddress>,
}

impl StateUpdateDoc {
    /// Checks that every required field is present, without parsing domains.
    /// Shape errors fail loud; content errors are admission's to classify.
    ///
    /// # Errors
    ///
    /// Returns `<field> must not be null` for the first missing field.
    pub fn validate_presence(&self) -> Result<(), DomainError> {
        required(self.chain_id, "chain_id")?;
        required(self.contract_id.as_ref(), "contract_id")?;
        required(self.channel_id.as_ref(), "channel_id")?;
        required(self.ts, "ts")?;
        required(self.amount.as_ref(), "amount")?;
        required(self.signature.as_ref(), "signature")?;
        Ok(())
    }

    /// Fully validates into a typed [`StateUpdate`].
    ///
    /// # Errors
    ///
    /// Returns `<field> must not be null` for missing fields and domain
    /// violations for malformed hex or amounts.
    pub fn validate(&self) -> Result<StateUpdate, DomainError> {
        self.validate_presence()?;
        let key = key_from_parts(
            self.chain_id,
            self.contract_id.as_ref(),
            self.channel_id.as_ref(),
        )?;
        let sender = self
            .sender
            .as_ref()
            .map(|s| EthAddress::new(s))
            .transpose()?;
        Ok(StateUpdate {
            key,
            ts: required(self.ts, "ts")?,
            amount: required(self.amount.clone(), "amount")?,
            signature: SignatureHex::new(required(self.signature.as_ref(), "signature")?)?,
            sender,
        })
    }

    /// The key portion of this document.
    #[must_use]
    pub fn key_doc(&self) -> ChannelKeyDoc {
        ChannelKeyDoc {
            chain_id: self.chain_id,
            contract_id: self.contract_id.clone(),
            channel_id: self.channel_id.clone(),
        }
    }
}
