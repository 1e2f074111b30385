//! # paychan-core
//!
//! Persistent ledger for unidirectional off-chain payment channels anchored
//! to an on-chain broker contract.
//!
//! For each channel the store maintains two parallel event streams (signed
//! off-chain state updates, and observed on-chain channel events) plus a
//! third stream of locally-declared intent events, and derives the channel's
//! aggregate state on demand: lifecycle phase, cumulative value, latest
//! payment, remaining balance, and validity.
//!
//! ## Architecture
//!
//! ```text
//! feeders ──> insert_channel_event ──┐
//!             insert_channel_intent ─┤   append-only logs (SQLite)
//!             insert_state_update ───┤   + intent correlation
//!             set_recent_blocks ─────┘   + validity flips on reorg
//!                                          │
//! readers <── get_channel_status <── pure fold over surviving events
//! ```
//!
//! The chain stream is non-monotonic: a reorg may orphan previously observed
//! blocks. Aggregates are therefore never stored: every read folds the
//! surviving events in canonical order, so a reorg is fully absorbed by
//! flipping validity bits.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use paychan_core::{ChannelStore, ChannelKeyDoc, Secp256k1Verifier};
//!
//! # fn example() -> Result<(), paychan_core::StoreError> {
//! let store = ChannelStore::open("channels.db", Arc::new(Secp256k1Verifier::new()))?;
//! let key = ChannelKeyDoc::new(1, &"ab".repeat(20), &"cd".repeat(32));
//! let status = store.get_channel_status(&key, true)?;
//! println!("state: {:?}", status.channel.map(|c| c.state));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod crypto;
pub mod domain;
pub mod events;
pub mod pack;
pub mod reducer;
pub mod store;
pub mod wei;

pub use crypto::{state_update_digest, AcceptAllVerifier, Secp256k1Verifier, SignatureVerifier};
pub use domain::{BlockHash, ChannelId, DomainError, EthAddress, SignatureHex};
pub use events::{
    ChannelEventDoc, ChannelEventRecord, ChannelIntentDoc, ChannelKey, ChannelKeyDoc, EventKind,
    EventSource, StateUpdateDoc,
};
pub use reducer::{Channel, ChannelState};
pub use store::{
    AdmissionError, ChannelStatus, ChannelStore, DupeStatus, RejectReason, RejectionDocument,
    ReorgOutcome, StateUpdateOutcome, StateUpdateRecord, StateUpdateStatus, StoreError,
    VersionInfo,
};
pub use wei::Wei;
