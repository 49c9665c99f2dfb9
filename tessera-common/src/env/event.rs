//! event.rs
//!
//! The hash-chained evidence record.
//!
//! `event_hash` is the SHA-256 of the bincode encoding of every other field
//! (see [`EventHashView`]). Chaining happens through `previous_event_hash`,
//! so rewriting any historical field breaks every later link.

use serde::{Deserialize, Serialize};

use super::command::CommandKind;
use crate::crypto::hash::{digest, digest_parts};
use crate::error::Result;

/// Fields decided before the log assigns position and linkage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub event_type: String,
    pub command_type: CommandKind,
    pub idempotency_key: String,
    pub payload_hash: String,
    pub committed_term: u64,
    pub committed_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_id: String,
    pub event_type: String,
    pub command_type: CommandKind,
    pub idempotency_key: String,
    pub payload_hash: String,
    pub previous_event_hash: String,
    pub event_hash: String,
    /// 1-based position in the evidence log.
    pub sequence_number: u64,
    pub committed_term: u64,
    pub committed_index: u64,
}

#[derive(Serialize)]
struct EventHashView<'a> {
    event_id: &'a str,
    event_type: &'a str,
    command_type: CommandKind,
    idempotency_key: &'a str,
    payload_hash: &'a str,
    previous_event_hash: &'a str,
    sequence_number: u64,
    committed_term: u64,
    committed_index: u64,
}

/// Canonical bytes covered by `event_hash`.
pub fn hashing_bytes(e: &LedgerEvent) -> Result<Vec<u8>> {
    Ok(bincode::serialize(&EventHashView {
        event_id: &e.event_id,
        event_type: &e.event_type,
        command_type: e.command_type,
        idempotency_key: &e.idempotency_key,
        payload_hash: &e.payload_hash,
        previous_event_hash: &e.previous_event_hash,
        sequence_number: e.sequence_number,
        committed_term: e.committed_term,
        committed_index: e.committed_index,
    })?)
}

/// `evt-` followed by 16 hex chars derived from the commit position and key.
///
/// Replaying the same committed entry always yields the same id.
pub fn derive_event_id(committed_term: u64, committed_index: u64, idempotency_key: &str) -> String {
    let h = digest_parts(&[
        &committed_term.to_le_bytes(),
        &committed_index.to_le_bytes(),
        idempotency_key.as_bytes(),
    ]);
    format!("evt-{}", &hex::encode(h)[..16])
}

impl LedgerEvent {
    /// Builds the event that follows `previous_event_hash` at `sequence_number`.
    pub fn seal(draft: EventDraft, sequence_number: u64, previous_event_hash: &str) -> Result<Self> {
        let mut event = LedgerEvent {
            event_id: derive_event_id(draft.committed_term, draft.committed_index, &draft.idempotency_key),
            event_type: draft.event_type,
            command_type: draft.command_type,
            idempotency_key: draft.idempotency_key,
            payload_hash: draft.payload_hash,
            previous_event_hash: previous_event_hash.to_string(),
            event_hash: String::new(),
            sequence_number,
            committed_term: draft.committed_term,
            committed_index: draft.committed_index,
        };
        event.event_hash = event.compute_hash()?;
        Ok(event)
    }

    pub fn compute_hash(&self) -> Result<String> {
        Ok(digest(&hashing_bytes(self)?))
    }

    /// True when the stored `event_hash` matches the fields.
    pub fn has_valid_hash(&self) -> bool {
        matches!(self.compute_hash(), Ok(h) if h == self.event_hash)
    }
}
