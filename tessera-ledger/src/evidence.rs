//! The hash-chained, append-only evidence log.
//!
//! Events are kept in memory for reads and chain checks; every append is
//! written through to an [`EventStore`] before it becomes visible.

use std::collections::HashMap;

use tessera_common::crypto::hash::ZERO_HASH;
use tessera_common::env::{EventDraft, LedgerEvent};
use tracing::{info, warn};

use crate::binlog::{EventStore, MemoryEventStore};
use crate::error::{LedgerError, Result};

pub struct EvidenceLog {
    events: Vec<LedgerEvent>,
    by_key: HashMap<String, usize>,
    store: Box<dyn EventStore>,
}

impl EvidenceLog {
    pub fn in_memory() -> Self {
        Self {
            events: Vec::new(),
            by_key: HashMap::new(),
            store: Box::new(MemoryEventStore::new()),
        }
    }

    /// Loads and fully re-verifies a persisted log.
    pub async fn open(mut store: Box<dyn EventStore>) -> Result<Self> {
        let events = store.load().await?;
        verify_events(&events, ZERO_HASH, 1)?;

        let by_key = events
            .iter()
            .enumerate()
            .map(|(i, e)| (e.idempotency_key.clone(), i))
            .collect();
        if !events.is_empty() {
            info!("Replayed {} evidence events, head {}", events.len(), short(&events[events.len() - 1].event_hash));
        }
        Ok(Self { events, by_key, store })
    }

    /// Links `draft` onto the head of the chain and persists it.
    pub async fn append(&mut self, draft: EventDraft) -> Result<LedgerEvent> {
        if self.by_key.contains_key(&draft.idempotency_key) {
            return Err(LedgerError::DuplicateKey(draft.idempotency_key));
        }
        if let Some(last) = self.events.last() {
            if draft.committed_index <= last.committed_index {
                return Err(LedgerError::OutOfOrder {
                    index: draft.committed_index,
                    last: last.committed_index,
                });
            }
        }

        let sequence = self.last_sequence() + 1;
        let event = LedgerEvent::seal(draft, sequence, self.head_hash())?;
        self.store.append(&event).await?;

        tracing::info!(target: "consensus", "EVENT:EVIDENCE seq={} id={} index={} hash={}", event.sequence_number, event.event_id, event.committed_index, event.event_hash);
        self.by_key.insert(event.idempotency_key.clone(), self.events.len());
        self.events.push(event.clone());
        Ok(event)
    }

    /// Events with sequence numbers in `[start, end]`.
    pub fn read(&self, start: u64, end: u64) -> Result<&[LedgerEvent]> {
        let (lo, hi) = self.bounds(start, end)?;
        Ok(&self.events[lo..hi])
    }

    /// Recomputes hashes and links for `[start, end]`.
    pub fn verify_chain(&self, start: u64, end: u64) -> Result<()> {
        let (lo, hi) = self.bounds(start, end)?;
        let prev = if lo == 0 { ZERO_HASH } else { self.events[lo - 1].event_hash.as_str() };
        verify_events(&self.events[lo..hi], prev, start)
    }

    pub fn is_intact(&self, start: u64, end: u64) -> bool {
        self.verify_chain(start, end).is_ok()
    }

    pub fn verify_all(&self) -> Result<()> {
        verify_events(&self.events, ZERO_HASH, 1)
    }

    pub fn get(&self, sequence: u64) -> Option<&LedgerEvent> {
        if sequence == 0 {
            return None;
        }
        self.events.get((sequence - 1) as usize)
    }

    pub fn find_by_key(&self, idempotency_key: &str) -> Option<&LedgerEvent> {
        self.by_key.get(idempotency_key).map(|i| &self.events[*i])
    }

    pub fn last(&self) -> Option<&LedgerEvent> {
        self.events.last()
    }

    pub fn last_sequence(&self) -> u64 {
        self.events.len() as u64
    }

    pub fn head_hash(&self) -> &str {
        self.events.last().map(|e| e.event_hash.as_str()).unwrap_or(ZERO_HASH)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    fn bounds(&self, start: u64, end: u64) -> Result<(usize, usize)> {
        let len = self.last_sequence();
        if start == 0 || start > end || end > len {
            return Err(LedgerError::OutOfRange { start, end, len });
        }
        Ok(((start - 1) as usize, end as usize))
    }
}

/// Checks that `events` form a valid chain starting at `first_sequence`
/// right after an event whose hash is `previous_hash`.
pub fn verify_events(events: &[LedgerEvent], previous_hash: &str, first_sequence: u64) -> Result<()> {
    let mut prev = previous_hash.to_string();
    let mut last_index = 0u64;
    for (offset, event) in events.iter().enumerate() {
        let expected_seq = first_sequence + offset as u64;
        let fail = |reason: String| {
            warn!("evidence chain broken at {}: {}", expected_seq, reason);
            Err(LedgerError::ChainCorruption { sequence: expected_seq, reason })
        };

        if event.sequence_number != expected_seq {
            return fail(format!("sequence number {} out of place", event.sequence_number));
        }
        if event.previous_event_hash != prev {
            return fail(format!(
                "previous_event_hash {} does not match {}",
                short(&event.previous_event_hash),
                short(&prev)
            ));
        }
        if !event.has_valid_hash() {
            return fail("event_hash does not match event fields".to_string());
        }
        if offset > 0 && event.committed_index <= last_index {
            return fail(format!("committed_index {} not increasing", event.committed_index));
        }
        last_index = event.committed_index;
        prev = event.event_hash.clone();
    }
    Ok(())
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::crypto::hash::digest;
    use tessera_common::env::CommandKind;

    fn draft(index: u64) -> EventDraft {
        EventDraft {
            event_type: "chat.message".to_string(),
            command_type: CommandKind::Chat,
            idempotency_key: format!("key-{}", index),
            payload_hash: digest(format!("payload-{}", index).as_bytes()),
            committed_term: 1,
            committed_index: index,
        }
    }

    async fn log_with(n: u64) -> EvidenceLog {
        let mut log = EvidenceLog::in_memory();
        for i in 1..=n {
            log.append(draft(i + 1)).await.unwrap();
        }
        log
    }

    #[tokio::test]
    async fn genesis_links_to_zero_hash() {
        let log = log_with(1).await;
        let first = log.get(1).unwrap();
        assert_eq!(first.previous_event_hash, ZERO_HASH);
        assert_eq!(first.sequence_number, 1);
    }

    #[tokio::test]
    async fn chain_links_every_event() {
        let log = log_with(10).await;
        for seq in 2..=10 {
            assert_eq!(log.get(seq).unwrap().previous_event_hash, log.get(seq - 1).unwrap().event_hash);
        }
        assert!(log.verify_chain(1, 10).is_ok());
        assert!(log.verify_chain(4, 7).is_ok());
        assert_eq!(log.head_hash(), log.get(10).unwrap().event_hash);
    }

    #[tokio::test]
    async fn tampered_payload_hash_is_detected() {
        let mut log = log_with(10).await;
        log.events[4].payload_hash = digest(b"forged");
        match log.verify_chain(1, 10) {
            Err(LedgerError::ChainCorruption { sequence, .. }) => assert_eq!(sequence, 5),
            other => panic!("expected corruption, got {:?}", other),
        }
        assert!(log.verify_chain(1, 4).is_ok());
        assert!(!log.is_intact(5, 5));
    }

    #[tokio::test]
    async fn rehashed_tamper_breaks_the_next_link() {
        let mut log = log_with(5).await;
        log.events[1].payload_hash = digest(b"forged");
        log.events[1].event_hash = log.events[1].compute_hash().unwrap();
        match log.verify_all() {
            Err(LedgerError::ChainCorruption { sequence, .. }) => assert_eq!(sequence, 3),
            other => panic!("expected corruption, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn duplicate_key_and_reordering_are_rejected() {
        let mut log = log_with(3).await;
        assert!(matches!(log.append(draft(2)).await, Err(LedgerError::DuplicateKey(_))));

        let mut stale = draft(99);
        stale.committed_index = 2;
        assert!(matches!(log.append(stale).await, Err(LedgerError::OutOfOrder { .. })));
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn read_enforces_bounds() {
        let log = log_with(4).await;
        assert_eq!(log.read(2, 3).unwrap().len(), 2);
        assert!(matches!(log.read(0, 2), Err(LedgerError::OutOfRange { .. })));
        assert!(matches!(log.read(3, 5), Err(LedgerError::OutOfRange { .. })));
        assert!(matches!(log.read(3, 2), Err(LedgerError::OutOfRange { .. })));
    }

    #[tokio::test]
    async fn replay_from_store_is_deterministic() {
        let store = MemoryEventStore::new();
        let mut log = EvidenceLog::open(Box::new(store.clone())).await.unwrap();
        for i in 1..=6 {
            log.append(draft(i)).await.unwrap();
        }

        let replayed = EvidenceLog::open(Box::new(store.clone())).await.unwrap();
        assert_eq!(replayed.events(), log.events());
        assert_eq!(replayed.find_by_key("key-4").map(|e| e.sequence_number), Some(4));
    }
}
