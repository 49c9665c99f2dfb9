//! Periodic sealing of evidence ranges.
//!
//! The cadence lives on the leader: [`AnchorService::advance`] counts
//! ticks and [`AnchorService::due_range`] names the next range once
//! `batch_size` events are pending or `interval_ticks` have passed with at
//! least one pending event. The leader replicates that range as a seal
//! marker, and every replica seals it through
//! [`AnchorService::seal_marked`] when the marker commits. The sealed
//! frontier is therefore the same on every node.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tessera_common::crypto::merkle::{self, InclusionProof};
use tessera_common::env::LedgerEvent;
use tessera_common::utils::time::current_time_millis;
use tessera_common::NodeId;
use tessera_ledger::EvidenceLog;
use tracing::{debug, info, warn};

use crate::batch::EvidenceBatch;
use crate::error::{AnchorError, Result};
use crate::signer::{verify_signature, Signer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorConfig {
    pub batch_size: u64,
    pub interval_ticks: u64,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval_ticks: 5000,
        }
    }
}

pub struct AnchorService {
    config: AnchorConfig,
    signer: Box<dyn Signer>,
    node_id: NodeId,
    batches: Vec<EvidenceBatch>,
    ticks_since_seal: u64,
    path: Option<PathBuf>,
}

impl AnchorService {
    pub fn new(config: AnchorConfig, signer: Box<dyn Signer>, node_id: NodeId) -> Self {
        Self {
            config,
            signer,
            node_id,
            batches: Vec::new(),
            ticks_since_seal: 0,
            path: None,
        }
    }

    /// Persists batches under `<data_dir>/anchors/batches.json`, loading any
    /// already there.
    pub fn open(config: AnchorConfig, signer: Box<dyn Signer>, node_id: NodeId, data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("anchors");
        fs::create_dir_all(&dir)?;
        let path = dir.join("batches.json");
        let batches: Vec<EvidenceBatch> = if path.exists() {
            serde_json::from_slice(&fs::read(&path)?)?
        } else {
            Vec::new()
        };
        if let Some(last) = batches.last() {
            info!("Loaded {} anchor batches, last sealed seq {}", batches.len(), last.end_seq);
        }
        Ok(Self {
            config,
            signer,
            node_id,
            batches,
            ticks_since_seal: 0,
            path: Some(path),
        })
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    pub fn signer(&self) -> &dyn Signer {
        self.signer.as_ref()
    }

    pub fn batches(&self) -> &[EvidenceBatch] {
        &self.batches
    }

    pub fn batch_for(&self, sequence: u64) -> Option<&EvidenceBatch> {
        self.batches.iter().rev().find(|b| b.contains(sequence))
    }

    pub fn last_sealed_seq(&self) -> u64 {
        self.batches.last().map(|b| b.end_seq).unwrap_or(0)
    }

    pub fn advance(&mut self, ticks: u64) {
        self.ticks_since_seal = self.ticks_since_seal.saturating_add(ticks);
    }

    pub fn pending(&self, log: &EvidenceLog) -> u64 {
        log.last_sequence().saturating_sub(self.last_sealed_seq())
    }

    pub fn should_seal(&self, log: &EvidenceLog) -> bool {
        let pending = self.pending(log);
        pending > 0 && (pending >= self.config.batch_size || self.ticks_since_seal >= self.config.interval_ticks)
    }

    /// The next range to seal if the cadence says so. At most `batch_size`
    /// events go into one batch.
    pub fn due_range(&self, log: &EvidenceLog) -> Option<(u64, u64)> {
        if !self.should_seal(log) {
            return None;
        }
        let start = self.last_sealed_seq() + 1;
        let end = log.last_sequence().min(start.saturating_add(self.config.batch_size.max(1) - 1));
        Some((start, end))
    }

    /// Seals the due range directly, for a single process that owns both
    /// the log and the cadence.
    pub fn maybe_seal(&mut self, log: &EvidenceLog, epoch: u64) -> Result<Option<EvidenceBatch>> {
        match self.due_range(log) {
            Some((start, end)) => self.seal(log, start, end, epoch).map(Some),
            None => Ok(None),
        }
    }

    /// Applies a committed seal marker. Markers that do not continue the
    /// sealed frontier were overtaken by another marker and are skipped, the
    /// same way on every replica.
    pub fn seal_marked(&mut self, log: &EvidenceLog, start: u64, end: u64, epoch: u64) -> Result<Option<EvidenceBatch>> {
        let last_sealed = self.last_sealed_seq();
        if start != last_sealed + 1 || end < start {
            debug!("skipping seal marker {}..={} (sealed through {})", start, end, last_sealed);
            return Ok(None);
        }
        self.seal(log, start, end, epoch).map(Some)
    }

    /// Seals `[start, end]`. Ranges only move forward: `start` must follow
    /// the last sealed sequence.
    pub fn seal(&mut self, log: &EvidenceLog, start: u64, end: u64, epoch: u64) -> Result<EvidenceBatch> {
        let last_sealed = self.last_sealed_seq();
        if start != last_sealed + 1 || end < start {
            return Err(AnchorError::NotContiguous { start, end, last_sealed });
        }
        log.verify_chain(start, end)?;

        let events = log.read(start, end)?;
        let merkle_root = merkle::merkle_root(&leaves(events))?;
        let mut batch = EvidenceBatch {
            epoch,
            start_seq: start,
            end_seq: end,
            merkle_root,
            signature: Vec::new(),
            signer_mode: self.signer.mode(),
            public_key: self.signer.public_key(),
            sealed_by: self.node_id.clone(),
            sealed_at: current_time_millis(),
        };
        batch.signature = self.signer.sign(&batch.header().signing_bytes()?)?;

        self.batches.push(batch.clone());
        if let Err(e) = self.persist() {
            self.batches.pop();
            return Err(e);
        }
        self.ticks_since_seal = 0;

        tracing::info!(target: "consensus", "EVENT:SEAL epoch={} start={} end={} root={} mode={}", epoch, start, end, batch.merkle_root, batch.signer_mode);
        Ok(batch)
    }

    /// Re-checks `batch` against the events currently in `log`.
    pub fn verify(&self, batch: &EvidenceBatch, log: &EvidenceLog) -> bool {
        let events = match log.read(batch.start_seq, batch.end_seq) {
            Ok(events) => events,
            Err(e) => {
                warn!("cannot read batch range {}..={}: {}", batch.start_seq, batch.end_seq, e);
                return false;
            }
        };
        match verify_batch(batch, events) {
            Ok(()) => true,
            Err(e) => {
                warn!("batch {}..={} failed verification: {}", batch.start_seq, batch.end_seq, e);
                false
            }
        }
    }

    pub fn prove_inclusion(batch: &EvidenceBatch, events: &[LedgerEvent], sequence: u64) -> Result<InclusionProof> {
        check_range(batch, events)?;
        if !batch.contains(sequence) {
            return Err(AnchorError::BadEvent {
                sequence,
                reason: format!("outside batch {}..={}", batch.start_seq, batch.end_seq),
            });
        }
        Ok(merkle::prove_inclusion(&leaves(events), (sequence - batch.start_seq) as usize)?)
    }

    pub fn verify_inclusion(batch: &EvidenceBatch, event: &LedgerEvent, proof: &InclusionProof) -> bool {
        batch.contains(event.sequence_number)
            && proof.leaf_index as u64 == event.sequence_number - batch.start_seq
            && event.has_valid_hash()
            && merkle::verify_inclusion(&batch.merkle_root, &event.event_hash, proof)
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(&self.batches)?;
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        debug!("persisted {} anchor batches to {:?}", self.batches.len(), path);
        Ok(())
    }
}

/// Recomputes every event hash and link in the range, the Merkle root and
/// the signature.
pub fn verify_batch(batch: &EvidenceBatch, events: &[LedgerEvent]) -> Result<()> {
    check_range(batch, events)?;

    for (offset, event) in events.iter().enumerate() {
        let sequence = batch.start_seq + offset as u64;
        let bad = |reason: &str| AnchorError::BadEvent {
            sequence,
            reason: reason.to_string(),
        };
        if event.sequence_number != sequence {
            return Err(bad("sequence number out of place"));
        }
        if !event.has_valid_hash() {
            return Err(bad("event_hash does not match fields"));
        }
        if offset > 0 && event.previous_event_hash != events[offset - 1].event_hash {
            return Err(bad("previous_event_hash does not link"));
        }
    }

    let recomputed = merkle::merkle_root(&leaves(events))?;
    if recomputed != batch.merkle_root {
        return Err(AnchorError::RootMismatch {
            sealed: batch.merkle_root.clone(),
            recomputed,
        });
    }

    let message = batch.header().signing_bytes()?;
    if !verify_signature(batch.signer_mode, &batch.public_key, &message, &batch.signature) {
        return Err(AnchorError::BadSignature);
    }
    Ok(())
}

fn check_range(batch: &EvidenceBatch, events: &[LedgerEvent]) -> Result<()> {
    if batch.end_seq < batch.start_seq || events.len() as u64 != batch.len() {
        return Err(AnchorError::RangeMismatch {
            expected: batch.len(),
            actual: events.len() as u64,
        });
    }
    Ok(())
}

fn leaves(events: &[LedgerEvent]) -> Vec<String> {
    events.iter().map(|e| e.event_hash.clone()).collect()
}
