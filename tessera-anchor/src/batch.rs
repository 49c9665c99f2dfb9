use serde::{Deserialize, Serialize};
use tessera_common::NodeId;

use crate::error::Result;
use crate::signer::SignerMode;

/// The part of a batch covered by its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeader {
    pub epoch: u64,
    pub start_seq: u64,
    pub end_seq: u64,
    pub merkle_root: String,
}

impl BatchHeader {
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

/// A sealed, contiguous range `[start_seq, end_seq]` of evidence events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceBatch {
    pub epoch: u64,
    pub start_seq: u64,
    pub end_seq: u64,
    pub merkle_root: String,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
    pub signer_mode: SignerMode,
    #[serde(with = "hex::serde")]
    pub public_key: Vec<u8>,
    pub sealed_by: NodeId,
    pub sealed_at: i64,
}

impl EvidenceBatch {
    pub fn header(&self) -> BatchHeader {
        BatchHeader {
            epoch: self.epoch,
            start_seq: self.start_seq,
            end_seq: self.end_seq,
            merkle_root: self.merkle_root.clone(),
        }
    }

    /// Number of events covered; 0 for an inverted range.
    pub fn len(&self) -> u64 {
        if self.end_seq < self.start_seq {
            return 0;
        }
        (self.end_seq - self.start_seq).saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        self.end_seq < self.start_seq
    }

    pub fn contains(&self, sequence: u64) -> bool {
        (self.start_seq..=self.end_seq).contains(&sequence)
    }
}
