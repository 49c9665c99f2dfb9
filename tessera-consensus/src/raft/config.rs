use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;

/// Timing and batching knobs, all expressed in logical ticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftConfig {
    pub election_timeout_min: u64,
    pub election_timeout_max: u64,
    pub heartbeat_interval: u64,
    /// Cap on entries carried by a single AppendEntries.
    pub max_entries_per_message: usize,
    /// Leader steps down after a full election window without hearing
    /// from a majority.
    pub check_quorum: bool,
    /// Seeds the election jitter. `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            max_entries_per_message: 64,
            check_quorum: true,
            seed: None,
        }
    }
}

impl RaftConfig {
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.election_timeout_min == 0 || self.election_timeout_min > self.election_timeout_max {
            return Err(ConsensusError::InvalidConfig(format!(
                "election timeout range [{}, {}] is empty",
                self.election_timeout_min, self.election_timeout_max
            )));
        }
        if self.heartbeat_interval == 0 || self.heartbeat_interval >= self.election_timeout_min {
            return Err(ConsensusError::InvalidConfig(format!(
                "heartbeat interval {} must be positive and below election_timeout_min {}",
                self.heartbeat_interval, self.election_timeout_min
            )));
        }
        if self.max_entries_per_message == 0 {
            return Err(ConsensusError::InvalidConfig("max_entries_per_message must be positive".into()));
        }
        Ok(())
    }
}
