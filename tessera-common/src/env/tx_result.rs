use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::utils::time::current_time_millis;
use crate::utils::NodeId;

/// Outcome of a submission as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    pub committed: bool,
    pub evidence_event_ids: Vec<String>,
    pub leader_term: u64,
    pub leader_node_id: NodeId,
    pub commit_index: u64,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TxResult {
    pub fn committed(event_ids: Vec<String>, leader: NodeId, term: u64, commit_index: u64) -> Self {
        Self {
            committed: true,
            evidence_event_ids: event_ids,
            leader_term: term,
            leader_node_id: leader,
            commit_index,
            timestamp: current_time_millis(),
            error_code: None,
            error_message: None,
        }
    }

    /// A replay of an earlier commit. Same event ids, flagged as a duplicate.
    pub fn duplicate(event_ids: Vec<String>, leader: NodeId, term: u64, commit_index: u64) -> Self {
        Self {
            error_code: Some(ErrorCode::DuplicateEntry),
            error_message: Some("idempotency key already committed".to_string()),
            ..Self::committed(event_ids, leader, term, commit_index)
        }
    }

    pub fn rejected(code: ErrorCode, message: impl Into<String>, leader: NodeId, term: u64, commit_index: u64) -> Self {
        Self {
            committed: false,
            evidence_event_ids: Vec::new(),
            leader_term: term,
            leader_node_id: leader,
            commit_index,
            timestamp: current_time_millis(),
            error_code: Some(code),
            error_message: Some(message.into()),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.error_code == Some(ErrorCode::DuplicateEntry)
    }
}
