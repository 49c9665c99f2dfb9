use serde::{Deserialize, Serialize};

use super::tx_result::TxResult;
use crate::error::ErrorCode;
use crate::utils::NodeId;

/// Reply to a client submission.
///
/// `Redirect` is sent by followers and carries whatever leader hint the
/// node has. `Error` is reserved for failures that produced no `TxResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitReply {
    Result(TxResult),
    Redirect {
        leader_id: Option<NodeId>,
        leader_endpoint: Option<String>,
        term: u64,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl SubmitReply {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        SubmitReply::Error { code, message: message.into() }
    }
}
