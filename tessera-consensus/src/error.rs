use tessera_common::{NodeId, TesseraError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("not the leader (known leader: {leader:?})")]
    NotLeader { leader: Option<NodeId> },

    #[error("message from unknown peer {0}")]
    UnknownPeer(NodeId),

    #[error("message addressed to {to} delivered to {local}")]
    Misrouted { to: NodeId, local: NodeId },

    #[error("invalid raft config: {0}")]
    InvalidConfig(String),

    #[error("storage failure: {0}")]
    Storage(#[from] TesseraError),
}
