use tessera_common::NodeId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("peer {0} is unreachable")]
    Unreachable(NodeId),

    #[error("peer {0} is not part of the cluster")]
    PeerNotFound(NodeId),

    #[error("send to {0} timed out")]
    Timeout(NodeId),

    #[error("transport failure: {0}")]
    Transport(String),
}
