use tessera_common::ErrorCode;
use thiserror::Error;

/// Failure of a single call to one node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("{0} timed out")]
    Timeout(String),

    #[error("cannot reach {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// The node answered with a typed error body.
    #[error("{endpoint} answered {code}: {message}")]
    Node {
        endpoint: String,
        code: ErrorCode,
        message: String,
    },

    #[error("{endpoint} answered HTTP {status}")]
    Http { endpoint: String, status: u16 },

    #[error("bad response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
}

impl ClientError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// A non-transient error reply; retrying the same command won't help.
    #[error("rejected with {code}: {message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("cluster unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },

    #[error("no node endpoints configured")]
    NoEndpoints,

    #[error("client setup failed: {0}")]
    Setup(String),
}

impl ClusterError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ClusterError::Rejected { code, .. } => *code,
            ClusterError::Unavailable { .. } | ClusterError::NoEndpoints => ErrorCode::ClusterUnavailable,
            ClusterError::Setup(_) => ErrorCode::Internal,
        }
    }
}
