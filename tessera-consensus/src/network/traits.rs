use async_trait::async_trait;

use super::error::NetworkError;
use crate::raft::message::Envelope;

/// Delivers one-way envelopes to other members.
///
/// A successful `send` only means the envelope was handed to the peer's
/// inbox; replies come back as separate envelopes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<(), NetworkError>;
}
