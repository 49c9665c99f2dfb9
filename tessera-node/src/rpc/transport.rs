use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tessera_common::NodeId;
use tessera_consensus::network::{NetworkError, Transport};
use tessera_consensus::Envelope;
use tracing::trace;

use super::RAFT_PATH;

/// Posts envelopes as JSON to `{endpoint}/v1/raft` of the target node.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoints: BTreeMap<NodeId, String>,
}

impl HttpTransport {
    pub fn new(endpoints: BTreeMap<NodeId, String>, timeout: Duration) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NetworkError::Transport(e.to_string()))?;
        Ok(Self { client, endpoints })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, envelope: Envelope) -> Result<(), NetworkError> {
        let to = envelope.to.clone();
        let endpoint = self
            .endpoints
            .get(&to)
            .ok_or_else(|| NetworkError::PeerNotFound(to.clone()))?;
        let url = format!("{}{}", endpoint.trim_end_matches('/'), RAFT_PATH);
        trace!("POST {} {}", url, envelope.message.kind());

        let response = self.client.post(&url).json(&envelope).send().await.map_err(|e| {
            if e.is_timeout() {
                NetworkError::Timeout(to.clone())
            } else if e.is_connect() {
                NetworkError::Unreachable(to.clone())
            } else {
                NetworkError::Transport(e.to_string())
            }
        })?;
        if !response.status().is_success() {
            return Err(NetworkError::Transport(format!("{} answered {}", to, response.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_consensus::raft::message::{RaftMessage, RequestVoteReply};

    #[tokio::test]
    async fn unknown_peer_is_rejected_without_io() {
        let transport = HttpTransport::new(BTreeMap::new(), Duration::from_millis(50)).unwrap();
        let envelope = Envelope {
            from: NodeId::from("n1"),
            to: NodeId::from("n9"),
            message: RaftMessage::RequestVoteResponse(RequestVoteReply { term: 1, vote_granted: false }),
        };
        assert_eq!(
            transport.send(envelope).await,
            Err(NetworkError::PeerNotFound(NodeId::from("n9")))
        );
    }
}
