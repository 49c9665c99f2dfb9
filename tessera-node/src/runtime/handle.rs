use std::sync::Arc;

use tessera_anchor::{AnchorService, EvidenceBatch};
use tessera_common::env::{ClusterStatus, Command, LedgerEvent, SubmitReply};
use tessera_common::{ErrorCode, NodeId};
use tessera_consensus::Envelope;
use tessera_ledger::ConsensusEvidenceAdapter;
use tokio::sync::{mpsc, oneshot, watch, RwLock};

use crate::error::{NodeError, Result};

/// Requests served by the control loop.
#[derive(Debug)]
pub enum ClientRequest {
    Submit {
        command: Command,
        reply: oneshot::Sender<SubmitReply>,
    },
    Status {
        reply: oneshot::Sender<ClusterStatus>,
    },
}

/// Cheap, cloneable access to a running node.
///
/// Writes and status go through the control loop. Evidence and anchor
/// reads take the shared locks directly.
#[derive(Clone)]
pub struct NodeHandle {
    node_id: NodeId,
    client_tx: mpsc::Sender<ClientRequest>,
    peer_tx: mpsc::Sender<Envelope>,
    evidence: Arc<RwLock<ConsensusEvidenceAdapter>>,
    anchors: Arc<RwLock<AnchorService>>,
    halted: watch::Receiver<Option<String>>,
}

impl NodeHandle {
    pub(crate) fn new(
        node_id: NodeId,
        client_tx: mpsc::Sender<ClientRequest>,
        peer_tx: mpsc::Sender<Envelope>,
        evidence: Arc<RwLock<ConsensusEvidenceAdapter>>,
        anchors: Arc<RwLock<AnchorService>>,
        halted: watch::Receiver<Option<String>>,
    ) -> Self {
        Self {
            node_id,
            client_tx,
            peer_tx,
            evidence,
            anchors,
            halted,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn halt_reason(&self) -> Option<String> {
        self.halted.borrow().clone()
    }

    pub async fn submit(&self, command: Command) -> SubmitReply {
        if let Some(reason) = self.halt_reason() {
            return SubmitReply::error(ErrorCode::ChainCorruption, reason);
        }
        let (reply, rx) = oneshot::channel();
        if self.client_tx.send(ClientRequest::Submit { command, reply }).await.is_err() {
            return SubmitReply::error(ErrorCode::ClusterUnavailable, format!("node {} is not running", self.node_id));
        }
        match rx.await {
            Ok(reply) => reply,
            Err(_) => self.halt_reason().map_or_else(
                || SubmitReply::error(ErrorCode::ClusterUnavailable, "request dropped by control loop"),
                |reason| SubmitReply::error(ErrorCode::ChainCorruption, reason),
            ),
        }
    }

    pub async fn status(&self) -> Result<ClusterStatus> {
        if let Some(reason) = self.halt_reason() {
            return Err(NodeError::Halted(reason));
        }
        let (reply, rx) = oneshot::channel();
        self.client_tx
            .send(ClientRequest::Status { reply })
            .await
            .map_err(|_| NodeError::Stopped)?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    /// Hands a node-to-node envelope to the control loop.
    pub async fn deliver(&self, envelope: Envelope) -> Result<()> {
        self.peer_tx.send(envelope).await.map_err(|_| NodeError::Stopped)
    }

    /// Events in `[start, end]`; open ends default to the whole log.
    pub async fn events(&self, start: Option<u64>, end: Option<u64>) -> Result<Vec<LedgerEvent>> {
        let adapter = self.evidence.read().await;
        let log = adapter.log();
        if log.is_empty() {
            return Ok(Vec::new());
        }
        let start = start.unwrap_or(1);
        let end = end.unwrap_or_else(|| log.last_sequence());
        Ok(log.read(start, end)?.to_vec())
    }

    pub async fn anchors(&self) -> Vec<EvidenceBatch> {
        self.anchors.read().await.batches().to_vec()
    }

    pub fn evidence(&self) -> &Arc<RwLock<ConsensusEvidenceAdapter>> {
        &self.evidence
    }

    pub fn anchor_service(&self) -> &Arc<RwLock<AnchorService>> {
        &self.anchors
    }
}
