use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tessera_common::NodeId;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::trace;

use super::error::NetworkError;
use super::traits::Transport;
use crate::raft::message::Envelope;

const MAILBOX_CAPACITY: usize = 4096;

#[derive(Default)]
struct Switchboard {
    mailboxes: HashMap<NodeId, Sender<Envelope>>,
    blocked: HashSet<(NodeId, NodeId)>,
}

/// In-process network for tests and local simulations, with partition
/// control.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    inner: Arc<Mutex<Switchboard>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Switchboard> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates the mailbox for `id`, replacing any previous one.
    pub fn register(&self, id: NodeId) -> (InMemoryTransport, Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.lock().mailboxes.insert(id.clone(), tx);
        (InMemoryTransport { id, network: self.clone() }, rx)
    }

    /// Removes the mailbox, as if the process had died.
    pub fn disconnect(&self, id: &NodeId) {
        self.lock().mailboxes.remove(id);
    }

    /// Splits the cluster: links between nodes of different groups drop
    /// every message. Nodes not listed keep their existing links.
    pub fn partition(&self, groups: &[Vec<NodeId>]) {
        let mut board = self.lock();
        for (gi, a_group) in groups.iter().enumerate() {
            for (gj, b_group) in groups.iter().enumerate() {
                if gi == gj {
                    continue;
                }
                for a in a_group {
                    for b in b_group {
                        board.blocked.insert((a.clone(), b.clone()));
                    }
                }
            }
        }
    }

    /// Cuts `id` off from every registered node in both directions.
    pub fn isolate(&self, id: &NodeId) {
        let mut board = self.lock();
        let others: Vec<NodeId> = board.mailboxes.keys().filter(|k| *k != id).cloned().collect();
        for other in others {
            board.blocked.insert((id.clone(), other.clone()));
            board.blocked.insert((other, id.clone()));
        }
    }

    pub fn heal(&self) {
        self.lock().blocked.clear();
    }

    fn route(&self, from: &NodeId, to: &NodeId) -> Result<Sender<Envelope>, NetworkError> {
        let board = self.lock();
        if board.blocked.contains(&(from.clone(), to.clone())) {
            return Err(NetworkError::Unreachable(to.clone()));
        }
        board
            .mailboxes
            .get(to)
            .cloned()
            .ok_or_else(|| NetworkError::Unreachable(to.clone()))
    }
}

/// A node's handle onto an [`InMemoryNetwork`].
#[derive(Clone)]
pub struct InMemoryTransport {
    id: NodeId,
    network: InMemoryNetwork,
}

impl InMemoryTransport {
    pub fn id(&self) -> &NodeId {
        &self.id
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, envelope: Envelope) -> Result<(), NetworkError> {
        let to = envelope.to.clone();
        let mailbox = self.network.route(&self.id, &to)?;
        trace!("{} -> {}: {}", self.id, to, envelope.message.kind());
        mailbox.send(envelope).await.map_err(|_| NetworkError::Unreachable(to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::message::{RaftMessage, RequestVoteReply};

    fn envelope(from: &str, to: &str) -> Envelope {
        Envelope {
            from: NodeId::from(from),
            to: NodeId::from(to),
            message: RaftMessage::RequestVoteResponse(RequestVoteReply { term: 1, vote_granted: true }),
        }
    }

    #[tokio::test]
    async fn delivers_between_registered_nodes() {
        let net = InMemoryNetwork::new();
        let (t1, _rx1) = net.register(NodeId::from("n1"));
        let (_t2, mut rx2) = net.register(NodeId::from("n2"));

        t1.send(envelope("n1", "n2")).await.unwrap();
        let got = rx2.recv().await.unwrap();
        assert_eq!(got.from, NodeId::from("n1"));
    }

    #[tokio::test]
    async fn partition_blocks_and_heal_restores() {
        let net = InMemoryNetwork::new();
        let (t1, _rx1) = net.register(NodeId::from("n1"));
        let (_t2, mut rx2) = net.register(NodeId::from("n2"));
        let (_t3, _rx3) = net.register(NodeId::from("n3"));

        net.partition(&[vec![NodeId::from("n1")], vec![NodeId::from("n2"), NodeId::from("n3")]]);
        assert_eq!(
            t1.send(envelope("n1", "n2")).await,
            Err(NetworkError::Unreachable(NodeId::from("n2")))
        );

        net.heal();
        t1.send(envelope("n1", "n2")).await.unwrap();
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn disconnected_node_is_unreachable() {
        let net = InMemoryNetwork::new();
        let (t1, _rx1) = net.register(NodeId::from("n1"));
        let (_t2, _rx2) = net.register(NodeId::from("n2"));
        net.disconnect(&NodeId::from("n2"));
        assert!(t1.send(envelope("n1", "n2")).await.is_err());

        let (_t2, _rx2) = net.register(NodeId::from("n2"));
        assert!(t1.send(envelope("n1", "n2")).await.is_ok());
        net.isolate(&NodeId::from("n1"));
        assert!(t1.send(envelope("n1", "n2")).await.is_err());
    }
}
