use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tessera_anchor::{signer_for_env, AnchorService};
use tessera_consensus::network::Transport;
use tessera_consensus::storage::{FileStorage, MemoryStorage};
use tessera_consensus::{Envelope, RaftNode, RaftStorage};
use tessera_ledger::{Binlog, ConsensusEvidenceAdapter, EvidenceLog, MapperRegistry};
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use super::handle::NodeHandle;
use super::maestro::{Maestro, WriterLink};
use super::pipeline::EvidencePipeline;
use super::writer;
use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::rpc::transport::HttpTransport;

const CLIENT_QUEUE: usize = 1024;
const PEER_QUEUE: usize = 4096;

/// A started node: its handle plus the tasks behind it.
pub struct NodeRuntime {
    pub handle: NodeHandle,
    maestro: JoinHandle<()>,
    pipeline: JoinHandle<()>,
    writer: JoinHandle<()>,
    forwarder: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl NodeRuntime {
    /// Stops the control loop and waits for pending raft state and evidence
    /// to be written.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        let _ = (&mut self.maestro).await;
        let _ = (&mut self.writer).await;
        let _ = (&mut self.pipeline).await;
    }
}

pub struct NodeBuilder {
    config: NodeConfig,
    registry: MapperRegistry,
    transport: Option<Arc<dyn Transport>>,
    inbox: Option<mpsc::Receiver<Envelope>>,
    seed: Option<u64>,
}

impl NodeBuilder {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            registry: MapperRegistry::with_defaults(),
            transport: None,
            inbox: None,
            seed: None,
        }
    }

    pub fn registry(mut self, registry: MapperRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the HTTP transport, e.g. with an in-memory network.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Extra source of inbound envelopes, forwarded into the control loop.
    pub fn inbox(mut self, inbox: mpsc::Receiver<Envelope>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    /// Fixes the election jitter seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub async fn build(self) -> Result<NodeRuntime> {
        let config = self.config;
        config.validate()?;
        let node_id = config.node_id.clone();

        let rpc_timeout = Duration::from_millis(config.cluster.rpc_timeout_ms);
        let endpoints: BTreeMap<_, _> = config
            .cluster
            .nodes
            .iter()
            .map(|p| (p.node_id.clone(), p.endpoint.clone()))
            .collect();
        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(
                HttpTransport::new(endpoints.clone(), rpc_timeout)
                    .map_err(|e| NodeError::Storage(tessera_common::TesseraError::Network(e.to_string())))?,
            ),
        };

        let storage: Box<dyn RaftStorage> = match &config.data_dir {
            Some(dir) => Box::new(FileStorage::open(dir.join("raft"))?),
            None => Box::new(MemoryStorage::new()),
        };
        let hard_state = storage.load_hard_state()?;
        let entries = storage.load_log()?;
        let mut raft_config = config.raft_config();
        raft_config.seed = self.seed;
        info!(
            "🔄 Restaurando {}: termo {}, {} entradas no log",
            node_id,
            hard_state.current_term,
            entries.len()
        );
        let raft = RaftNode::restore(node_id.clone(), config.members(), raft_config, hard_state, entries)?;

        let log = match &config.data_dir {
            Some(dir) => EvidenceLog::open(Box::new(Binlog::open(dir).await?)).await?,
            None => EvidenceLog::in_memory(),
        };
        let registry = Arc::new(self.registry);
        let adapter = ConsensusEvidenceAdapter::new(log, Arc::clone(&registry));
        info!("Evidence log resumes after commit index {}", adapter.resume_point());
        let recorded: HashMap<String, String> = adapter
            .log()
            .events()
            .iter()
            .map(|e| (e.idempotency_key.clone(), e.event_id.clone()))
            .collect();
        let evidence = Arc::new(RwLock::new(adapter));

        let key_path = config
            .data_dir
            .as_ref()
            .map(|dir| dir.join("anchors").join("sphincs_key.json"));
        let signer = signer_for_env(config.env, node_id.as_str(), key_path.as_deref())?;
        let anchors = match &config.data_dir {
            Some(dir) => AnchorService::open(config.anchor_config(), signer, node_id.clone(), dir)?,
            None => AnchorService::new(config.anchor_config(), signer, node_id.clone()),
        };
        let anchors = Arc::new(RwLock::new(anchors));

        let (client_tx, client_rx) = mpsc::channel(CLIENT_QUEUE);
        let (peer_tx, peer_rx) = mpsc::channel(PEER_QUEUE);
        let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (halted_tx, halted_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let pipeline = EvidencePipeline::new(Arc::clone(&evidence), Arc::clone(&anchors), pipeline_rx, notice_tx);
        let pipeline = tokio::spawn(pipeline.run());

        let (ready_tx, ack_rx, writer) = writer::spawn(storage);
        let maestro = Maestro::new(
            raft,
            WriterLink { ready_tx, ack_rx },
            transport,
            endpoints,
            registry,
            recorded,
            Duration::from_millis(config.cluster.tick_interval_ms),
            rpc_timeout,
            peer_rx,
            client_rx,
            pipeline_tx,
            notice_rx,
            halted_tx,
            shutdown_rx,
        );
        let maestro = tokio::spawn(maestro.run());

        let forwarder = self.inbox.map(|mut inbox| {
            let peer_tx = peer_tx.clone();
            tokio::spawn(async move {
                while let Some(envelope) = inbox.recv().await {
                    if peer_tx.send(envelope).await.is_err() {
                        break;
                    }
                }
            })
        });

        let handle = NodeHandle::new(node_id, client_tx, peer_tx, evidence, anchors, halted_rx);
        Ok(NodeRuntime {
            handle,
            maestro,
            pipeline,
            writer,
            forwarder,
            shutdown: Some(shutdown_tx),
        })
    }
}
