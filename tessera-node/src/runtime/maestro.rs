use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tessera_common::env::{ClusterStatus, Command, NodeInfo, SubmitReply, TxResult};
use tessera_common::utils::time::current_time_millis;
use tessera_common::{ErrorCode, NodeId};
use tessera_consensus::network::Transport;
use tessera_consensus::{ConsensusError, Envelope, RaftNode, Ready};
use tessera_ledger::{ApplyOutcome, MapperRegistry};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::handle::ClientRequest;
use super::pipeline::{PipelineInput, PipelineNotice};
use super::writer::WriterAck;

/// Ticks accumulated before the anchor cadence is advanced.
const ANCHOR_TICK_BATCH: u64 = 50;

struct Waiter {
    key: String,
    reply: oneshot::Sender<SubmitReply>,
}

/// Channels between the loop and the raft storage writer.
pub(crate) struct WriterLink {
    pub ready_tx: mpsc::UnboundedSender<Ready>,
    pub ack_rx: mpsc::UnboundedReceiver<WriterAck>,
}

/// The node's single control loop. Owns the raft state machine; storage
/// writes go through the writer task and everything else talks to it
/// through channels. The loop itself never touches the disk.
pub struct Maestro {
    raft: RaftNode,
    writer: WriterLink,
    transport: Arc<dyn Transport>,
    endpoints: BTreeMap<NodeId, String>,
    registry: Arc<MapperRegistry>,
    /// Idempotency key to event id, fed by applied outcomes.
    recorded: HashMap<String, String>,
    tick_interval: Duration,
    rpc_timeout: Duration,
    peer_rx: mpsc::Receiver<Envelope>,
    client_rx: mpsc::Receiver<ClientRequest>,
    pipeline_tx: mpsc::UnboundedSender<PipelineInput>,
    notice_rx: mpsc::UnboundedReceiver<PipelineNotice>,
    halted_tx: watch::Sender<Option<String>>,
    shutdown_rx: oneshot::Receiver<()>,
    waiters: BTreeMap<u64, Vec<Waiter>>,
    pending_keys: HashMap<String, u64>,
    last_heard: HashMap<NodeId, i64>,
    was_leader: bool,
    pending_ticks: u64,
    /// End of the last seal marker proposed in the current leadership.
    seal_proposed_through: u64,
}

impl Maestro {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        raft: RaftNode,
        writer: WriterLink,
        transport: Arc<dyn Transport>,
        endpoints: BTreeMap<NodeId, String>,
        registry: Arc<MapperRegistry>,
        recorded: HashMap<String, String>,
        tick_interval: Duration,
        rpc_timeout: Duration,
        peer_rx: mpsc::Receiver<Envelope>,
        client_rx: mpsc::Receiver<ClientRequest>,
        pipeline_tx: mpsc::UnboundedSender<PipelineInput>,
        notice_rx: mpsc::UnboundedReceiver<PipelineNotice>,
        halted_tx: watch::Sender<Option<String>>,
        shutdown_rx: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            raft,
            writer,
            transport,
            endpoints,
            registry,
            recorded,
            tick_interval,
            rpc_timeout,
            peer_rx,
            client_rx,
            pipeline_tx,
            notice_rx,
            halted_tx,
            shutdown_rx,
            waiters: BTreeMap::new(),
            pending_keys: HashMap::new(),
            last_heard: HashMap::new(),
            was_leader: false,
            pending_ticks: 0,
            seal_proposed_through: 0,
        }
    }

    pub async fn run(mut self) {
        info!("[MAESTRO] Loop de controle iniciado para {} (termo {})", self.raft.id(), self.raft.term());
        let mut ticker = time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => {
                    info!("[MAESTRO] {} encerrando", self.raft.id());
                    break;
                }

                _ = ticker.tick() => self.on_tick(),

                Some(envelope) = self.peer_rx.recv() => self.on_peer(envelope),

                Some(ack) = self.writer.ack_rx.recv() => match ack {
                    WriterAck::Persisted(ready) => self.dispatch(ready),
                    WriterAck::Failed(reason) => {
                        self.halt(format!("raft storage failure: {}", reason));
                        break;
                    }
                },

                request = self.client_rx.recv() => match request {
                    Some(ClientRequest::Submit { command, reply }) => self.on_submit(command, reply),
                    Some(ClientRequest::Status { reply }) => {
                        let _ = reply.send(self.status());
                    }
                    None => {
                        debug!("client channel closed");
                        break;
                    }
                },

                Some(notice) = self.notice_rx.recv() => match notice {
                    PipelineNotice::Applied(outcomes) => self.on_applied(outcomes),
                    PipelineNotice::SealDue { start_seq, end_seq } => self.on_seal_due(start_seq, end_seq),
                    PipelineNotice::Halted(reason) => {
                        self.halt(reason);
                        break;
                    }
                },
            }

            if let Err(reason) = self.drain_ready() {
                self.halt(reason);
                break;
            }
            self.track_leadership();
        }
    }

    fn on_tick(&mut self) {
        self.raft.tick();
        self.pending_ticks += 1;
        if self.pending_ticks >= ANCHOR_TICK_BATCH {
            let ticks = std::mem::take(&mut self.pending_ticks);
            if self.raft.is_leader() {
                let _ = self.pipeline_tx.send(PipelineInput::Advance { ticks });
            }
        }
    }

    fn on_peer(&mut self, envelope: Envelope) {
        self.last_heard.insert(envelope.from.clone(), current_time_millis());
        if let Err(e) = self.raft.step(envelope) {
            warn!("dropped envelope: {}", e);
        }
    }

    fn on_submit(&mut self, command: Command, reply: oneshot::Sender<SubmitReply>) {
        if !self.raft.is_leader() {
            let _ = reply.send(self.redirect());
            return;
        }

        if let Err(e) = self.registry.validate(&command) {
            debug!("rejected '{}': {}", command.idempotency_key, e);
            let _ = reply.send(SubmitReply::Result(self.tx_rejected(ErrorCode::ValidationFailed, e.to_string())));
            return;
        }

        if let Some(event_id) = self.recorded.get(&command.idempotency_key).cloned() {
            info!("🔁 Chave '{}' já registrada como {}", command.idempotency_key, event_id);
            let result = TxResult::duplicate(vec![event_id], self.raft.id().clone(), self.raft.term(), self.raft.commit_index());
            let _ = reply.send(SubmitReply::Result(result));
            return;
        }

        let key = command.idempotency_key.clone();
        if let Some(&index) = self.pending_keys.get(&key) {
            debug!("'{}' already in flight at index {}", key, index);
            self.waiters.entry(index).or_default().push(Waiter { key, reply });
            return;
        }

        match self.raft.propose(command) {
            Ok(index) => {
                self.pending_keys.insert(key.clone(), index);
                self.waiters.entry(index).or_default().push(Waiter { key, reply });
            }
            Err(ConsensusError::NotLeader { .. }) => {
                let _ = reply.send(self.redirect());
            }
            Err(e) => {
                error!("propose failed: {}", e);
                let _ = reply.send(SubmitReply::error(ErrorCode::Internal, e.to_string()));
            }
        }
    }

    fn on_applied(&mut self, outcomes: Vec<ApplyOutcome>) {
        for outcome in outcomes {
            if let ApplyOutcome::Appended(event) = &outcome {
                self.recorded.insert(event.idempotency_key.clone(), event.event_id.clone());
            }
            let index = outcome.index();
            let Some(waiters) = self.waiters.remove(&index) else {
                continue;
            };
            for waiter in waiters {
                if self.pending_keys.get(&waiter.key) == Some(&index) {
                    self.pending_keys.remove(&waiter.key);
                }
                let reply = self.answer(&outcome, index, &waiter.key);
                let _ = waiter.reply.send(reply);
            }
        }
    }

    fn on_seal_due(&mut self, start_seq: u64, end_seq: u64) {
        if !self.raft.is_leader() || end_seq <= self.seal_proposed_through {
            return;
        }
        match self.raft.propose_seal(start_seq, end_seq) {
            Ok(index) => {
                debug!("seal marker {}..={} proposed at index {}", start_seq, end_seq, index);
                self.seal_proposed_through = end_seq;
            }
            Err(e) => debug!("seal marker not proposed: {}", e),
        }
    }

    fn answer(&self, outcome: &ApplyOutcome, index: u64, key: &str) -> SubmitReply {
        let (leader, term, commit) = (self.raft.id().clone(), self.raft.term(), self.raft.commit_index());
        match outcome {
            ApplyOutcome::Appended(event) if event.idempotency_key == key => {
                SubmitReply::Result(TxResult::committed(vec![event.event_id.clone()], leader, term, commit))
            }
            ApplyOutcome::Duplicate { original, .. } if original.idempotency_key == key => {
                SubmitReply::Result(TxResult::duplicate(vec![original.event_id.clone()], leader, term, commit))
            }
            ApplyOutcome::Unmapped { idempotency_key, reason, .. } if idempotency_key == key => {
                SubmitReply::Result(TxResult::rejected(ErrorCode::ValidationFailed, reason.clone(), leader, term, commit))
            }
            _ => SubmitReply::error(
                ErrorCode::TermConflict,
                format!("entry {} was replaced before it committed", index),
            ),
        }
    }

    /// Queues the next `Ready` for the writer. Nothing in it takes effect
    /// until the writer acknowledges it.
    fn drain_ready(&mut self) -> Result<(), String> {
        let ready = self.raft.ready();
        if ready.is_empty() {
            return Ok(());
        }
        self.writer
            .ready_tx
            .send(ready)
            .map_err(|_| "raft storage writer is gone".to_string())
    }

    /// Sends the messages of a persisted `Ready`, then forwards its commits.
    fn dispatch(&mut self, ready: Ready) {
        for envelope in ready.messages {
            let transport = Arc::clone(&self.transport);
            let timeout = self.rpc_timeout;
            tokio::spawn(async move {
                let to = envelope.to.clone();
                match time::timeout(timeout, transport.send(envelope)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("send to {} failed: {}", to, e),
                    Err(_) => debug!("send to {} timed out", to),
                }
            });
        }

        if !ready.committed.is_empty() {
            let leader = self.raft.is_leader();
            if self
                .pipeline_tx
                .send(PipelineInput::Committed { entries: ready.committed, leader })
                .is_err()
            {
                warn!("evidence pipeline is gone, committed entries not applied");
            }
        }
    }

    fn track_leadership(&mut self) {
        let is_leader = self.raft.is_leader();
        if is_leader && !self.was_leader {
            info!("👑 {} é líder no termo {}", self.raft.id(), self.raft.term());
            self.seal_proposed_through = 0;
        } else if !is_leader && self.was_leader {
            warn!("{} deixou a liderança no termo {}", self.raft.id(), self.raft.term());
            self.fail_waiters(ErrorCode::NotLeader, "leadership lost before commit");
        }
        self.was_leader = is_leader;
    }

    fn fail_waiters(&mut self, code: ErrorCode, message: &str) {
        self.pending_keys.clear();
        for (_, waiters) in std::mem::take(&mut self.waiters) {
            for waiter in waiters {
                let _ = waiter.reply.send(SubmitReply::error(code, message));
            }
        }
    }

    fn halt(&mut self, reason: String) {
        error!("🛑 {} interrompido, intervenção do operador necessária: {}", self.raft.id(), reason);
        let _ = self.halted_tx.send(Some(reason.clone()));
        self.fail_waiters(ErrorCode::ChainCorruption, &reason);
    }

    fn redirect(&self) -> SubmitReply {
        let leader_id = self.raft.leader_id().cloned();
        let leader_endpoint = leader_id.as_ref().and_then(|l| self.endpoints.get(l).cloned());
        SubmitReply::Redirect {
            leader_id,
            leader_endpoint,
            term: self.raft.term(),
        }
    }

    fn tx_rejected(&self, code: ErrorCode, message: String) -> TxResult {
        TxResult::rejected(code, message, self.raft.id().clone(), self.raft.term(), self.raft.commit_index())
    }

    fn status(&self) -> ClusterStatus {
        let now = current_time_millis();
        let window = (self.raft.config().election_timeout_max as i64)
            .saturating_mul(self.tick_interval.as_millis() as i64)
            .max(1);
        let leader = self.raft.leader_id().cloned();

        let nodes = self
            .endpoints
            .iter()
            .map(|(id, endpoint)| {
                let is_self = id == self.raft.id();
                let last_heartbeat = if is_self { Some(now) } else { self.last_heard.get(id).copied() };
                NodeInfo {
                    node_id: id.clone(),
                    endpoint: endpoint.clone(),
                    is_leader: leader.as_ref() == Some(id),
                    is_reachable: is_self || last_heartbeat.is_some_and(|t| now - t <= window),
                    last_heartbeat,
                }
            })
            .collect();

        ClusterStatus {
            reporting_node: self.raft.id().clone(),
            leader_endpoint: leader.as_ref().and_then(|l| self.endpoints.get(l).cloned()),
            leader_node_id: leader,
            current_term: self.raft.term(),
            commit_index: self.raft.commit_index(),
            nodes,
        }
    }
}
