//! Evidence pipeline: the only writer of the evidence log and anchors.
//!
//! Committed entries arrive from the control loop in index order and are
//! applied one at a time. A committed seal marker is sealed right where it
//! sits in the order, on every replica. While this node leads, the
//! pipeline also tells the loop when the next range is due so it can be
//! replicated as a marker.

use std::sync::Arc;

use tessera_anchor::AnchorService;
use tessera_common::env::LogEntry;
use tessera_ledger::{ApplyOutcome, ConsensusEvidenceAdapter};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error};

#[derive(Debug)]
pub enum PipelineInput {
    Committed {
        entries: Vec<LogEntry>,
        /// Set while this node leads; only then is a due range reported.
        leader: bool,
    },
    /// Anchor cadence ticks, sent by the leader only.
    Advance { ticks: u64 },
}

#[derive(Debug)]
pub enum PipelineNotice {
    Applied(Vec<ApplyOutcome>),
    SealDue { start_seq: u64, end_seq: u64 },
    Halted(String),
}

pub struct EvidencePipeline {
    evidence: Arc<RwLock<ConsensusEvidenceAdapter>>,
    anchors: Arc<RwLock<AnchorService>>,
    input: mpsc::UnboundedReceiver<PipelineInput>,
    notices: mpsc::UnboundedSender<PipelineNotice>,
}

impl EvidencePipeline {
    pub fn new(
        evidence: Arc<RwLock<ConsensusEvidenceAdapter>>,
        anchors: Arc<RwLock<AnchorService>>,
        input: mpsc::UnboundedReceiver<PipelineInput>,
        notices: mpsc::UnboundedSender<PipelineNotice>,
    ) -> Self {
        Self {
            evidence,
            anchors,
            input,
            notices,
        }
    }

    pub async fn run(mut self) {
        while let Some(input) = self.input.recv().await {
            let result = match input {
                PipelineInput::Committed { entries, leader } => self.apply(entries, leader).await,
                PipelineInput::Advance { ticks } => {
                    self.anchors.write().await.advance(ticks);
                    self.report_due().await;
                    Ok(())
                }
            };
            if let Err(reason) = result {
                error!("🛑 Pipeline de evidências parado: {}", reason);
                tracing::info!(target: "consensus", "EVENT:HALT reason={}", reason);
                let _ = self.notices.send(PipelineNotice::Halted(reason));
                return;
            }
        }
        debug!("evidence pipeline input closed");
    }

    /// Any failure here halts the node: a replica that skipped a seal
    /// would disagree with the others about the sealed frontier.
    async fn apply(&mut self, entries: Vec<LogEntry>, leader: bool) -> Result<(), String> {
        let mut outcomes = Vec::with_capacity(entries.len());
        {
            let mut adapter = self.evidence.write().await;
            for entry in &entries {
                let outcome = adapter.apply(entry).await.map_err(|e| e.to_string())?;
                if let &ApplyOutcome::Seal { term, start_seq, end_seq, .. } = &outcome {
                    let mut anchors = self.anchors.write().await;
                    if let Some(batch) = anchors
                        .seal_marked(adapter.log(), start_seq, end_seq, term)
                        .map_err(|e| format!("sealing {}..={} failed: {}", start_seq, end_seq, e))?
                    {
                        debug!("sealed batch {}..={} in epoch {}", batch.start_seq, batch.end_seq, batch.epoch);
                    }
                }
                outcomes.push(outcome);
            }
        }
        let _ = self.notices.send(PipelineNotice::Applied(outcomes));

        if leader {
            self.report_due().await;
        }
        Ok(())
    }

    async fn report_due(&self) {
        let adapter = self.evidence.read().await;
        let anchors = self.anchors.read().await;
        if let Some((start_seq, end_seq)) = anchors.due_range(adapter.log()) {
            let _ = self.notices.send(PipelineNotice::SealDue { start_seq, end_seq });
        }
    }
}
