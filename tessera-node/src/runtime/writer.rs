//! Raft storage writer.
//!
//! Owns the node's `RaftStorage` on a blocking thread. The control loop
//! queues each `Ready` here and only acts on it (sending messages,
//! forwarding commits) once it comes back persisted. Readies are written
//! in the order they were queued.

use tessera_consensus::storage::persist_ready;
use tessera_consensus::{RaftStorage, Ready};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

#[derive(Debug)]
pub enum WriterAck {
    Persisted(Ready),
    Failed(String),
}

/// Starts the writer. It stops when the `Ready` sender is dropped or after
/// the first failed write.
pub fn spawn(
    mut storage: Box<dyn RaftStorage>,
) -> (mpsc::UnboundedSender<Ready>, mpsc::UnboundedReceiver<WriterAck>, JoinHandle<()>) {
    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel::<Ready>();
    let (ack_tx, ack_rx) = mpsc::unbounded_channel();

    let task = tokio::task::spawn_blocking(move || {
        while let Some(ready) = ready_rx.blocking_recv() {
            match persist_ready(storage.as_mut(), &ready) {
                Ok(()) => {
                    if ack_tx.send(WriterAck::Persisted(ready)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("💾 Falha ao gravar estado do raft: {}", e);
                    let _ = ack_tx.send(WriterAck::Failed(e.to_string()));
                    break;
                }
            }
        }
        debug!("raft storage writer stopped");
    });

    (ready_tx, ack_rx, task)
}
