use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tessera_common::env::LedgerEvent;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::Result;

/// Durable backing for the evidence log. Append-only.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn load(&mut self) -> Result<Vec<LedgerEvent>>;

    async fn append(&mut self, event: &LedgerEvent) -> Result<()>;
}

/// Keeps events in memory. Clones share the same buffer, so a test can
/// "restart" a log by opening a clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventStore {
    events: Arc<Mutex<Vec<LedgerEvent>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<LedgerEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn load(&mut self) -> Result<Vec<LedgerEvent>> {
        Ok(self.snapshot())
    }

    async fn append(&mut self, event: &LedgerEvent) -> Result<()> {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
        Ok(())
    }
}

/// JSON-lines file at `<data_dir>/evidence/events.log`.
///
/// Each append is flushed and fsynced before returning. A torn final line
/// left by a crash is dropped on load.
#[derive(Debug)]
pub struct Binlog {
    file: File,
    path: PathBuf,
}

impl Binlog {
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref().join("evidence");
        fs::create_dir_all(&dir).await?;
        let path = dir.join("events.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .await?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventStore for Binlog {
    async fn load(&mut self) -> Result<Vec<LedgerEvent>> {
        let contents = fs::read_to_string(&self.path).await?;
        let mut events = Vec::new();
        let mut valid_len = 0usize;

        for line in contents.split_inclusive('\n') {
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                valid_len += line.len();
                continue;
            }
            let complete = line.ends_with('\n');
            match serde_json::from_str::<LedgerEvent>(trimmed) {
                Ok(event) if complete => {
                    events.push(event);
                    valid_len += line.len();
                }
                Err(e) if complete => return Err(e.into()),
                _ => {
                    // Only the final line can lack its newline.
                    warn!("dropping torn trailing record in {:?}", self.path);
                    self.file.set_len(valid_len as u64).await?;
                    break;
                }
            }
        }

        debug!("loaded {} evidence events from {:?}", events.len(), self.path);
        Ok(events)
    }

    async fn append(&mut self, event: &LedgerEvent) -> Result<()> {
        let mut data = serde_json::to_vec(event)?;
        data.push(b'\n');
        self.file.write_all(&data).await?;
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok(())
    }
}
