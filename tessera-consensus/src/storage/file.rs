use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tessera_common::env::LogEntry;
use tessera_common::Result;
use tracing::{debug, warn};

use super::RaftStorage;
use crate::raft::state::HardState;

const META: &str = "meta.json";
const LOG: &str = "log.jsonl";

/// One line of `log.jsonl`. The log is rebuilt by replaying them in order.
#[derive(Debug, Serialize, Deserialize)]
enum LogRecord {
    Append(LogEntry),
    Truncate { from: u64 },
}

/// File-backed storage under `<dir>/meta.json` and `<dir>/log.jsonl`.
///
/// The hard state is small and replaced atomically (temp file, fsync,
/// rename). The log is append-only: an append writes only the new
/// entries, a truncation writes one marker line. Markers are folded away
/// when the file is reopened.
pub struct FileStorage {
    dir: PathBuf,
    hard_state: HardState,
    file: File,
    last_index: u64,
}

impl FileStorage {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let hard_state: HardState = read_json(&dir.join(META))?.unwrap_or_default();
        let (log, compact) = replay(&dir.join(LOG))?;
        if compact {
            rewrite_log(&dir, &log)?;
        }
        debug!("raft storage opened at {:?}: term={} entries={}", dir, hard_state.current_term, log.len());

        let file = OpenOptions::new().create(true).append(true).open(dir.join(LOG))?;
        let last_index = log.last().map(|e| e.index).unwrap_or(0);
        Ok(Self {
            dir,
            hard_state,
            file,
            last_index,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_records(&mut self, records: &[LogRecord]) -> Result<()> {
        let mut data = Vec::new();
        for record in records {
            serde_json::to_writer(&mut data, record)?;
            data.push(b'\n');
        }
        self.file.write_all(&data)?;
        self.file.sync_data()?;
        Ok(())
    }
}

impl RaftStorage for FileStorage {
    fn save_hard_state(&mut self, state: &HardState) -> Result<()> {
        write_atomic(&self.dir, META, state)?;
        self.hard_state = state.clone();
        Ok(())
    }

    fn load_hard_state(&self) -> Result<HardState> {
        Ok(self.hard_state.clone())
    }

    fn append_entries(&mut self, entries: &[LogEntry]) -> Result<()> {
        let Some(last) = entries.last() else {
            return Ok(());
        };
        let records: Vec<LogRecord> = entries.iter().cloned().map(LogRecord::Append).collect();
        self.write_records(&records)?;
        self.last_index = last.index;
        Ok(())
    }

    fn truncate_log_from(&mut self, from_index: u64) -> Result<()> {
        if from_index > self.last_index {
            return Ok(());
        }
        self.write_records(&[LogRecord::Truncate { from: from_index }])?;
        self.last_index = from_index.saturating_sub(1);
        Ok(())
    }

    fn load_log(&self) -> Result<Vec<LogEntry>> {
        Ok(replay(&self.dir.join(LOG))?.0)
    }
}

/// Rebuilds the log from its records. The flag is set when the file holds
/// truncations or a torn tail and is worth rewriting.
fn replay(path: &Path) -> Result<(Vec<LogEntry>, bool)> {
    if !path.exists() {
        return Ok((Vec::new(), false));
    }
    let contents = fs::read_to_string(path)?;
    let mut log: Vec<LogEntry> = Vec::new();
    let mut compact = false;

    for line in contents.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        let complete = line.ends_with('\n');
        match serde_json::from_str::<LogRecord>(trimmed) {
            Ok(LogRecord::Append(entry)) if complete => log.push(entry),
            Ok(LogRecord::Truncate { from }) if complete => {
                log.retain(|e| e.index < from);
                compact = true;
            }
            Err(e) if complete => return Err(e.into()),
            _ => {
                warn!("dropping torn trailing record in {:?}", path);
                compact = true;
                break;
            }
        }
    }
    Ok((log, compact))
}

fn rewrite_log(dir: &Path, log: &[LogEntry]) -> Result<()> {
    let records: Vec<LogRecord> = log.iter().cloned().map(LogRecord::Append).collect();
    let mut data = Vec::new();
    for record in &records {
        serde_json::to_writer(&mut data, record)?;
        data.push(b'\n');
    }
    write_bytes_atomic(dir, LOG, &data)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&contents)?))
}

fn write_atomic<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<()> {
    write_bytes_atomic(dir, name, &serde_json::to_vec(value)?)
}

fn write_bytes_atomic(dir: &Path, name: &str, data: &[u8]) -> Result<()> {
    let tmp = dir.join(format!("{}.tmp", name));
    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&tmp, dir.join(name))?;
    Ok(())
}
