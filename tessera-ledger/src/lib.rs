pub mod adapter;
pub mod binlog;
pub mod error;
pub mod evidence;
pub mod registry;

pub use adapter::{ApplyOutcome, ConsensusEvidenceAdapter};
pub use binlog::{Binlog, EventStore, MemoryEventStore};
pub use error::{LedgerError, Result};
pub use evidence::EvidenceLog;
pub use registry::{DigestMapper, EventFields, EventMapper, MapperRegistry};
