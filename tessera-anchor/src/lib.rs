pub mod batch;
pub mod error;
pub mod service;
pub mod signer;

pub use batch::{BatchHeader, EvidenceBatch};
pub use error::{AnchorError, Result};
pub use service::{verify_batch, AnchorConfig, AnchorService};
pub use signer::{signer_for_env, verify_signature, MockSigner, Signer, SignerMode, SphincsSigner};
