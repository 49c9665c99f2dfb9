pub mod crypto;
pub mod env;
pub mod error;
pub mod utils;

pub use error::{ErrorCode, Result, TesseraError};
pub use utils::NodeId;
