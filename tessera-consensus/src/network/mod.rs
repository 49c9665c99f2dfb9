pub mod error;
pub mod in_memory;
pub mod traits;

pub use error::NetworkError;
pub use in_memory::{InMemoryNetwork, InMemoryTransport};
pub use traits::Transport;
