pub mod builder;
pub mod handle;
pub mod maestro;
pub mod pipeline;
pub mod writer;

pub use builder::{NodeBuilder, NodeRuntime};
pub use handle::NodeHandle;
