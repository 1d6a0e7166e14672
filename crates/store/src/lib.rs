//! Tool-result persistence: content-addressed, workspace-sandboxed blob
//! storage plus the inline/ref externalization policy layer, and the
//! `CheckpointStore` used to persist `Trace` aggregates across restarts.

pub mod checkpoint;
pub mod externalizer;
pub mod tool_result;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use externalizer::{ContentStats, Externalizer, ExternalizedContent};
pub use tool_result::{NormalizedResult, RefDescriptor, ToolResultStore};
