//! Per-tag localization state

pub mod registry;
pub mod store;

pub use registry::AnchorRegistry;
pub use store::{IngestOutcome, ShardedTagStore, TagState, TagStateStore};
