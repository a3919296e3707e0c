//! Event timeline persistence.
//!
//! Every failure, recovery and pipeline outcome is appended to the timeline
//! of the workload it concerns. Stores implement [`TimelineStore`]; the
//! sharded JSON store keeps one file per workload so appends for different
//! workloads never overwrite each other.

pub mod memory;
pub mod sharded;
pub mod store;

pub use memory::MemoryStore;
pub use sharded::ShardedJsonStore;
pub use store::{open_store, TimelineStore, TimelineSummary};
