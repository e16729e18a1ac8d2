//! Channel maintenance - scan history, then clean, replace, dedup, restore.

pub mod engine;
pub mod policy;
pub mod store;
pub mod transport;


pub use engine::{CancelHandle, EngineError, Maintainer, Pacing, Report, Stats};
pub use store::{ContentKind, SnapshotStore};
pub use transport::{EditOutcome, HistoryItem, Transport};
