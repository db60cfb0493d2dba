//! Local placement index for hrw: WAL + ordered in-memory memtable.
//!
//! Rows are `raw key -> encoded entry`. The WAL provides durability, the
//! memtable provides ordered iteration for the background jobs.
//! [`LocalIndex`] layers the entry codec on top of the raw engine.

pub mod engine;
pub mod local;
pub mod memtable;
pub mod record;
pub mod wal;

pub use engine::IndexEngine;
pub use local::LocalIndex;
pub use record::IndexRecord;
