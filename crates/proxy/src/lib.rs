//! Placement proxy core for hrw.
//!
//! Provides: rendezvous key placement, per-key locking, the storage node
//! transport trait, a coordinator serving client reads/writes/deletes,
//! and the balance and rebuild maintenance jobs.

pub mod balance;
pub mod chaos;
pub mod coordinator;
pub mod lock_table;
pub mod memory;
pub mod placement;
pub mod rebuild;
pub mod storage_client;
pub mod workers;

pub use coordinator::{Coordinator, ProxyError};
pub use placement::Layout;
pub use storage_client::{StorageClient, StorageError};
