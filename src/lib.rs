// Export public modules
pub mod common;
pub mod engine;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use engine::StorageEngine;
pub use index::btree::BTreeIndex;
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use storage::disk::DiskManager;
pub use storage::table::{TableHeap, Tuple};
pub use transaction::wal::{LogManager, RecoveryManager};
pub use transaction::{LockManager, Transaction, TransactionManager};
