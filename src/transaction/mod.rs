pub mod concurrency;
pub mod wal;

pub use concurrency::lock_manager::{LockManager, LockMode};
pub use concurrency::transaction::{Transaction, TransactionState, WriteRecord, WType};
pub use concurrency::transaction_manager::TransactionManager;
