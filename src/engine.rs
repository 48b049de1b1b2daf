use std::path::Path;
use std::sync::Arc;

use crate::common::config::HEADER_PAGE_ID;
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::disk::DiskManager;
use crate::storage::page::header_page;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction_manager::TransactionManager;
use crate::transaction::wal::log_manager::LogManager;
use crate::transaction::wal::recovery::{RecoveryManager, RecoveryError};

/// All engine components wired together and owned as one value by the
/// host. The engine uses strict two-phase locking and write-ahead
/// logging; the only persistent state is the database file and the log
/// file derived from its path.
pub struct StorageEngine {
    disk_manager: Arc<DiskManager>,
    log_manager: Arc<LogManager>,
    buffer_pool: Arc<BufferPoolManager>,
    lock_manager: Arc<LockManager>,
    transaction_manager: TransactionManager,
}

impl StorageEngine {
    /// Open (or create) the database at `db_path`. A fresh database gets
    /// its header directory page; logging starts disabled until the host
    /// calls `log_manager().run_flush_thread()`.
    pub fn new(db_path: impl AsRef<Path>, pool_size: usize) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        let log_manager = Arc::new(LogManager::new(Arc::clone(&disk_manager)));
        let buffer_pool = Arc::new(BufferPoolManager::new_with_wal(
            pool_size,
            Arc::clone(&disk_manager),
            Arc::clone(&log_manager),
        ));
        let lock_manager = Arc::new(LockManager::new(true));
        let transaction_manager =
            TransactionManager::new(Arc::clone(&lock_manager), Some(Arc::clone(&log_manager)));

        let engine = Self {
            disk_manager,
            log_manager,
            buffer_pool,
            lock_manager,
            transaction_manager,
        };
        engine.bootstrap_header_page()?;
        Ok(engine)
    }

    /// Make sure page 0 exists and is a valid directory before anything
    /// asks for root lookups.
    fn bootstrap_header_page(&self) -> Result<(), BufferPoolError> {
        if self.disk_manager.num_allocated_pages() > 0 {
            return Ok(());
        }
        let (page_ptr, page_id) = self.buffer_pool.new_page()?;
        debug_assert_eq!(page_id, HEADER_PAGE_ID);
        header_page::init(&mut page_ptr.write());
        self.buffer_pool.unpin_page(page_id, true);
        self.buffer_pool.flush_page(page_id)?;
        Ok(())
    }

    /// Replay the log after a crash. Must run before new transactions
    /// start and with logging disabled.
    pub fn recover(&self) -> Result<(), RecoveryError> {
        let mut recovery =
            RecoveryManager::new(Arc::clone(&self.disk_manager), Arc::clone(&self.buffer_pool));
        recovery.recover()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.buffer_pool
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.transaction_manager
    }
}
