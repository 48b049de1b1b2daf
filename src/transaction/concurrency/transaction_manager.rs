use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::common::config::ENABLE_LOGGING;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{Transaction, TransactionState, WType};
use crate::transaction::wal::log_manager::LogManager;
use crate::transaction::wal::log_record::LogRecord;

/// How long commit/abort sleeps between durability checks while waiting
/// for the flush thread to catch up with the transaction's tail LSN.
const DURABILITY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Hands out transaction ids and drives the commit/abort protocol:
/// draining the write set, appending the terminal log record, waiting for
/// durability and releasing every lock the transaction holds.
pub struct TransactionManager {
    next_txn_id: AtomicI32,
    lock_manager: Arc<LockManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, log_manager: Option<Arc<LogManager>>) -> Self {
        Self {
            next_txn_id: AtomicI32::new(0),
            lock_manager,
            log_manager,
        }
    }

    /// Start a transaction, logging its begin record when logging is on.
    pub fn begin(&self) -> Transaction {
        let txn = Transaction::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst));

        if ENABLE_LOGGING.load(Ordering::SeqCst) {
            if let Some(log_manager) = &self.log_manager {
                let mut record = LogRecord::new_begin(txn.id(), txn.prev_lsn());
                let lsn = log_manager.append_log_record(&mut record);
                txn.set_prev_lsn(lsn);
            }
        }
        txn
    }

    /// Commit: apply deferred deletes in reverse order, log the commit,
    /// wait until the transaction's tail LSN is durable, then release all
    /// locks.
    pub fn commit(&self, txn: &Transaction) {
        txn.set_state(TransactionState::Committed);

        // tombstoned tuples are only physically removed once the
        // transaction is sure to commit
        while let Some(record) = txn.pop_write_record() {
            if record.wtype == WType::Delete {
                record.table.apply_delete(record.rid, txn);
            }
        }

        if ENABLE_LOGGING.load(Ordering::SeqCst) {
            if let Some(log_manager) = &self.log_manager {
                let mut record = LogRecord::new_commit(txn.id(), txn.prev_lsn());
                let lsn = log_manager.append_log_record(&mut record);
                txn.set_prev_lsn(lsn);

                // group commit: ride along with the next flush
                while txn.prev_lsn() > log_manager.persistent_lsn() {
                    thread::sleep(DURABILITY_POLL_INTERVAL);
                }
            }
        }

        self.release_all_locks(txn);
    }

    /// Abort: undo the write set newest-first, log the abort, wait for
    /// durability, release all locks.
    pub fn abort(&self, txn: &Transaction) {
        txn.set_state(TransactionState::Aborted);

        while let Some(record) = txn.pop_write_record() {
            match record.wtype {
                WType::Delete => {
                    record.table.rollback_delete(record.rid, txn);
                }
                WType::Insert => {
                    record.table.apply_delete(record.rid, txn);
                }
                WType::Update => {
                    // restore the pre-image
                    let _ = record.table.update_tuple(&record.tuple, record.rid, txn);
                }
            }
        }

        if ENABLE_LOGGING.load(Ordering::SeqCst) {
            if let Some(log_manager) = &self.log_manager {
                let mut record = LogRecord::new_abort(txn.id(), txn.prev_lsn());
                let lsn = log_manager.append_log_record(&mut record);
                txn.set_prev_lsn(lsn);

                while txn.prev_lsn() > log_manager.persistent_lsn() {
                    thread::sleep(DURABILITY_POLL_INTERVAL);
                }
            }
        }

        self.release_all_locks(txn);
    }

    fn release_all_locks(&self, txn: &Transaction) {
        for rid in txn.locked_rids() {
            self.lock_manager.unlock(txn, rid);
        }
        txn.clear_lock_sets();
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }
}
