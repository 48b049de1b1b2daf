use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::config::{Lsn, TxnId, INVALID_LSN};
use crate::common::rid::Rid;
use crate::storage::table::table_heap::TableHeap;
use crate::storage::table::tuple::Tuple;

/// Transaction states:
///
/// ```text
///     _________________________
///    |                         v
/// Growing -> Shrinking -> Committed   Aborted
///    |__________|________________________^
/// ```
///
/// Under strict 2PL a transaction goes straight from Growing to
/// Committed/Aborted; Shrinking only appears when early unlocks are
/// allowed. Aborted is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Kind of a write-set entry, naming the operation to undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WType {
    Insert,
    Delete,
    Update,
}

/// Undo record: enough to reverse one heap operation at rollback. The
/// tuple is the pre-image and only meaningful for updates.
#[derive(Clone)]
pub struct WriteRecord {
    pub rid: Rid,
    pub wtype: WType,
    pub tuple: Tuple,
    pub table: Arc<TableHeap>,
}

impl WriteRecord {
    pub fn new(rid: Rid, wtype: WType, tuple: Tuple, table: Arc<TableHeap>) -> Self {
        Self {
            rid,
            wtype,
            tuple,
            table,
        }
    }
}

/// An in-flight transaction. Created by the transaction manager and
/// shared by reference with the lock manager and heaps, so the mutable
/// pieces sit behind their own locks.
pub struct Transaction {
    txn_id: TxnId,
    state: Mutex<TransactionState>,
    prev_lsn: AtomicI32,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
    write_set: Mutex<Vec<WriteRecord>>,
}

impl Transaction {
    pub fn new(txn_id: TxnId) -> Self {
        Self {
            txn_id,
            state: Mutex::new(TransactionState::Growing),
            prev_lsn: AtomicI32::new(INVALID_LSN),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.txn_id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// LSN of the last log record this transaction wrote.
    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn.load(Ordering::SeqCst)
    }

    pub fn set_prev_lsn(&self, lsn: Lsn) {
        self.prev_lsn.store(lsn, Ordering::SeqCst);
    }

    pub fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    /// Upgrade bookkeeping: the rid moves between the two sets.
    pub fn promote_to_exclusive(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub fn holds_shared_lock(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn holds_exclusive_lock(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    /// Every rid this transaction holds a lock on, in either mode.
    pub fn locked_rids(&self) -> Vec<Rid> {
        let mut rids: HashSet<Rid> = self.shared_lock_set.lock().iter().copied().collect();
        rids.extend(self.exclusive_lock_set.lock().iter().copied());
        rids.into_iter().collect()
    }

    pub fn clear_lock_sets(&self) {
        self.shared_lock_set.lock().clear();
        self.exclusive_lock_set.lock().clear();
    }

    pub fn push_write_record(&self, record: WriteRecord) {
        self.write_set.lock().push(record);
    }

    /// Pop undo records newest-first; commit and abort drain in reverse.
    pub fn pop_write_record(&self) -> Option<WriteRecord> {
        self.write_set.lock().pop()
    }

    pub fn write_set_len(&self) -> usize {
        self.write_set.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_defaults() {
        let txn = Transaction::new(9);
        assert_eq!(txn.id(), 9);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.prev_lsn(), INVALID_LSN);
        assert_eq!(txn.write_set_len(), 0);
    }

    #[test]
    fn test_lock_set_bookkeeping() {
        let txn = Transaction::new(1);
        let rid = Rid::new(2, 3);

        txn.add_shared_lock(rid);
        assert!(txn.holds_shared_lock(rid));
        assert!(!txn.holds_exclusive_lock(rid));

        txn.promote_to_exclusive(rid);
        assert!(!txn.holds_shared_lock(rid));
        assert!(txn.holds_exclusive_lock(rid));

        assert_eq!(txn.locked_rids(), vec![rid]);
    }
}
