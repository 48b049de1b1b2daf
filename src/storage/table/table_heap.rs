use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::debug;
use thiserror::Error;

use crate::common::config::{
    PageId, TxnId, ENABLE_LOGGING, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::common::rid::Rid;
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::page::Page;
use crate::storage::page::table_page;
use crate::storage::table::tuple::Tuple;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    Transaction, TransactionState, WriteRecord, WType,
};
use crate::transaction::wal::log_manager::LogManager;
use crate::transaction::wal::log_record::{LogPayload, LogRecord};
use crate::storage::table::table_iterator::TableIterator;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Tuple is too large for a page")]
    TupleTooLarge,

    #[error("Tuple {0} not found")]
    TupleNotFound(Rid),

    #[error("Transaction {0} cannot proceed")]
    TransactionAborted(TxnId),

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
}

/// A table stored as a doubly-linked chain of slotted pages.
///
/// Heap operations take the row lock through the lock manager, mutate the
/// page under its write latch, append the matching log record, stamp the
/// page LSN and record the inverse operation in the transaction's write
/// set.
pub struct TableHeap {
    buffer_pool: Arc<BufferPoolManager>,
    lock_manager: Arc<LockManager>,
    log_manager: Option<Arc<LogManager>>,
    first_page_id: PageId,
}

impl TableHeap {
    /// Create a new heap with one empty page.
    pub fn create(
        buffer_pool: Arc<BufferPoolManager>,
        lock_manager: Arc<LockManager>,
        log_manager: Option<Arc<LogManager>>,
        txn: &Transaction,
    ) -> Result<Arc<Self>, TableError> {
        let (page_ptr, first_page_id) = buffer_pool.new_page()?;

        let heap = Arc::new(Self {
            buffer_pool,
            lock_manager,
            log_manager,
            first_page_id,
        });

        {
            let mut page = page_ptr.write();
            table_page::init(&mut page, first_page_id, INVALID_PAGE_ID);
            heap.append_and_stamp(
                &mut page,
                txn,
                LogPayload::NewPage {
                    prev_page_id: INVALID_PAGE_ID,
                },
            );
        }
        heap.buffer_pool.unpin_page(first_page_id, true);
        Ok(heap)
    }

    /// Open an existing heap by its first page id.
    pub fn open(
        buffer_pool: Arc<BufferPoolManager>,
        lock_manager: Arc<LockManager>,
        log_manager: Option<Arc<LogManager>>,
        first_page_id: PageId,
    ) -> Arc<Self> {
        Arc::new(Self {
            buffer_pool,
            lock_manager,
            log_manager,
            first_page_id,
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Insert a tuple, walking the chain for free space and appending a
    /// fresh page when none is left. The new rid is locked exclusively.
    pub fn insert_tuple(
        self: &Arc<Self>,
        tuple: &Tuple,
        txn: &Transaction,
    ) -> Result<Rid, TableError> {
        // a tuple must fit on one page together with the header and slot
        if tuple.len() + 32 > PAGE_SIZE {
            txn.set_state(TransactionState::Aborted);
            return Err(TableError::TupleTooLarge);
        }
        if txn.state() == TransactionState::Aborted {
            return Err(TableError::TransactionAborted(txn.id()));
        }

        let mut page_id = self.first_page_id;
        let mut page_ptr = match self.buffer_pool.fetch_page(page_id) {
            Ok(ptr) => ptr,
            Err(e) => {
                txn.set_state(TransactionState::Aborted);
                return Err(e.into());
            }
        };

        loop {
            let mut page = page_ptr.write();

            if let Some(rid) = table_page::insert_tuple(&mut page, tuple) {
                // fresh rid: nobody else can be queued on it
                self.lock_manager.lock_exclusive(txn, rid);
                self.append_and_stamp(
                    &mut page,
                    txn,
                    LogPayload::Insert {
                        rid,
                        tuple: tuple.clone(),
                    },
                );
                drop(page);
                self.buffer_pool.unpin_page(page_id, true);

                if txn.state() != TransactionState::Aborted {
                    txn.push_write_record(WriteRecord::new(
                        rid,
                        WType::Insert,
                        Tuple::default(),
                        Arc::clone(self),
                    ));
                }
                return Ok(rid);
            }

            let next_page_id = table_page::next_page_id(&page);
            if next_page_id != INVALID_PAGE_ID {
                drop(page);
                self.buffer_pool.unpin_page(page_id, false);
                page_ptr = match self.buffer_pool.fetch_page(next_page_id) {
                    Ok(ptr) => ptr,
                    Err(e) => {
                        txn.set_state(TransactionState::Aborted);
                        return Err(e.into());
                    }
                };
                page_id = next_page_id;
            } else {
                let (new_ptr, new_page_id) = match self.buffer_pool.new_page() {
                    Ok(pair) => pair,
                    Err(e) => {
                        drop(page);
                        self.buffer_pool.unpin_page(page_id, false);
                        txn.set_state(TransactionState::Aborted);
                        return Err(e.into());
                    }
                };
                debug!("new table page {new_page_id} created");
                {
                    let mut new_page = new_ptr.write();
                    table_page::init(&mut new_page, new_page_id, page_id);
                    self.append_and_stamp(
                        &mut new_page,
                        txn,
                        LogPayload::NewPage {
                            prev_page_id: page_id,
                        },
                    );
                }
                table_page::set_next_page_id(&mut page, new_page_id);
                drop(page);
                self.buffer_pool.unpin_page(page_id, true);

                page_ptr = new_ptr;
                page_id = new_page_id;
            }
        }
    }

    /// Tombstone the tuple at `rid`; the bytes are reclaimed at commit by
    /// `apply_delete` or restored at abort by `rollback_delete`.
    pub fn mark_delete(self: &Arc<Self>, rid: Rid, txn: &Transaction) -> bool {
        if !self.lock_for_write(rid, txn) {
            return false;
        }

        let Ok(page_ptr) = self.buffer_pool.fetch_page(rid.page_id()) else {
            txn.set_state(TransactionState::Aborted);
            return false;
        };
        let mut page = page_ptr.write();

        let Some(tuple) = table_page::get_tuple(&page, rid) else {
            drop(page);
            self.buffer_pool.unpin_page(rid.page_id(), false);
            return false;
        };
        if !table_page::mark_delete(&mut page, rid) {
            drop(page);
            self.buffer_pool.unpin_page(rid.page_id(), false);
            return false;
        }

        self.append_and_stamp(&mut page, txn, LogPayload::MarkDelete { rid, tuple });
        drop(page);
        self.buffer_pool.unpin_page(rid.page_id(), true);

        if txn.state() != TransactionState::Aborted {
            txn.push_write_record(WriteRecord::new(
                rid,
                WType::Delete,
                Tuple::default(),
                Arc::clone(self),
            ));
        }
        true
    }

    /// Replace the tuple at `rid`. Falls back to delete + insert when the
    /// new payload no longer fits in place, in which case the returned
    /// rid differs from the input.
    pub fn update_tuple(
        self: &Arc<Self>,
        tuple: &Tuple,
        rid: Rid,
        txn: &Transaction,
    ) -> Result<Rid, TableError> {
        if !self.lock_for_write(rid, txn) {
            return Err(TableError::TransactionAborted(txn.id()));
        }

        let page_ptr = match self.buffer_pool.fetch_page(rid.page_id()) {
            Ok(ptr) => ptr,
            Err(e) => {
                txn.set_state(TransactionState::Aborted);
                return Err(e.into());
            }
        };
        let mut page = page_ptr.write();

        if let Some(old_tuple) = table_page::update_tuple(&mut page, tuple, rid) {
            self.append_and_stamp(
                &mut page,
                txn,
                LogPayload::Update {
                    rid,
                    old_tuple: old_tuple.clone(),
                    new_tuple: tuple.clone(),
                },
            );
            drop(page);
            self.buffer_pool.unpin_page(rid.page_id(), true);

            if txn.state() != TransactionState::Aborted {
                txn.push_write_record(WriteRecord::new(
                    rid,
                    WType::Update,
                    old_tuple,
                    Arc::clone(self),
                ));
            }
            return Ok(rid);
        }

        let exists = table_page::get_tuple(&page, rid).is_some();
        drop(page);
        self.buffer_pool.unpin_page(rid.page_id(), false);
        if !exists {
            return Err(TableError::TupleNotFound(rid));
        }

        // no room in place: move the tuple, giving it a new rid
        if !self.mark_delete(rid, txn) {
            return Err(TableError::TupleNotFound(rid));
        }
        self.insert_tuple(tuple, txn)
    }

    /// Physically remove the tuple. Called at commit (for deferred
    /// deletes) and at abort (to undo inserts); the rid's lock is
    /// released here since the tuple no longer exists.
    pub fn apply_delete(&self, rid: Rid, txn: &Transaction) {
        let Ok(page_ptr) = self.buffer_pool.fetch_page(rid.page_id()) else {
            return;
        };
        let mut page = page_ptr.write();

        if let Some(tuple) = table_page::apply_delete(&mut page, rid) {
            self.append_and_stamp(&mut page, txn, LogPayload::ApplyDelete { rid, tuple });
        }
        self.lock_manager.unlock(txn, rid);
        drop(page);
        self.buffer_pool.unpin_page(rid.page_id(), true);
    }

    /// Undo a tombstone at abort.
    pub fn rollback_delete(&self, rid: Rid, txn: &Transaction) {
        let Ok(page_ptr) = self.buffer_pool.fetch_page(rid.page_id()) else {
            return;
        };
        let mut page = page_ptr.write();

        if table_page::rollback_delete(&mut page, rid) {
            if let Some(tuple) = table_page::get_tuple(&page, rid) {
                self.append_and_stamp(&mut page, txn, LogPayload::RollbackDelete { rid, tuple });
            }
        }
        drop(page);
        self.buffer_pool.unpin_page(rid.page_id(), true);
    }

    /// Read the tuple at `rid` under a shared lock.
    pub fn get_tuple(&self, rid: Rid, txn: &Transaction) -> Option<Tuple> {
        if !txn.holds_shared_lock(rid)
            && !txn.holds_exclusive_lock(rid)
            && !self.lock_manager.lock_shared(txn, rid)
        {
            return None;
        }

        let Ok(page_ptr) = self.buffer_pool.fetch_page(rid.page_id()) else {
            txn.set_state(TransactionState::Aborted);
            return None;
        };
        let page = page_ptr.read();
        let tuple = table_page::get_tuple(&page, rid);
        drop(page);
        self.buffer_pool.unpin_page(rid.page_id(), false);
        tuple
    }

    /// Forward scan over every live tuple.
    pub fn iter<'a>(self: &Arc<Self>, txn: &'a Transaction) -> TableIterator<'a> {
        TableIterator::new(Arc::clone(self), self.first_live_rid(), txn)
    }

    /// First live slot in the chain, if any.
    pub(crate) fn first_live_rid(&self) -> Option<Rid> {
        let mut page_id = self.first_page_id;
        while page_id != INVALID_PAGE_ID {
            let page_ptr = self.buffer_pool.fetch_page(page_id).ok()?;
            let page = page_ptr.read();
            let found = table_page::first_tuple_rid(&page);
            let next = table_page::next_page_id(&page);
            drop(page);
            self.buffer_pool.unpin_page(page_id, false);
            if found.is_some() {
                return found;
            }
            page_id = next;
        }
        None
    }

    /// Live slot after `current`, crossing page boundaries.
    pub(crate) fn next_live_rid(&self, current: Rid) -> Option<Rid> {
        let page_ptr = self.buffer_pool.fetch_page(current.page_id()).ok()?;
        let page = page_ptr.read();
        let found = table_page::next_tuple_rid(&page, current);
        let mut next = table_page::next_page_id(&page);
        drop(page);
        self.buffer_pool.unpin_page(current.page_id(), false);
        if found.is_some() {
            return found;
        }

        while next != INVALID_PAGE_ID {
            let page_ptr = self.buffer_pool.fetch_page(next).ok()?;
            let page = page_ptr.read();
            let found = table_page::first_tuple_rid(&page);
            let following = table_page::next_page_id(&page);
            drop(page);
            self.buffer_pool.unpin_page(next, false);
            if found.is_some() {
                return found;
            }
            next = following;
        }
        None
    }

    /// Take the row lock for a mutation: upgrade a held shared lock,
    /// reuse a held exclusive one, otherwise acquire exclusive.
    fn lock_for_write(&self, rid: Rid, txn: &Transaction) -> bool {
        if txn.holds_exclusive_lock(rid) {
            return true;
        }
        if txn.holds_shared_lock(rid) {
            return self.lock_manager.lock_upgrade(txn, rid);
        }
        self.lock_manager.lock_exclusive(txn, rid)
    }

    /// Append a log record for a page mutation and stamp the page with
    /// its LSN. A no-op while logging is disabled.
    fn append_and_stamp(&self, page: &mut Page, txn: &Transaction, payload: LogPayload) {
        if !ENABLE_LOGGING.load(Ordering::SeqCst) {
            return;
        }
        let Some(log_manager) = &self.log_manager else {
            return;
        };
        let mut record = LogRecord::new(txn.id(), txn.prev_lsn(), payload);
        let lsn = log_manager.append_log_record(&mut record);
        txn.set_prev_lsn(lsn);
        page.set_lsn(lsn);
    }
}
