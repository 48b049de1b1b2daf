use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::common::config::{
    Lsn, TxnId, ENABLE_LOGGING, INVALID_PAGE_ID, LOG_BUFFER_SIZE,
};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::storage::page::table_page;
use crate::transaction::wal::log_record::{LogPayload, LogRecord, LogRecordType};

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Disk manager error: {0}")]
    DiskManager(#[from] DiskManagerError),

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Log record at lsn {0} has no known file offset")]
    MissingLsn(Lsn),
}

pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Replays the write-ahead log after a crash: a forward redo pass
/// reapplies every operation newer than its page, then a backward undo
/// pass rolls back the transactions that never committed. There is no
/// checkpointing, so redo always starts at offset zero.
pub struct RecoveryManager {
    disk_manager: Arc<DiskManager>,
    buffer_pool: Arc<BufferPoolManager>,
    /// Transactions with no commit/abort record, mapped to their last LSN.
    active_txn: HashMap<TxnId, Lsn>,
    /// File offset of every log record, for walking prev_lsn chains.
    lsn_mapping: HashMap<Lsn, u64>,
}

impl RecoveryManager {
    pub fn new(disk_manager: Arc<DiskManager>, buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            disk_manager,
            buffer_pool,
            active_txn: HashMap::new(),
            lsn_mapping: HashMap::new(),
        }
    }

    /// Run the full recovery procedure.
    pub fn recover(&mut self) -> Result<()> {
        info!("recovery: redo pass");
        self.redo()?;
        info!(
            "recovery: undo pass over {} loser transaction(s)",
            self.active_txn.len()
        );
        self.undo()?;
        info!("recovery complete");
        Ok(())
    }

    /// Forward pass: scan the log in buffer-sized chunks from offset 0,
    /// rebuild the active-transaction table and the lsn -> offset map,
    /// and reapply every data operation whose LSN is newer than the page.
    pub fn redo(&mut self) -> Result<()> {
        assert!(
            !ENABLE_LOGGING.load(Ordering::SeqCst),
            "recovery must run with logging disabled"
        );

        let mut buffer = vec![0u8; LOG_BUFFER_SIZE];
        let mut offset: u64 = 0;

        loop {
            let n = self.disk_manager.read_log(&mut buffer, offset)?;
            if n == 0 {
                break;
            }

            let mut pos = 0usize;
            while let Some(record) = LogRecord::deserialize(&buffer[pos..n]) {
                let size = record.size();
                self.lsn_mapping.insert(record.lsn, offset + pos as u64);

                match record.record_type() {
                    LogRecordType::Commit | LogRecordType::Abort => {
                        self.active_txn.remove(&record.txn_id);
                    }
                    _ => {
                        self.active_txn.insert(record.txn_id, record.lsn);
                        self.redo_record(&record)?;
                    }
                }
                pos += size;
            }

            if pos == 0 {
                // nothing decodable at this offset; the tail is garbage
                break;
            }
            offset += pos as u64;
        }
        Ok(())
    }

    fn redo_record(&mut self, record: &LogRecord) -> Result<()> {
        match &record.payload {
            LogPayload::Begin | LogPayload::Commit | LogPayload::Abort => {}

            LogPayload::Insert { rid, tuple } => {
                let page_ptr = self.buffer_pool.fetch_page(rid.page_id())?;
                {
                    let mut page = page_ptr.write();
                    if record.lsn > page.lsn() {
                        let applied = table_page::insert_tuple_at(&mut page, *rid, tuple);
                        debug_assert!(applied, "redo insert must find the slot free");
                        page.set_lsn(record.lsn);
                    }
                }
                self.buffer_pool.unpin_page(rid.page_id(), true);
            }

            LogPayload::MarkDelete { rid, .. }
            | LogPayload::ApplyDelete { rid, .. }
            | LogPayload::RollbackDelete { rid, .. } => {
                let page_ptr = self.buffer_pool.fetch_page(rid.page_id())?;
                {
                    let mut page = page_ptr.write();
                    if record.lsn > page.lsn() {
                        match record.record_type() {
                            LogRecordType::MarkDelete => {
                                table_page::mark_delete(&mut page, *rid);
                            }
                            LogRecordType::RollbackDelete => {
                                table_page::rollback_delete(&mut page, *rid);
                            }
                            _ => {
                                table_page::apply_delete(&mut page, *rid);
                            }
                        }
                        page.set_lsn(record.lsn);
                    }
                }
                self.buffer_pool.unpin_page(rid.page_id(), true);
            }

            LogPayload::Update { rid, new_tuple, .. } => {
                let page_ptr = self.buffer_pool.fetch_page(rid.page_id())?;
                {
                    let mut page = page_ptr.write();
                    if record.lsn > page.lsn() {
                        table_page::update_tuple(&mut page, new_tuple, *rid);
                        page.set_lsn(record.lsn);
                    }
                }
                self.buffer_pool.unpin_page(rid.page_id(), true);
            }

            LogPayload::NewPage { prev_page_id } => {
                if *prev_page_id == INVALID_PAGE_ID {
                    // first page of a heap chain
                    let (page_ptr, page_id) = self.buffer_pool.new_page()?;
                    {
                        let mut page = page_ptr.write();
                        table_page::init(&mut page, page_id, INVALID_PAGE_ID);
                    }
                    self.buffer_pool.unpin_page(page_id, true);
                    debug!("redo: recreated first heap page {page_id}");
                } else {
                    let prev_ptr = self.buffer_pool.fetch_page(*prev_page_id)?;
                    let next = table_page::next_page_id(&prev_ptr.read());
                    if next == INVALID_PAGE_ID {
                        let (new_ptr, new_page_id) = self.buffer_pool.new_page()?;
                        {
                            let mut new_page = new_ptr.write();
                            table_page::init(&mut new_page, new_page_id, *prev_page_id);
                        }
                        table_page::set_next_page_id(&mut prev_ptr.write(), new_page_id);
                        self.buffer_pool.unpin_page(new_page_id, true);
                        debug!("redo: relinked heap page {new_page_id}");
                    }
                    self.buffer_pool.unpin_page(*prev_page_id, true);
                }
            }
        }
        Ok(())
    }

    /// Backward pass: for every transaction still active after redo, walk
    /// its prev_lsn chain from the last record back to begin, applying
    /// the inverse of each operation.
    pub fn undo(&mut self) -> Result<()> {
        assert!(
            !ENABLE_LOGGING.load(Ordering::SeqCst),
            "recovery must run with logging disabled"
        );

        let mut buffer = vec![0u8; LOG_BUFFER_SIZE];
        let losers: Vec<(TxnId, Lsn)> = self
            .active_txn
            .iter()
            .map(|(&txn_id, &lsn)| (txn_id, lsn))
            .collect();

        for (txn_id, last_lsn) in losers {
            debug!("undo: rolling back transaction {txn_id}");
            let mut lsn = last_lsn;

            loop {
                let offset = *self
                    .lsn_mapping
                    .get(&lsn)
                    .ok_or(RecoveryError::MissingLsn(lsn))?;
                let n = self.disk_manager.read_log(&mut buffer, offset)?;
                let Some(record) = LogRecord::deserialize(&buffer[..n]) else {
                    break;
                };

                match &record.payload {
                    LogPayload::Begin => break,

                    LogPayload::Insert { rid, .. } => {
                        let page_ptr = self.buffer_pool.fetch_page(rid.page_id())?;
                        table_page::apply_delete(&mut page_ptr.write(), *rid);
                        self.buffer_pool.unpin_page(rid.page_id(), true);
                    }

                    LogPayload::MarkDelete { rid, .. } => {
                        let page_ptr = self.buffer_pool.fetch_page(rid.page_id())?;
                        table_page::rollback_delete(&mut page_ptr.write(), *rid);
                        self.buffer_pool.unpin_page(rid.page_id(), true);
                    }

                    LogPayload::RollbackDelete { rid, .. } => {
                        let page_ptr = self.buffer_pool.fetch_page(rid.page_id())?;
                        table_page::mark_delete(&mut page_ptr.write(), *rid);
                        self.buffer_pool.unpin_page(rid.page_id(), true);
                    }

                    LogPayload::ApplyDelete { rid, tuple } => {
                        let page_ptr = self.buffer_pool.fetch_page(rid.page_id())?;
                        table_page::insert_tuple_at(&mut page_ptr.write(), *rid, tuple);
                        self.buffer_pool.unpin_page(rid.page_id(), true);
                    }

                    LogPayload::Update { rid, old_tuple, .. } => {
                        let page_ptr = self.buffer_pool.fetch_page(rid.page_id())?;
                        table_page::update_tuple(&mut page_ptr.write(), old_tuple, *rid);
                        self.buffer_pool.unpin_page(rid.page_id(), true);
                    }

                    LogPayload::NewPage { .. } | LogPayload::Commit | LogPayload::Abort => {}
                }

                if record.prev_lsn < 0 {
                    break;
                }
                lsn = record.prev_lsn;
            }
        }

        self.active_txn.clear();
        self.lsn_mapping.clear();
        Ok(())
    }
}
