use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::config::{PageId, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager handles the raw file I/O of the engine: random reads and
/// writes of fixed-size page slots in the database file, plus append and
/// offset reads of the log file. The log file path is derived from the
/// database path by swapping the extension for `.log`.
pub struct DiskManager {
    db_io: Mutex<File>,
    log_io: Mutex<File>,
    db_path: PathBuf,
    log_path: PathBuf,
    next_page_id: AtomicI32,
}

impl DiskManager {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let db_path = db_path.as_ref().to_path_buf();
        let log_path = db_path.with_extension("log");

        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&db_path)?;

        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&log_path)?;

        // Resume page allocation after whatever the file already holds
        let next_page_id = (db_file.metadata()?.len() / PAGE_SIZE as u64) as PageId;

        Ok(Self {
            db_io: Mutex::new(db_file),
            log_io: Mutex::new(log_file),
            db_path,
            log_path,
            next_page_id: AtomicI32::new(next_page_id),
        })
    }

    /// Read the page at `page_id` into `data`. Reading past the end of the
    /// file yields a zeroed page, so freshly allocated pages can be fetched
    /// before their first write-back.
    pub fn read_page(
        &self,
        page_id: PageId,
        data: &mut [u8; PAGE_SIZE],
    ) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.db_io.lock();

        let file_size = file.metadata()?.len();
        if offset >= file_size {
            data.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        let n = file.read(&mut data[..])?;
        // A partial trailing page reads as zeros past the valid bytes
        data[n..].fill(0);
        Ok(())
    }

    /// Write the page at `page_id` from `data` and flush it to disk.
    pub fn write_page(
        &self,
        page_id: PageId,
        data: &[u8; PAGE_SIZE],
    ) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.db_io.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&data[..])?;
        file.flush()?;
        Ok(())
    }

    /// Hand out the next page id. The page itself is materialized on first
    /// write-back.
    pub fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Free a page. Page ids are not reused; this is bookkeeping only.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Number of pages the allocator has handed out so far.
    pub fn num_allocated_pages(&self) -> usize {
        self.next_page_id.load(Ordering::SeqCst) as usize
    }

    /// Append `data` to the log file and flush it. Returns only after the
    /// bytes have been handed to the OS and synced, so the caller may
    /// advance its durable LSN.
    pub fn write_log(&self, data: &[u8]) -> Result<(), DiskManagerError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut file = self.log_io.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }

    /// Read up to `buf.len()` log bytes starting at `offset`. Returns the
    /// number of bytes read; 0 means the offset is at or past the end.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<usize, DiskManagerError> {
        let mut file = self.log_io.lock();
        let file_size = file.metadata()?.len();
        if offset >= file_size {
            return Ok(0);
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut read_total = 0;
        while read_total < buf.len() {
            let n = file.read(&mut buf[read_total..])?;
            if n == 0 {
                break;
            }
            read_total += n;
        }
        buf[read_total..].fill(0);
        Ok(read_total)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}
