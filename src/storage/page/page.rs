use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::common::config::{Lsn, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Byte offset of the page id inside every persistent data page.
pub const PAGE_ID_OFFSET: usize = 0;
/// Byte offset of the page LSN inside every persistent data page.
pub const LSN_OFFSET: usize = 4;

/// In-memory image of one disk page. The `RwLock` wrapping a `Page` in a
/// buffer-pool frame is the page latch; the id field mirrors the on-disk
/// id for pages that carry one.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    /// Highest LSN of any log record describing a change to this page,
    /// stored at byte offset 4.
    pub fn lsn(&self) -> Lsn {
        LittleEndian::read_i32(&self.data[LSN_OFFSET..LSN_OFFSET + 4])
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        LittleEndian::write_i32(&mut self.data[LSN_OFFSET..LSN_OFFSET + 4], lsn);
    }

    /// Zero the page and drop its identity, returning the frame to a clean
    /// state for reuse.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.page_id = INVALID_PAGE_ID;
    }
}

/// Shared handle to a page; the lock is the page latch.
pub type PagePtr = Arc<RwLock<Page>>;

/// Owned read latch on a page, holdable across buffer-pool calls.
pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;

/// Owned write latch on a page, holdable across buffer-pool calls.
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;
