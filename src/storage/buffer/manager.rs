use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::config::{
    FrameId, PageId, BUCKET_SIZE, ENABLE_LOGGING, INVALID_PAGE_ID,
};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;
use crate::storage::hash::ExtendibleHashTable;
use crate::storage::page::{Page, PagePtr};
use crate::transaction::wal::log_manager::LogManager;

/// A buffer-pool slot: one page image plus the bookkeeping the pool needs
/// to decide whether the slot can be reused.
#[derive(Debug)]
pub struct Frame {
    pub page: PagePtr,
    pub frame_id: FrameId,
    pub pin_count: u32,
    pub is_dirty: bool,
}

impl Frame {
    fn new(frame_id: FrameId) -> Self {
        Self {
            page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
            frame_id,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

pub type FramePtr = Arc<RwLock<Frame>>;

struct PoolState {
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer<FrameId>,
}

/// Caches disk pages in a fixed set of frames. Fetching pins a page in its
/// frame; unpinning to zero makes the frame replaceable. Evicting a dirty
/// frame first forces the write-ahead log past the frame's page LSN.
///
/// One latch serializes the public operations; the page table and replacer
/// carry their own internal locks but are only touched underneath it.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<FramePtr>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    latch: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::build(pool_size, disk_manager, None)
    }

    /// A pool that enforces the WAL rule on eviction: dirty pages are only
    /// written back once the log is durable up to the page's LSN.
    pub fn new_with_wal(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Arc<LogManager>,
    ) -> Self {
        Self::build(pool_size, disk_manager, Some(log_manager))
    }

    fn build(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let frames = (0..pool_size)
            .map(|i| Arc::new(RwLock::new(Frame::new(i))))
            .collect();
        let free_list = (0..pool_size).collect();

        Self {
            pool_size,
            frames,
            page_table: ExtendibleHashTable::new(BUCKET_SIZE),
            latch: Mutex::new(PoolState {
                free_list,
                replacer: LruReplacer::new(),
            }),
            disk_manager,
            log_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Pin the page in a frame and return it, reading it from disk on a
    /// miss. Fails with `BufferPoolFull` when every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        let mut state = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let mut frame = self.frames[frame_id].write();
            frame.pin_count += 1;
            state.replacer.erase(frame_id);
            return Ok(frame.page.clone());
        }

        let frame_id = Self::select_victim(&mut state)?;
        let mut frame = self.frames[frame_id].write();
        debug_assert_eq!(frame.pin_count, 0);

        self.write_back_if_dirty(&mut frame)?;

        let old_page_id = frame.page.read().page_id;
        if old_page_id != INVALID_PAGE_ID {
            self.page_table.remove(&old_page_id);
        }
        self.page_table.insert(page_id, frame_id);

        {
            let mut page = frame.page.write();
            page.page_id = page_id;
            self.disk_manager.read_page(page_id, &mut page.data)?;
        }
        frame.pin_count = 1;
        frame.is_dirty = false;

        Ok(frame.page.clone())
    }

    /// Allocate a fresh page id, pin a zeroed frame for it and return
    /// both.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.latch.lock();

        let frame_id = Self::select_victim(&mut state)?;
        let mut frame = self.frames[frame_id].write();
        debug_assert_eq!(frame.pin_count, 0);

        self.write_back_if_dirty(&mut frame)?;

        let old_page_id = frame.page.read().page_id;
        if old_page_id != INVALID_PAGE_ID {
            self.page_table.remove(&old_page_id);
        }

        let page_id = self.disk_manager.allocate_page();
        self.page_table.insert(page_id, frame_id);

        {
            let mut page = frame.page.write();
            page.reset();
            page.page_id = page_id;
        }
        frame.pin_count = 1;
        frame.is_dirty = false;

        Ok((frame.page.clone(), page_id))
    }

    /// Drop one pin; the frame becomes a replacement candidate when the
    /// count reaches zero. Returns false when the page is not resident or
    /// was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let state = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let mut frame = self.frames[frame_id].write();
        if frame.pin_count == 0 {
            return false;
        }
        frame.pin_count -= 1;
        if is_dirty {
            frame.is_dirty = true;
        }
        if frame.pin_count == 0 {
            state.replacer.insert(frame_id);
        }
        true
    }

    /// Write the page's bytes to disk right now. The WAL rule does not
    /// apply here; an explicit flush is the caller's own decision.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        let _state = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Err(BufferPoolError::PageNotFound(page_id));
        };
        let mut frame = self.frames[frame_id].write();
        {
            let page = frame.page.read();
            self.disk_manager.write_page(page.page_id, &page.data)?;
        }
        frame.is_dirty = false;
        Ok(())
    }

    /// Flush every dirty resident page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let _state = self.latch.lock();
        for frame in &self.frames {
            let mut frame = frame.write();
            if !frame.is_dirty {
                continue;
            }
            {
                let page = frame.page.read();
                if page.page_id == INVALID_PAGE_ID {
                    continue;
                }
                self.disk_manager.write_page(page.page_id, &page.data)?;
            }
            frame.is_dirty = false;
        }
        Ok(())
    }

    /// Remove an unpinned page from the pool and deallocate it on disk.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        let mut state = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Err(BufferPoolError::PageNotFound(page_id));
        };
        let mut frame = self.frames[frame_id].write();
        if frame.pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        self.page_table.remove(&page_id);
        state.replacer.erase(frame_id);
        self.disk_manager.deallocate_page(page_id);

        frame.page.write().reset();
        frame.is_dirty = false;
        state.free_list.push_back(frame_id);
        Ok(())
    }

    /// Sizes of (page table, replacer, free list); the pool invariant is
    /// `page_table = pool_size - free_list - unpinned-in-replacer +
    /// pinned`.
    pub fn audit(&self) -> (usize, usize, usize) {
        let state = self.latch.lock();
        (
            self.page_table.len(),
            state.replacer.len(),
            state.free_list.len(),
        )
    }

    fn select_victim(state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }
        state
            .replacer
            .victim()
            .ok_or(BufferPoolError::BufferPoolFull)
    }

    /// Write a dirty victim back before its frame is reused. With logging
    /// enabled the log is first forced up to the page's LSN.
    fn write_back_if_dirty(&self, frame: &mut Frame) -> Result<(), BufferPoolError> {
        if !frame.is_dirty {
            return Ok(());
        }
        let page = frame.page.read();
        if ENABLE_LOGGING.load(Ordering::SeqCst) {
            if let Some(log_manager) = &self.log_manager {
                let lsn = page.lsn();
                if lsn > log_manager.persistent_lsn() {
                    log_manager.flush_to_lsn(lsn);
                }
            }
        }
        self.disk_manager.write_page(page.page_id, &page.data)?;
        drop(page);
        frame.is_dirty = false;
        Ok(())
    }
}
