use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Size of a page in bytes
pub const PAGE_SIZE: usize = 4096;

/// Number of frames in the buffer pool (test default)
pub const BUFFER_POOL_SIZE: usize = 10;

/// Capacity of an extendible hash bucket
pub const BUCKET_SIZE: usize = 50;

/// Size of a log buffer in bytes
pub const LOG_BUFFER_SIZE: usize = (BUFFER_POOL_SIZE + 1) * PAGE_SIZE;

/// How long the flush thread waits for a signal before flushing on its own
pub const LOG_TIMEOUT: Duration = Duration::from_secs(1);

/// Page ID type
pub type PageId = i32;

/// Transaction ID type
pub type TxnId = i32;

/// Log sequence number type
pub type Lsn = i32;

/// Buffer pool frame ID type
pub type FrameId = usize;

pub const INVALID_PAGE_ID: PageId = -1;
pub const INVALID_TXN_ID: TxnId = -1;
pub const INVALID_LSN: Lsn = -1;

/// The first page of the database file holds the name -> root directory
pub const HEADER_PAGE_ID: PageId = 0;

/// Process-wide switch gating log production. Flipped on by
/// `LogManager::run_flush_thread` and off by `stop_flush_thread`;
/// recovery runs with it off.
pub static ENABLE_LOGGING: AtomicBool = AtomicBool::new(false);
