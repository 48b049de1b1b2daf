use std::mem;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::{debug, error};

use crate::common::config::{
    Lsn, ENABLE_LOGGING, INVALID_LSN, LOG_BUFFER_SIZE, LOG_TIMEOUT,
};
use crate::storage::disk::DiskManager;
use crate::transaction::wal::log_record::LogRecord;

/// Double-buffered write-ahead log.
///
/// Appenders serialize records into `log_buffer`; a background flush
/// thread owns `flush_buffer` and writes it out either on a LOG_TIMEOUT
/// tick, when an appender overflows the buffer, or when a caller forces
/// durability up to some LSN. A non-empty `flush_buffer` means a flush is
/// pending or in flight; swapping is only legal while it is empty.
struct LogBuffers {
    log_buffer: Vec<u8>,
    flush_buffer: Vec<u8>,
    /// Last LSN contained in `flush_buffer` after a swap.
    flush_lsn: Lsn,
    /// Completion handle for a forced flush, fulfilled by the flusher.
    flush_waiter: Option<mpsc::Sender<()>>,
}

pub struct LogManager {
    disk_manager: Arc<DiskManager>,
    next_lsn: AtomicI32,
    persistent_lsn: AtomicI32,
    inner: Mutex<LogBuffers>,
    flush_cv: Condvar,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
}

impl LogManager {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        Self {
            disk_manager,
            next_lsn: AtomicI32::new(0),
            persistent_lsn: AtomicI32::new(INVALID_LSN),
            inner: Mutex::new(LogBuffers {
                log_buffer: Vec::with_capacity(LOG_BUFFER_SIZE),
                flush_buffer: Vec::with_capacity(LOG_BUFFER_SIZE),
                flush_lsn: INVALID_LSN,
                flush_waiter: None,
            }),
            flush_cv: Condvar::new(),
            flush_thread: Mutex::new(None),
        }
    }

    /// Records at or below this LSN are durable on disk.
    pub fn persistent_lsn(&self) -> Lsn {
        self.persistent_lsn.load(Ordering::SeqCst)
    }

    pub fn set_persistent_lsn(&self, lsn: Lsn) {
        self.persistent_lsn.store(lsn, Ordering::SeqCst);
    }

    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst)
    }

    /// Assign the record its LSN and serialize it into the log buffer.
    /// When the record does not fit, the buffers are swapped and the
    /// flusher signalled; the appender waits if the previous swap is
    /// still being written.
    pub fn append_log_record(&self, record: &mut LogRecord) -> Lsn {
        let mut inner = self.inner.lock().unwrap();
        let size = record.size();
        debug_assert!(size <= LOG_BUFFER_SIZE);

        while inner.log_buffer.len() + size > LOG_BUFFER_SIZE {
            if inner.flush_buffer.is_empty() {
                self.swap_buffers(&mut inner);
                self.flush_cv.notify_all();
            } else {
                inner = self.flush_cv.wait(inner).unwrap();
            }
        }

        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        record.lsn = lsn;

        let start = inner.log_buffer.len();
        inner.log_buffer.resize(start + size, 0);
        record.serialize_into(&mut inner.log_buffer[start..start + size]);
        lsn
    }

    /// Move the appended bytes to the flusher's buffer. Caller must hold
    /// the buffer lock and have checked that `flush_buffer` is empty.
    fn swap_buffers(&self, inner: &mut LogBuffers) {
        debug_assert!(inner.flush_buffer.is_empty());
        mem::swap(&mut inner.log_buffer, &mut inner.flush_buffer);
        inner.log_buffer.clear();
        inner.flush_lsn = self.next_lsn.load(Ordering::SeqCst) - 1;
    }

    /// Turn logging on and start the background flush thread.
    pub fn run_flush_thread(self: &Arc<Self>) {
        if ENABLE_LOGGING.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("starting wal flush thread");
        let this = Arc::clone(self);
        let handle = std::thread::spawn(move || this.flush_loop());
        *self.flush_thread.lock().unwrap() = Some(handle);
    }

    /// Turn logging off and join the flush thread. The thread notices the
    /// flag within one LOG_TIMEOUT interval.
    pub fn stop_flush_thread(&self) {
        if !ENABLE_LOGGING.swap(false, Ordering::SeqCst) {
            return;
        }
        self.flush_cv.notify_all();
        let handle = self.flush_thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        debug!("wal flush thread stopped");
    }

    /// Force a buffer swap and signal the flusher. With `wait` set, block
    /// until everything appended before this call is durable.
    pub fn wakeup_flush_thread(&self, wait: bool) {
        if !wait {
            let mut inner = self.inner.lock().unwrap();
            if inner.flush_buffer.is_empty() && !inner.log_buffer.is_empty() {
                self.swap_buffers(&mut inner);
            }
            drop(inner);
            self.flush_cv.notify_all();
            return;
        }

        let target = self.next_lsn.load(Ordering::SeqCst) - 1;
        self.flush_to_lsn(target);
    }

    /// Block until `persistent_lsn >= lsn`. Used by the buffer pool for
    /// the force-before-evict rule and by commit for durability.
    pub fn flush_to_lsn(&self, lsn: Lsn) {
        while self.persistent_lsn() < lsn {
            self.force_flush_once();
            // an in-flight batch updates persistent_lsn without our waiter
            std::thread::yield_now();
        }
    }

    /// One forced round: swap if possible, signal the flusher, and wait
    /// for it to finish a batch.
    fn force_flush_once(&self) {
        let receiver;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.flush_buffer.is_empty() {
                if inner.log_buffer.is_empty() {
                    // everything appended is already durable
                    return;
                }
                self.swap_buffers(&mut inner);
            }
            let (tx, rx) = mpsc::channel();
            inner.flush_waiter = Some(tx);
            receiver = rx;
        }
        self.flush_cv.notify_all();
        // a disconnect also means the batch completed
        let _ = receiver.recv();
    }

    fn flush_loop(&self) {
        while ENABLE_LOGGING.load(Ordering::SeqCst) {
            let mut inner = self.inner.lock().unwrap();

            if inner.flush_buffer.is_empty() {
                let (guard, _timeout) = self.flush_cv.wait_timeout(inner, LOG_TIMEOUT).unwrap();
                inner = guard;
                if inner.flush_buffer.is_empty() && !inner.log_buffer.is_empty() {
                    self.swap_buffers(&mut inner);
                }
            }

            if inner.flush_buffer.is_empty() {
                // nothing to write; a pending forcer is already satisfied
                if let Some(waiter) = inner.flush_waiter.take() {
                    let _ = waiter.send(());
                }
                continue;
            }

            let data = mem::take(&mut inner.flush_buffer);
            let durable_lsn = inner.flush_lsn;
            let waiter = inner.flush_waiter.take();
            drop(inner);

            if let Err(e) = self.disk_manager.write_log(&data) {
                // the WAL is the durability story; there is no way to
                // limp on without it
                error!("wal flush failed: {e}");
                panic!("wal flush failed: {e}");
            }
            self.set_persistent_lsn(durable_lsn);

            if let Some(waiter) = waiter {
                let _ = waiter.send(());
            }
            self.flush_cv.notify_all();

            // hand the drained allocation back for reuse
            let mut inner = self.inner.lock().unwrap();
            if inner.flush_buffer.is_empty() {
                let mut drained = data;
                drained.clear();
                inner.flush_buffer = drained;
            }
        }

        // on shutdown, wake anyone still waiting on a forced flush
        let mut inner = self.inner.lock().unwrap();
        if let Some(waiter) = inner.flush_waiter.take() {
            let _ = waiter.send(());
        }
        drop(inner);
        self.flush_cv.notify_all();
    }
}
