//! Write-ahead log records and their wire format.
//!
//! Every record starts with a 20-byte little-endian header:
//!
//! ```text
//! | size (i32) | lsn (i32) | txn_id (i32) | prev_lsn (i32) | kind (i32) |
//! ```
//!
//! followed by a payload that depends on the kind: data records carry the
//! rid (i32 page id, i32 slot) and the affected tuple(s) as
//! `i32 length | bytes`; new-page records carry the previous page id of
//! the heap chain; begin/commit/abort are header-only.

use byteorder::{ByteOrder, LittleEndian};

use crate::common::config::{Lsn, PageId, TxnId, INVALID_LSN, INVALID_TXN_ID};
use crate::common::rid::Rid;
use crate::storage::table::tuple::Tuple;

pub const HEADER_SIZE: usize = 20;
const RID_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LogRecordType {
    Invalid = 0,
    Insert = 1,
    MarkDelete = 2,
    ApplyDelete = 3,
    RollbackDelete = 4,
    Update = 5,
    Begin = 6,
    Commit = 7,
    Abort = 8,
    NewPage = 9,
}

impl LogRecordType {
    fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Insert),
            2 => Some(Self::MarkDelete),
            3 => Some(Self::ApplyDelete),
            4 => Some(Self::RollbackDelete),
            5 => Some(Self::Update),
            6 => Some(Self::Begin),
            7 => Some(Self::Commit),
            8 => Some(Self::Abort),
            9 => Some(Self::NewPage),
            _ => None,
        }
    }
}

/// Kind-specific body of a log record.
#[derive(Debug, Clone)]
pub enum LogPayload {
    Begin,
    Commit,
    Abort,
    Insert { rid: Rid, tuple: Tuple },
    MarkDelete { rid: Rid, tuple: Tuple },
    ApplyDelete { rid: Rid, tuple: Tuple },
    RollbackDelete { rid: Rid, tuple: Tuple },
    Update { rid: Rid, old_tuple: Tuple, new_tuple: Tuple },
    NewPage { prev_page_id: PageId },
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub payload: LogPayload,
}

impl LogRecord {
    pub fn new(txn_id: TxnId, prev_lsn: Lsn, payload: LogPayload) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            payload,
        }
    }

    pub fn new_begin(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::Begin)
    }

    pub fn new_commit(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::Commit)
    }

    pub fn new_abort(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::Abort)
    }

    pub fn record_type(&self) -> LogRecordType {
        match &self.payload {
            LogPayload::Begin => LogRecordType::Begin,
            LogPayload::Commit => LogRecordType::Commit,
            LogPayload::Abort => LogRecordType::Abort,
            LogPayload::Insert { .. } => LogRecordType::Insert,
            LogPayload::MarkDelete { .. } => LogRecordType::MarkDelete,
            LogPayload::ApplyDelete { .. } => LogRecordType::ApplyDelete,
            LogPayload::RollbackDelete { .. } => LogRecordType::RollbackDelete,
            LogPayload::Update { .. } => LogRecordType::Update,
            LogPayload::NewPage { .. } => LogRecordType::NewPage,
        }
    }

    /// Total serialized size, header included.
    pub fn size(&self) -> usize {
        HEADER_SIZE
            + match &self.payload {
                LogPayload::Begin | LogPayload::Commit | LogPayload::Abort => 0,
                LogPayload::Insert { tuple, .. }
                | LogPayload::MarkDelete { tuple, .. }
                | LogPayload::ApplyDelete { tuple, .. }
                | LogPayload::RollbackDelete { tuple, .. } => RID_SIZE + tuple.serialized_len(),
                LogPayload::Update {
                    old_tuple,
                    new_tuple,
                    ..
                } => RID_SIZE + old_tuple.serialized_len() + new_tuple.serialized_len(),
                LogPayload::NewPage { .. } => 4,
            }
    }

    /// Serialize into `buf`, which must be at least `self.size()` bytes.
    pub fn serialize_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(&mut buf[0..4], self.size() as i32);
        LittleEndian::write_i32(&mut buf[4..8], self.lsn);
        LittleEndian::write_i32(&mut buf[8..12], self.txn_id);
        LittleEndian::write_i32(&mut buf[12..16], self.prev_lsn);
        LittleEndian::write_i32(&mut buf[16..20], self.record_type() as i32);

        let mut pos = HEADER_SIZE;
        match &self.payload {
            LogPayload::Begin | LogPayload::Commit | LogPayload::Abort => {}
            LogPayload::Insert { rid, tuple }
            | LogPayload::MarkDelete { rid, tuple }
            | LogPayload::ApplyDelete { rid, tuple }
            | LogPayload::RollbackDelete { rid, tuple } => {
                write_rid(&mut buf[pos..], *rid);
                pos += RID_SIZE;
                tuple.serialize_into(&mut buf[pos..]);
            }
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            } => {
                write_rid(&mut buf[pos..], *rid);
                pos += RID_SIZE;
                old_tuple.serialize_into(&mut buf[pos..]);
                pos += old_tuple.serialized_len();
                new_tuple.serialize_into(&mut buf[pos..]);
            }
            LogPayload::NewPage { prev_page_id } => {
                LittleEndian::write_i32(&mut buf[pos..pos + 4], *prev_page_id);
            }
        }
    }

    /// Decode one record from the front of `buf`. Returns None for a
    /// truncated or invalid prefix, which redo treats as the end of the
    /// usable log.
    pub fn deserialize(buf: &[u8]) -> Option<LogRecord> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let size = LittleEndian::read_i32(&buf[0..4]);
        let lsn = LittleEndian::read_i32(&buf[4..8]);
        let txn_id = LittleEndian::read_i32(&buf[8..12]);
        let prev_lsn = LittleEndian::read_i32(&buf[12..16]);
        let kind = LogRecordType::from_i32(LittleEndian::read_i32(&buf[16..20]))?;

        if size < HEADER_SIZE as i32
            || lsn == INVALID_LSN
            || txn_id == INVALID_TXN_ID
            || buf.len() < size as usize
        {
            return None;
        }

        let body = &buf[HEADER_SIZE..size as usize];
        let payload = match kind {
            LogRecordType::Invalid => return None,
            LogRecordType::Begin => LogPayload::Begin,
            LogRecordType::Commit => LogPayload::Commit,
            LogRecordType::Abort => LogPayload::Abort,
            LogRecordType::Insert
            | LogRecordType::MarkDelete
            | LogRecordType::ApplyDelete
            | LogRecordType::RollbackDelete => {
                if body.len() < RID_SIZE {
                    return None;
                }
                let rid = read_rid(body);
                let tuple = Tuple::deserialize_from(&body[RID_SIZE..])?;
                match kind {
                    LogRecordType::Insert => LogPayload::Insert { rid, tuple },
                    LogRecordType::MarkDelete => LogPayload::MarkDelete { rid, tuple },
                    LogRecordType::ApplyDelete => LogPayload::ApplyDelete { rid, tuple },
                    _ => LogPayload::RollbackDelete { rid, tuple },
                }
            }
            LogRecordType::Update => {
                if body.len() < RID_SIZE {
                    return None;
                }
                let rid = read_rid(body);
                let old_tuple = Tuple::deserialize_from(&body[RID_SIZE..])?;
                let new_tuple =
                    Tuple::deserialize_from(&body[RID_SIZE + old_tuple.serialized_len()..])?;
                LogPayload::Update {
                    rid,
                    old_tuple,
                    new_tuple,
                }
            }
            LogRecordType::NewPage => {
                if body.len() < 4 {
                    return None;
                }
                LogPayload::NewPage {
                    prev_page_id: LittleEndian::read_i32(&body[0..4]),
                }
            }
        };

        Some(LogRecord {
            lsn,
            txn_id,
            prev_lsn,
            payload,
        })
    }
}

fn write_rid(buf: &mut [u8], rid: Rid) {
    LittleEndian::write_i32(&mut buf[0..4], rid.page_id());
    LittleEndian::write_i32(&mut buf[4..8], rid.slot_num());
}

fn read_rid(buf: &[u8]) -> Rid {
    Rid::new(
        LittleEndian::read_i32(&buf[0..4]),
        LittleEndian::read_i32(&buf[4..8]),
    )
}
