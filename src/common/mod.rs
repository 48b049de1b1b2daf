pub mod config;
pub mod rid;

pub use config::{FrameId, Lsn, PageId, TxnId};
pub use rid::Rid;
