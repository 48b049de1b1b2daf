use thiserror::Error;

use crate::common::config::PageId;
use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Page {0} is not a valid index page")]
    CorruptedPage(PageId),
}
