pub mod error;
pub mod index;
pub mod iterator;
pub mod key;
pub mod node;
pub mod serialization;

pub use error::BTreeError;
pub use index::BTreeIndex;
pub use iterator::BTreeIterator;
pub use key::{GenericKey, I64KeyComparator, IndexKey, KeyComparator, OrdComparator};
