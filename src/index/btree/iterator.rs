use std::sync::Arc;

use crate::common::config::INVALID_PAGE_ID;
use crate::common::rid::Rid;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::{LeafNode, Node};
use crate::index::btree::serialization::decode_node;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::PageReadGuard;

/// Forward iterator over the leaf chain, yielding (key, rid) pairs in
/// ascending key order.
///
/// The current leaf stays pinned and read-latched while the iterator sits
/// on it. Stepping to the next leaf latches it before the previous one is
/// released, so the chain cannot be cut underneath the scan.
pub struct BTreeIterator<K: IndexKey> {
    buffer_pool: Arc<BufferPoolManager>,
    current: Option<(PageReadGuard, LeafNode<K>, usize)>,
}

impl<K: IndexKey> BTreeIterator<K> {
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        start: Option<(PageReadGuard, LeafNode<K>, usize)>,
    ) -> Self {
        Self {
            buffer_pool,
            current: start,
        }
    }

    fn release_current(&mut self) {
        if let Some((guard, leaf, _)) = self.current.take() {
            drop(guard);
            self.buffer_pool.unpin_page(leaf.page_id, false);
        }
    }
}

impl<K: IndexKey> Iterator for BTreeIterator<K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<(K, Rid)> {
        loop {
            let (_, leaf, index) = self.current.as_mut()?;

            if *index < leaf.entries.len() {
                let entry = leaf.entries[*index];
                *index += 1;
                return Some(entry);
            }

            let next_page_id = leaf.next_page_id;
            if next_page_id == INVALID_PAGE_ID {
                self.release_current();
                return None;
            }

            // latch the next leaf before letting go of this one
            let Ok(next_ptr) = self.buffer_pool.fetch_page(next_page_id) else {
                self.release_current();
                return None;
            };
            let next_guard = next_ptr.read_arc();
            let next_leaf = match decode_node::<K>(&next_guard) {
                Ok(Node::Leaf(leaf)) => leaf,
                _ => {
                    drop(next_guard);
                    self.buffer_pool.unpin_page(next_page_id, false);
                    self.release_current();
                    return None;
                }
            };

            self.release_current();
            self.current = Some((next_guard, next_leaf, 0));
        }
    }
}

impl<K: IndexKey> Drop for BTreeIterator<K> {
    fn drop(&mut self) {
        self.release_current();
    }
}
