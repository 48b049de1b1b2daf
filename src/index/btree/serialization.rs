//! Binary layout of B+-tree pages.
//!
//! Internal and leaf pages share a common header; leaves add the
//! next-leaf pointer. Entries are fixed-width (key, value) pairs sorted
//! by key, so capacities derive from the page size and the key width.
//!
//! ```text
//!  -------------------------------------------------------------------
//! | PageId (4) | LSN (4) | PageType (4) | Size (4) | MaxSize (4) |
//! | ParentPageId (4) | [NextPageId (4), leaves only] | entries ...    |
//!  -------------------------------------------------------------------
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::common::config::{PageId, PAGE_SIZE};
use crate::common::rid::Rid;
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::{InternalNode, LeafNode, Node};
use crate::storage::page::page::Page;

const PAGE_TYPE_OFFSET: usize = 8;
const SIZE_OFFSET: usize = 12;
const MAX_SIZE_OFFSET: usize = 16;
const PARENT_OFFSET: usize = 20;
const NEXT_LEAF_OFFSET: usize = 24;

const INTERNAL_HEADER_SIZE: usize = 24;
const LEAF_HEADER_SIZE: usize = 28;

const PAGE_TYPE_INTERNAL: i32 = 1;
const PAGE_TYPE_LEAF: i32 = 2;

const INTERNAL_VALUE_SIZE: usize = 4; // child page id
const LEAF_VALUE_SIZE: usize = 8; // rid

/// Entries an internal page can hold (including the leftmost-child
/// slot).
pub fn internal_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - INTERNAL_HEADER_SIZE) / (K::WIDTH + INTERNAL_VALUE_SIZE)
}

/// Entries a leaf page can hold.
pub fn leaf_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - LEAF_HEADER_SIZE) / (K::WIDTH + LEAF_VALUE_SIZE)
}

pub fn encode_internal<K: IndexKey>(node: &InternalNode<K>, page: &mut Page) {
    LittleEndian::write_i32(&mut page.data[0..4], node.page_id);
    page.page_id = node.page_id;
    LittleEndian::write_i32(
        &mut page.data[PAGE_TYPE_OFFSET..PAGE_TYPE_OFFSET + 4],
        PAGE_TYPE_INTERNAL,
    );
    LittleEndian::write_i32(&mut page.data[SIZE_OFFSET..SIZE_OFFSET + 4], node.size() as i32);
    LittleEndian::write_i32(
        &mut page.data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4],
        node.max_size as i32,
    );
    LittleEndian::write_i32(
        &mut page.data[PARENT_OFFSET..PARENT_OFFSET + 4],
        node.parent_page_id,
    );

    let mut pos = INTERNAL_HEADER_SIZE;
    for (key, child) in &node.entries {
        key.write_to(&mut page.data[pos..pos + K::WIDTH]);
        pos += K::WIDTH;
        LittleEndian::write_i32(&mut page.data[pos..pos + 4], *child);
        pos += 4;
    }
}

pub fn encode_leaf<K: IndexKey>(node: &LeafNode<K>, page: &mut Page) {
    LittleEndian::write_i32(&mut page.data[0..4], node.page_id);
    page.page_id = node.page_id;
    LittleEndian::write_i32(
        &mut page.data[PAGE_TYPE_OFFSET..PAGE_TYPE_OFFSET + 4],
        PAGE_TYPE_LEAF,
    );
    LittleEndian::write_i32(&mut page.data[SIZE_OFFSET..SIZE_OFFSET + 4], node.size() as i32);
    LittleEndian::write_i32(
        &mut page.data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4],
        node.max_size as i32,
    );
    LittleEndian::write_i32(
        &mut page.data[PARENT_OFFSET..PARENT_OFFSET + 4],
        node.parent_page_id,
    );
    LittleEndian::write_i32(
        &mut page.data[NEXT_LEAF_OFFSET..NEXT_LEAF_OFFSET + 4],
        node.next_page_id,
    );

    let mut pos = LEAF_HEADER_SIZE;
    for (key, rid) in &node.entries {
        key.write_to(&mut page.data[pos..pos + K::WIDTH]);
        pos += K::WIDTH;
        LittleEndian::write_i32(&mut page.data[pos..pos + 4], rid.page_id());
        LittleEndian::write_i32(&mut page.data[pos + 4..pos + 8], rid.slot_num());
        pos += 8;
    }
}

pub fn encode_node<K: IndexKey>(node: &Node<K>, page: &mut Page) {
    match node {
        Node::Internal(n) => encode_internal(n, page),
        Node::Leaf(n) => encode_leaf(n, page),
    }
}

pub fn decode_node<K: IndexKey>(page: &Page) -> Result<Node<K>, BTreeError> {
    let page_id = LittleEndian::read_i32(&page.data[0..4]);
    let page_type = LittleEndian::read_i32(&page.data[PAGE_TYPE_OFFSET..PAGE_TYPE_OFFSET + 4]);
    let size = LittleEndian::read_i32(&page.data[SIZE_OFFSET..SIZE_OFFSET + 4]);
    let max_size = LittleEndian::read_i32(&page.data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4]);
    let parent = LittleEndian::read_i32(&page.data[PARENT_OFFSET..PARENT_OFFSET + 4]);

    if size < 0 || max_size <= 0 {
        return Err(BTreeError::CorruptedPage(page.page_id));
    }

    match page_type {
        PAGE_TYPE_INTERNAL => {
            let mut node = InternalNode::new(page_id, parent, max_size as usize);
            node.entries.clear();
            let mut pos = INTERNAL_HEADER_SIZE;
            for _ in 0..size {
                let key = K::read_from(&page.data[pos..pos + K::WIDTH]);
                pos += K::WIDTH;
                let child = LittleEndian::read_i32(&page.data[pos..pos + 4]);
                pos += 4;
                node.entries.push((key, child));
            }
            Ok(Node::Internal(node))
        }
        PAGE_TYPE_LEAF => {
            let mut node = LeafNode::new(page_id, parent, max_size as usize);
            node.next_page_id =
                LittleEndian::read_i32(&page.data[NEXT_LEAF_OFFSET..NEXT_LEAF_OFFSET + 4]);
            let mut pos = LEAF_HEADER_SIZE;
            for _ in 0..size {
                let key = K::read_from(&page.data[pos..pos + K::WIDTH]);
                pos += K::WIDTH;
                let rid = Rid::new(
                    LittleEndian::read_i32(&page.data[pos..pos + 4]),
                    LittleEndian::read_i32(&page.data[pos + 4..pos + 8]),
                );
                pos += 8;
                node.entries.push((key, rid));
            }
            Ok(Node::Leaf(node))
        }
        _ => Err(BTreeError::CorruptedPage(page.page_id)),
    }
}

/// Rewrite just the parent pointer of an index page; used when splits and
/// merges move children between parents.
pub fn set_parent_page_id(page: &mut Page, parent: PageId) {
    LittleEndian::write_i32(&mut page.data[PARENT_OFFSET..PARENT_OFFSET + 4], parent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::INVALID_PAGE_ID;
    use crate::index::btree::key::{GenericKey, I64KeyComparator, KeyComparator};

    #[test]
    fn test_leaf_encode_decode_round_trip() {
        let mut node = LeafNode::<GenericKey<8>>::new(5, 2, leaf_capacity::<GenericKey<8>>());
        node.next_page_id = 9;
        for k in [3i64, 8, 15] {
            node.entries
                .push((GenericKey::from_i64(k), Rid::new(1, k as i32)));
        }

        let mut page = Page::new(5);
        encode_leaf(&node, &mut page);

        match decode_node::<GenericKey<8>>(&page).unwrap() {
            Node::Leaf(back) => {
                assert_eq!(back.page_id, 5);
                assert_eq!(back.parent_page_id, 2);
                assert_eq!(back.next_page_id, 9);
                assert_eq!(back.size(), 3);
                assert_eq!(back.entries[1].0.to_i64(), 8);
                assert_eq!(back.entries[2].1, Rid::new(1, 15));
            }
            _ => panic!("decoded wrong node type"),
        }
    }

    #[test]
    fn test_internal_encode_decode_round_trip() {
        let cmp = I64KeyComparator;
        let mut node =
            InternalNode::<GenericKey<8>>::new(3, INVALID_PAGE_ID, internal_capacity::<GenericKey<8>>());
        node.populate_new_root(10, GenericKey::from_i64(100), 20);

        let mut page = Page::new(3);
        encode_internal(&node, &mut page);

        match decode_node::<GenericKey<8>>(&page).unwrap() {
            Node::Internal(back) => {
                assert_eq!(back.size(), 2);
                assert_eq!(back.lookup(&GenericKey::from_i64(50), &cmp), 10);
                assert_eq!(back.lookup(&GenericKey::from_i64(150), &cmp), 20);
                assert_eq!(cmp.compare(&back.key_at(1), &GenericKey::from_i64(100)),
                    std::cmp::Ordering::Equal);
            }
            _ => panic!("decoded wrong node type"),
        }
    }

    #[test]
    fn test_decode_rejects_untyped_page() {
        let page = Page::new(1);
        assert!(decode_node::<GenericKey<8>>(&page).is_err());
    }

    #[test]
    fn test_capacities_fill_the_page() {
        // 8-byte keys: internal pairs are 12 bytes, leaf pairs 16 bytes
        assert_eq!(internal_capacity::<GenericKey<8>>(), (PAGE_SIZE - 24) / 12);
        assert_eq!(leaf_capacity::<GenericKey<8>>(), (PAGE_SIZE - 28) / 16);
    }
}
