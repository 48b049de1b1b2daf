use std::cmp::Ordering;
use std::sync::atomic::{AtomicI32, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use crate::common::config::{PageId, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::common::rid::Rid;
use crate::index::btree::error::BTreeError;
use crate::index::btree::iterator::BTreeIterator;
use crate::index::btree::key::{IndexKey, KeyComparator};
use crate::index::btree::node::{InternalNode, LeafNode, Node, Operation};
use crate::index::btree::serialization::{
    decode_node, encode_internal, encode_leaf, encode_node, internal_capacity, leaf_capacity,
    set_parent_page_id,
};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::header_page;
use crate::storage::page::{PageReadGuard, PageWriteGuard};

type RootGuard = ArcMutexGuard<RawMutex, ()>;

/// Latches and bookkeeping owned by one modifying descent. Holding the
/// write guards here (rather than in thread-local state) scopes them to
/// the operation; releasing pops newest-first and unpins as it goes.
struct DescentContext {
    latches: Vec<(PageId, PageWriteGuard)>,
    deleted: Vec<PageId>,
    root_guard: Option<RootGuard>,
}

impl DescentContext {
    fn new() -> Self {
        Self {
            latches: Vec::new(),
            deleted: Vec::new(),
            root_guard: None,
        }
    }

    fn push(&mut self, page_id: PageId, guard: PageWriteGuard) {
        self.latches.push((page_id, guard));
    }

    fn pop(&mut self) -> Option<(PageId, PageWriteGuard)> {
        self.latches.pop()
    }

    fn top(&self) -> &PageWriteGuard {
        &self.latches.last().expect("descent holds no latch").1
    }

    fn top_mut(&mut self) -> &mut PageWriteGuard {
        &mut self.latches.last_mut().expect("descent holds no latch").1
    }

    /// Drop every held latch (unpinning dirty) and the root mutex.
    fn release_latches(&mut self, buffer_pool: &BufferPoolManager) {
        while let Some((page_id, guard)) = self.latches.pop() {
            drop(guard);
            buffer_pool.unpin_page(page_id, true);
        }
        self.root_guard = None;
    }

    /// Release everything, then reclaim pages emptied by this descent.
    fn finish(&mut self, buffer_pool: &BufferPoolManager) {
        self.release_latches(buffer_pool);
        for page_id in self.deleted.drain(..) {
            let _ = buffer_pool.delete_page(page_id);
        }
    }
}

/// A disk B+-tree over fixed-width keys with rids at the leaves. Unique
/// keys only; ordering comes from the caller's comparator.
///
/// Concurrency follows latch crabbing: descents latch the child before
/// releasing the parent, and modifying descents keep the whole unsafe
/// suffix of the path latched until the mutation cannot propagate
/// further. Root identity changes are serialized by a dedicated mutex
/// that only modifying descents take. The current root of every tree is
/// persisted in the header page under the index name.
pub struct BTreeIndex<K: IndexKey, C: KeyComparator<K>> {
    name: String,
    buffer_pool: Arc<BufferPoolManager>,
    comparator: C,
    root_page_id: AtomicI32,
    root_mutex: Arc<Mutex<()>>,
    leaf_max_size: usize,
    internal_max_size: usize,
    _marker: std::marker::PhantomData<K>,
}

impl<K: IndexKey, C: KeyComparator<K>> BTreeIndex<K, C> {
    /// Open (or lazily create) the index named `name`, with node
    /// capacities derived from the page size.
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        comparator: C,
    ) -> Result<Self, BTreeError> {
        Self::with_max_sizes(
            name,
            buffer_pool,
            comparator,
            leaf_capacity::<K>(),
            internal_capacity::<K>(),
        )
    }

    /// Like `new` but with explicit node capacities; small values force
    /// deep trees in tests.
    pub fn with_max_sizes(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        let name = name.into();
        debug_assert!(leaf_max_size >= 2 && internal_max_size >= 3);

        let root_page_id = {
            let header = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
            let root = header_page::get_root_id(&header.read(), &name);
            buffer_pool.unpin_page(HEADER_PAGE_ID, false);
            root.unwrap_or(INVALID_PAGE_ID)
        };

        Ok(Self {
            name,
            buffer_pool,
            comparator,
            root_page_id: AtomicI32::new(root_page_id),
            root_mutex: Arc::new(Mutex::new(())),
            leaf_max_size,
            internal_max_size,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id.load(AtomicOrdering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id() == INVALID_PAGE_ID
    }

    fn set_root_page_id(&self, page_id: PageId) {
        self.root_page_id.store(page_id, AtomicOrdering::SeqCst);
    }

    /// Point lookup. Read descents crab with read latches and never touch
    /// the root mutex.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let Some((guard, leaf)) = self.find_leaf_read(Some(key))? else {
            return Ok(None);
        };
        let result = leaf.lookup(key, &self.comparator);
        let page_id = leaf.page_id;
        drop(guard);
        self.buffer_pool.unpin_page(page_id, false);
        Ok(result)
    }

    /// Insert a unique key. Returns false (with no side effect) when the
    /// key is already present.
    pub fn insert(&self, key: &K, value: Rid) -> Result<bool, BTreeError> {
        let mut ctx = DescentContext::new();
        ctx.root_guard = Some(self.root_mutex.lock_arc());

        if self.is_empty() {
            self.start_new_tree(key, value)?;
            return Ok(true);
        }

        let mut leaf = self.find_leaf_write(key, Operation::Insert, &mut ctx)?;

        if leaf.lookup(key, &self.comparator).is_some() {
            ctx.finish(&self.buffer_pool);
            return Ok(false);
        }

        if leaf.size() < leaf.max_size {
            leaf.insert(*key, value, &self.comparator);
            encode_leaf(&leaf, ctx.top_mut());
            ctx.finish(&self.buffer_pool);
            return Ok(true);
        }

        // leaf is full: split it and push the separator up
        let (new_ptr, new_page_id) = self.buffer_pool.new_page()?;
        let right_guard = new_ptr.write_arc();
        let mut right = LeafNode::new(new_page_id, leaf.parent_page_id, leaf.max_size);
        right.entries = leaf.split_off_upper_half();

        if self.comparator.compare(key, &right.entries[0].0) == Ordering::Less {
            leaf.insert(*key, value, &self.comparator);
        } else {
            right.insert(*key, value, &self.comparator);
        }

        // keep the leaf chain in key order
        right.next_page_id = leaf.next_page_id;
        leaf.next_page_id = new_page_id;

        let separator = right.entries[0].0;
        let left_id = leaf.page_id;
        let left_parent_id = leaf.parent_page_id;
        encode_leaf(&leaf, ctx.top_mut());

        self.insert_into_parent(
            left_id,
            left_parent_id,
            separator,
            Node::Leaf(right),
            right_guard,
            &mut ctx,
        )?;
        ctx.finish(&self.buffer_pool);
        Ok(true)
    }

    /// Remove a key. Returns false when absent; otherwise rebalances with
    /// redistribution or coalescing as needed.
    pub fn remove(&self, key: &K) -> Result<bool, BTreeError> {
        let mut ctx = DescentContext::new();
        ctx.root_guard = Some(self.root_mutex.lock_arc());

        if self.is_empty() {
            return Ok(false);
        }

        let mut leaf = self.find_leaf_write(key, Operation::Delete, &mut ctx)?;

        if !leaf.remove(key, &self.comparator) {
            ctx.finish(&self.buffer_pool);
            return Ok(false);
        }

        if leaf.parent_page_id == INVALID_PAGE_ID {
            // the root is a leaf; removing the last key empties the tree
            if leaf.size() == 0 {
                ctx.deleted.push(leaf.page_id);
                self.set_root_page_id(INVALID_PAGE_ID);
                self.update_root_page_id(false)?;
            } else {
                encode_leaf(&leaf, ctx.top_mut());
            }
            ctx.finish(&self.buffer_pool);
            return Ok(true);
        }

        if leaf.size() >= leaf.min_size() {
            encode_leaf(&leaf, ctx.top_mut());
            ctx.finish(&self.buffer_pool);
            return Ok(true);
        }

        self.handle_underflow(Node::Leaf(leaf), &mut ctx)?;
        ctx.finish(&self.buffer_pool);
        Ok(true)
    }

    /// Iterator over the whole tree in key order.
    pub fn iter(&self) -> Result<BTreeIterator<K>, BTreeError> {
        let start = self.find_leaf_read(None)?;
        Ok(BTreeIterator::new(
            Arc::clone(&self.buffer_pool),
            start.map(|(guard, leaf)| (guard, leaf, 0)),
        ))
    }

    /// Iterator starting at the first key >= `key`.
    pub fn iter_from(&self, key: &K) -> Result<BTreeIterator<K>, BTreeError> {
        let start = self.find_leaf_read(Some(key))?.map(|(guard, leaf)| {
            let index = leaf.key_index(key, &self.comparator);
            (guard, leaf, index)
        });
        Ok(BTreeIterator::new(Arc::clone(&self.buffer_pool), start))
    }

    /// Read-crab down to a leaf: latch the child, then release the
    /// parent. `None` target descends to the leftmost leaf.
    fn find_leaf_read(
        &self,
        target: Option<&K>,
    ) -> Result<Option<(PageReadGuard, LeafNode<K>)>, BTreeError> {
        let mut current = self.root_page_id();
        if current == INVALID_PAGE_ID {
            return Ok(None);
        }

        let ptr = self.buffer_pool.fetch_page(current)?;
        let mut guard = ptr.read_arc();
        let mut node = decode_node::<K>(&guard)?;

        loop {
            let internal = match node {
                Node::Leaf(leaf) => return Ok(Some((guard, leaf))),
                Node::Internal(internal) => internal,
            };

            let child_id = match target {
                Some(key) => internal.lookup(key, &self.comparator),
                None => internal.value_at(0),
            };

            let child_ptr = self.buffer_pool.fetch_page(child_id)?;
            let child_guard = child_ptr.read_arc();
            node = decode_node::<K>(&child_guard)?;

            drop(guard);
            self.buffer_pool.unpin_page(current, false);
            guard = child_guard;
            current = child_id;
        }
    }

    /// Write-crab down to the target leaf, releasing ancestor latches
    /// (and the root mutex) whenever the just-latched child is safe for
    /// the operation. The leaf's guard ends up on top of the context.
    fn find_leaf_write(
        &self,
        key: &K,
        op: Operation,
        ctx: &mut DescentContext,
    ) -> Result<LeafNode<K>, BTreeError> {
        let mut current = self.root_page_id();

        let ptr = self.buffer_pool.fetch_page(current)?;
        let guard = ptr.write_arc();
        let mut node = decode_node::<K>(&guard)?;
        ctx.push(current, guard);

        loop {
            let internal = match node {
                Node::Leaf(leaf) => return Ok(leaf),
                Node::Internal(internal) => internal,
            };

            current = internal.lookup(key, &self.comparator);
            let child_ptr = self.buffer_pool.fetch_page(current)?;
            let child_guard = child_ptr.write_arc();
            node = decode_node::<K>(&child_guard)?;

            if node.is_safe(op) {
                ctx.release_latches(&self.buffer_pool);
            }
            ctx.push(current, child_guard);
        }
    }

    /// First insert into an empty tree: a single leaf becomes the root
    /// and the name -> root record is created in the header page.
    fn start_new_tree(&self, key: &K, value: Rid) -> Result<(), BTreeError> {
        let (ptr, root_id) = self.buffer_pool.new_page()?;
        {
            let mut page = ptr.write();
            let mut root = LeafNode::new(root_id, INVALID_PAGE_ID, self.leaf_max_size);
            root.insert(*key, value, &self.comparator);
            encode_leaf(&root, &mut page);
        }
        self.buffer_pool.unpin_page(root_id, true);

        self.set_root_page_id(root_id);
        self.update_root_page_id(true)?;
        Ok(())
    }

    /// Propagate a split upward. `right` is the freshly created sibling
    /// of the node whose guard sits on top of the context; it is still
    /// latched via `right_guard`.
    fn insert_into_parent(
        &self,
        mut left_id: PageId,
        mut left_parent_id: PageId,
        mut separator: K,
        mut right: Node<K>,
        mut right_guard: PageWriteGuard,
        ctx: &mut DescentContext,
    ) -> Result<(), BTreeError> {
        loop {
            if left_parent_id == INVALID_PAGE_ID {
                // the split reached the root: grow the tree by one level
                let (root_ptr, root_id) = self.buffer_pool.new_page()?;
                let mut root_guard = root_ptr.write_arc();
                let mut root =
                    InternalNode::<K>::new(root_id, INVALID_PAGE_ID, self.internal_max_size);
                root.populate_new_root(left_id, separator, right.page_id());
                encode_internal(&root, &mut root_guard);

                set_parent_page_id(ctx.top_mut(), root_id);
                set_node_parent(&mut right, root_id);
                encode_node(&right, &mut right_guard);

                self.set_root_page_id(root_id);
                self.update_root_page_id(false)?;

                drop(root_guard);
                self.buffer_pool.unpin_page(root_id, true);
                drop(right_guard);
                self.buffer_pool.unpin_page(right.page_id(), true);
                return Ok(());
            }

            // the parent latch is directly below the left child on the
            // context; retire the child before touching it
            let (left_page_id, left_guard) = ctx
                .pop()
                .expect("unsafe child must keep its parent latched");
            debug_assert_eq!(left_page_id, left_id);
            drop(left_guard);
            self.buffer_pool.unpin_page(left_page_id, true);

            let mut parent = match decode_node::<K>(ctx.top())? {
                Node::Internal(parent) => parent,
                Node::Leaf(_) => return Err(BTreeError::CorruptedPage(left_parent_id)),
            };
            debug_assert_eq!(parent.page_id, left_parent_id);

            if parent.size() < parent.max_size {
                parent.insert_after(left_id, separator, right.page_id());
                set_node_parent(&mut right, parent.page_id);
                encode_node(&right, &mut right_guard);
                drop(right_guard);
                self.buffer_pool.unpin_page(right.page_id(), true);

                encode_internal(&parent, ctx.top_mut());
                return Ok(());
            }

            // parent is full too: split it and continue upward
            let mut combined = std::mem::take(&mut parent.entries);
            let pos = combined
                .iter()
                .position(|&(_, child)| child == left_id)
                .expect("split child must be present in its parent");
            combined.insert(pos + 1, (separator, right.page_id()));

            let keep = (combined.len() + 1) / 2;
            let upper_half = combined.split_off(keep);
            parent.entries = combined;

            let (new_ptr, new_internal_id) = self.buffer_pool.new_page()?;
            let mut new_guard = new_ptr.write_arc();
            let new_internal = InternalNode::<K> {
                page_id: new_internal_id,
                parent_page_id: parent.parent_page_id,
                max_size: parent.max_size,
                entries: upper_half,
            };
            let new_separator = new_internal.key_at(0);

            // children that moved into the new node change parents; the
            // lower-level right sibling is still latched by us, so it is
            // patched through its own guard
            let right_moved = new_internal
                .entries
                .iter()
                .any(|&(_, child)| child == right.page_id());
            for &(_, child_id) in &new_internal.entries {
                if child_id == right.page_id() {
                    continue;
                }
                let child_ptr = self.buffer_pool.fetch_page(child_id)?;
                set_parent_page_id(&mut child_ptr.write(), new_internal_id);
                self.buffer_pool.unpin_page(child_id, true);
            }
            set_node_parent(
                &mut right,
                if right_moved {
                    new_internal_id
                } else {
                    parent.page_id
                },
            );
            encode_node(&right, &mut right_guard);
            drop(right_guard);
            self.buffer_pool.unpin_page(right.page_id(), true);

            encode_internal(&parent, ctx.top_mut());
            encode_internal(&new_internal, &mut new_guard);

            left_id = parent.page_id;
            left_parent_id = parent.parent_page_id;
            separator = new_separator;
            right = Node::Internal(new_internal);
            right_guard = new_guard;
        }
    }

    /// Rebalance after a delete left `node` under-full. Borrows one entry
    /// from a sibling when the pair can spare it, otherwise merges the
    /// two and recurses on the parent, shrinking the tree at the root.
    fn handle_underflow(&self, mut node: Node<K>, ctx: &mut DescentContext) -> Result<(), BTreeError> {
        loop {
            let (node_page_id, mut node_guard) = ctx
                .pop()
                .expect("under-full node must keep its parent latched");
            debug_assert_eq!(node_page_id, node.page_id());

            let mut parent = match decode_node::<K>(ctx.top())? {
                Node::Internal(parent) => parent,
                Node::Leaf(_) => return Err(BTreeError::CorruptedPage(node.page_id())),
            };

            let value_index = parent
                .value_index(node.page_id())
                .expect("child must be present in its parent");
            // prefer the left sibling; the leftmost child borrows right
            let sibling_pos = if value_index == 0 { 1 } else { value_index - 1 };
            let sibling_id = parent.value_at(sibling_pos);

            let sibling_ptr = self.buffer_pool.fetch_page(sibling_id)?;
            let mut sibling_guard = sibling_ptr.write_arc();
            let mut sibling = decode_node::<K>(&sibling_guard)?;

            if sibling.size() + node.size() > node.max_size() {
                self.redistribute(&mut node, &mut sibling, &mut parent, value_index)?;
                encode_node(&node, &mut node_guard);
                encode_node(&sibling, &mut sibling_guard);
                encode_internal(&parent, ctx.top_mut());

                drop(node_guard);
                self.buffer_pool.unpin_page(node.page_id(), true);
                drop(sibling_guard);
                self.buffer_pool.unpin_page(sibling_id, true);
                return Ok(());
            }

            // merge the right member of the pair into the left
            if value_index == 0 {
                // sibling sits to the right of node
                let separator = parent.key_at(1);
                self.merge(&mut node, sibling, separator)?;
                parent.remove(1);
                ctx.deleted.push(sibling_id);
                encode_node(&node, &mut node_guard);
            } else {
                let separator = parent.key_at(value_index);
                self.merge(&mut sibling, node, separator)?;
                parent.remove(value_index);
                ctx.deleted.push(node_page_id);
                encode_node(&sibling, &mut sibling_guard);
            }
            drop(node_guard);
            self.buffer_pool.unpin_page(node_page_id, true);
            drop(sibling_guard);
            self.buffer_pool.unpin_page(sibling_id, true);

            if parent.parent_page_id == INVALID_PAGE_ID {
                // the root shrank: with a single child left, that child
                // becomes the new root
                if parent.size() == 1 {
                    let only_child = parent.value_at(0);
                    self.set_root_page_id(only_child);
                    self.update_root_page_id(false)?;

                    let child_ptr = self.buffer_pool.fetch_page(only_child)?;
                    set_parent_page_id(&mut child_ptr.write(), INVALID_PAGE_ID);
                    self.buffer_pool.unpin_page(only_child, true);

                    ctx.deleted.push(parent.page_id);
                } else {
                    encode_internal(&parent, ctx.top_mut());
                }
                return Ok(());
            }

            if parent.size() > parent.min_size() {
                encode_internal(&parent, ctx.top_mut());
                return Ok(());
            }

            // parent is now under-full itself
            node = Node::Internal(parent);
        }
    }

    /// Move one entry from `sibling` into `node` and rewrite the
    /// separator in the parent. `value_index` is node's position in the
    /// parent; 0 means the sibling is the right neighbor.
    fn redistribute(
        &self,
        node: &mut Node<K>,
        sibling: &mut Node<K>,
        parent: &mut InternalNode<K>,
        value_index: usize,
    ) -> Result<(), BTreeError> {
        match (node, sibling) {
            (Node::Leaf(node), Node::Leaf(sibling)) => {
                if value_index == 0 {
                    // pull the right sibling's first entry to our end
                    let entry = sibling.entries.remove(0);
                    node.entries.push(entry);
                    parent.set_key_at(1, sibling.entries[0].0);
                } else {
                    // pull the left sibling's last entry to our front
                    let entry = sibling.entries.pop().expect("sibling cannot be empty");
                    parent.set_key_at(value_index, entry.0);
                    node.entries.insert(0, entry);
                }
                Ok(())
            }
            (Node::Internal(node), Node::Internal(sibling)) => {
                if value_index == 0 {
                    // rotate left through the separator
                    let separator = parent.key_at(1);
                    let moved_child = sibling.value_at(0);
                    let next_separator = sibling.key_at(1);
                    sibling.entries.remove(0);
                    node.entries.push((separator, moved_child));
                    parent.set_key_at(1, next_separator);
                    self.reparent(moved_child, node.page_id)?;
                } else {
                    // rotate right through the separator
                    let (last_key, moved_child) =
                        sibling.entries.pop().expect("sibling cannot be empty");
                    let separator = parent.key_at(value_index);
                    let old_leftmost = node.value_at(0);
                    node.entries.insert(1, (separator, old_leftmost));
                    node.entries[0].1 = moved_child;
                    parent.set_key_at(value_index, last_key);
                    self.reparent(moved_child, node.page_id)?;
                }
                Ok(())
            }
            (node, _) => Err(BTreeError::CorruptedPage(node.page_id())),
        }
    }

    /// Fold `right` into `left`, pulling the separator key down for
    /// internal nodes and splicing the leaf chain for leaves.
    fn merge(&self, left: &mut Node<K>, right: Node<K>, separator: K) -> Result<(), BTreeError> {
        match (left, right) {
            (Node::Leaf(left), Node::Leaf(right)) => {
                left.entries.extend(right.entries);
                left.next_page_id = right.next_page_id;
                Ok(())
            }
            (Node::Internal(left), Node::Internal(mut right)) => {
                right.entries[0].0 = separator;
                for &(_, child_id) in &right.entries {
                    self.reparent(child_id, left.page_id)?;
                }
                left.entries.extend(right.entries);
                Ok(())
            }
            (left, _) => Err(BTreeError::CorruptedPage(left.page_id())),
        }
    }

    /// Rewrite a child's parent pointer in place.
    fn reparent(&self, child_id: PageId, parent_id: PageId) -> Result<(), BTreeError> {
        let child_ptr = self.buffer_pool.fetch_page(child_id)?;
        set_parent_page_id(&mut child_ptr.write(), parent_id);
        self.buffer_pool.unpin_page(child_id, true);
        Ok(())
    }

    /// Persist the current root under the index name in the header page.
    /// `insert` creates the record on first use; otherwise it is
    /// rewritten in place.
    fn update_root_page_id(&self, insert: bool) -> Result<(), BTreeError> {
        let header = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut page = header.write();
            let root = self.root_page_id();
            if !insert || !header_page::insert_record(&mut page, &self.name, root) {
                header_page::update_record(&mut page, &self.name, root);
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true);
        Ok(())
    }
}

fn set_node_parent<K: IndexKey>(node: &mut Node<K>, parent_id: PageId) {
    match node {
        Node::Internal(n) => n.parent_page_id = parent_id,
        Node::Leaf(n) => n.parent_page_id = parent_id,
    }
}
