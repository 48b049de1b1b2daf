use std::sync::Arc;

use crate::common::rid::Rid;
use crate::storage::table::table_heap::TableHeap;
use crate::storage::table::tuple::Tuple;
use crate::transaction::concurrency::transaction::Transaction;

/// Forward scan over the live tuples of a table heap. Each step reads
/// under the scanning transaction's shared lock, so the scan observes a
/// consistent committed state under strict 2PL.
pub struct TableIterator<'a> {
    heap: Arc<TableHeap>,
    rid: Option<Rid>,
    txn: &'a Transaction,
}

impl<'a> TableIterator<'a> {
    pub(crate) fn new(heap: Arc<TableHeap>, rid: Option<Rid>, txn: &'a Transaction) -> Self {
        Self { heap, rid, txn }
    }
}

impl Iterator for TableIterator<'_> {
    type Item = Tuple;

    fn next(&mut self) -> Option<Tuple> {
        while let Some(rid) = self.rid {
            self.rid = self.heap.next_live_rid(rid);
            // a tuple can disappear between positioning and reading;
            // skip over it rather than ending the scan
            if let Some(tuple) = self.heap.get_tuple(rid, self.txn) {
                return Some(tuple);
            }
        }
        None
    }
}
