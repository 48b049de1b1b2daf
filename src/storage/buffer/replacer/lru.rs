use std::hash::Hash;

use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

/// Least-recently-used victim selection over the set of replaceable
/// frames. The ordered map keeps insertion order front-to-back, so the
/// front is always the coldest entry.
pub struct LruReplacer<T: Hash + Eq + Copy> {
    entries: Mutex<LinkedHashMap<T, ()>>,
}

impl<T: Hash + Eq + Copy> LruReplacer<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(LinkedHashMap::new()),
        }
    }

    /// Mark `value` as a replacement candidate, moving it to the
    /// most-recently-used end if it is already tracked.
    pub fn insert(&self, value: T) {
        let mut entries = self.entries.lock();
        if entries.get_refresh(&value).is_none() {
            entries.insert(value, ());
        }
    }

    /// Pop the least recently used entry, if any.
    pub fn victim(&self) -> Option<T> {
        self.entries.lock().pop_front().map(|(value, ())| value)
    }

    /// Remove `value` from the candidate set; returns whether it was
    /// present.
    pub fn erase(&self, value: T) -> bool {
        self.entries.lock().remove(&value).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<T: Hash + Eq + Copy> Default for LruReplacer<T> {
    fn default() -> Self {
        Self::new()
    }
}
