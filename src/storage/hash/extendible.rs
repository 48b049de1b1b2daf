use std::collections::hash_map::RandomState;
use std::collections::BTreeMap;
use std::hash::{BuildHasher, Hash};

use parking_lot::Mutex;

/// In-memory extendible hash table with unique keys, used by the buffer
/// pool as its page-id -> frame mapping.
///
/// A directory indexed by the low `global_depth` bits of the key hash
/// points at buckets of bounded capacity. Overflowing a bucket splits only
/// that bucket (raising its local depth); the directory doubles only when
/// a bucket's local depth would exceed the global depth. Shrink/merge is
/// not supported.
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    inner: Mutex<Inner<K, V>>,
    hash_builder: S,
}

struct Inner<K, V> {
    bucket_size: usize,
    global_depth: usize,
    pair_count: usize,
    bucket_count: usize,
    /// Directory entries are indices into `buckets`; several entries may
    /// share one bucket. `None` marks a slot that is materialized on first
    /// touch.
    directory: Vec<Option<usize>>,
    buckets: Vec<Bucket<K, V>>,
}

struct Bucket<K, V> {
    /// Low `depth` bits shared by every key hash in this bucket.
    id: usize,
    depth: usize,
    /// Set when every key collides through the full hash width; such a
    /// bucket grows past capacity instead of splitting forever.
    overflow: bool,
    items: BTreeMap<K, V>,
}

impl<K, V> ExtendibleHashTable<K, V, RandomState>
where
    K: Hash + Ord + Clone,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, RandomState::new())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Ord + Clone,
    V: Clone,
    S: BuildHasher,
{
    pub fn with_hasher(bucket_size: usize, hash_builder: S) -> Self {
        let inner = Inner {
            bucket_size,
            global_depth: 0,
            pair_count: 0,
            bucket_count: 1,
            directory: vec![Some(0)],
            buckets: vec![Bucket {
                id: 0,
                depth: 0,
                overflow: false,
                items: BTreeMap::new(),
            }],
        };
        Self {
            inner: Mutex::new(inner),
            hash_builder,
        }
    }

    fn hash(&self, key: &K) -> usize {
        self.hash_builder.hash_one(key) as usize
    }

    /// Look up the value stored under `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let slot = self.hash(key) & ((1 << inner.global_depth) - 1);
        let bucket_idx = inner.directory[slot]?;
        inner.buckets[bucket_idx].items.get(key).cloned()
    }

    /// Remove `key`; returns whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let slot = self.hash(key) & ((1 << inner.global_depth) - 1);
        let Some(bucket_idx) = inner.directory[slot] else {
            return false;
        };
        let removed = inner.buckets[bucket_idx].items.remove(key).is_some();
        if removed {
            inner.pair_count -= 1;
        }
        removed
    }

    /// Insert `key -> value`, overwriting any existing value. Splits the
    /// target bucket when it overflows its capacity, doubling the
    /// directory if the split raises the local depth past the global
    /// depth.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let slot = self.hash(&key) & ((1 << inner.global_depth) - 1);

        let bucket_idx = match inner.directory[slot] {
            Some(idx) => idx,
            None => {
                let depth = inner.global_depth;
                inner.buckets.push(Bucket {
                    id: slot,
                    depth,
                    overflow: false,
                    items: BTreeMap::new(),
                });
                inner.bucket_count += 1;
                let idx = inner.buckets.len() - 1;
                inner.directory[slot] = Some(idx);
                idx
            }
        };

        let bucket = &mut inner.buckets[bucket_idx];
        if bucket.items.insert(key.clone(), value).is_some() {
            // overwrite, no growth
            return;
        }
        inner.pair_count += 1;

        let bucket = &inner.buckets[bucket_idx];
        if bucket.items.len() <= inner.bucket_size || bucket.overflow {
            return;
        }

        let old_id = bucket.id;
        let old_depth = bucket.depth;

        let Some(new_idx) = self.split(&mut inner, bucket_idx) else {
            // all keys collide through the full hash width
            inner.buckets[bucket_idx].depth = old_depth;
            return;
        };

        if inner.buckets[bucket_idx].depth > inner.global_depth {
            self.grow_directory(&mut inner, bucket_idx, new_idx);
        } else {
            self.rewire_directory(&mut inner, bucket_idx, new_idx, old_id, old_depth);
        }
    }

    /// Split an overflowing bucket by the next hash bit, looping while one
    /// half stays empty. Returns the index of the new bucket, or `None` if
    /// the keys exhaust the hash width.
    fn split(&self, inner: &mut Inner<K, V>, bucket_idx: usize) -> Option<usize> {
        let mut new_items: BTreeMap<K, V> = BTreeMap::new();
        let mut new_id = 0;

        loop {
            let bucket = &mut inner.buckets[bucket_idx];
            bucket.depth += 1;
            let depth = bucket.depth;
            let bit = 1usize << (depth - 1);
            let mask = (1usize << depth) - 1;

            let items = std::mem::take(&mut bucket.items);
            for (k, v) in items {
                let h = self.hash_builder.hash_one(&k) as usize;
                if h & bit != 0 {
                    new_id = h & mask;
                    new_items.insert(k, v);
                } else {
                    inner.buckets[bucket_idx].items.insert(k, v);
                }
            }

            let bucket = &mut inner.buckets[bucket_idx];
            if bucket.items.is_empty() {
                // every key moved; keep the survivors in place and retry
                std::mem::swap(&mut bucket.items, &mut new_items);
                bucket.id = new_id;
            }

            if bucket.depth >= usize::BITS as usize {
                bucket.overflow = true;
                return None;
            }

            if !new_items.is_empty() {
                break;
            }
        }

        let depth = inner.buckets[bucket_idx].depth;
        inner.buckets.push(Bucket {
            id: new_id,
            depth,
            overflow: false,
            items: new_items,
        });
        inner.bucket_count += 1;
        Some(inner.buckets.len() - 1)
    }

    /// The split raised the local depth past the global depth: double the
    /// directory (possibly several times) and rebuild every entry so that
    /// each slot points at the bucket whose id matches its low
    /// `local_depth` bits.
    fn grow_directory(&self, inner: &mut Inner<K, V>, bucket_idx: usize, new_idx: usize) {
        let old_size = inner.directory.len();
        let factor = 1 << (inner.buckets[bucket_idx].depth - inner.global_depth);
        inner.global_depth = inner.buckets[bucket_idx].depth;
        inner.directory.resize(old_size * factor, None);

        let id = inner.buckets[bucket_idx].id;
        let new_id = inner.buckets[new_idx].id;
        inner.directory[id] = Some(bucket_idx);
        inner.directory[new_id] = Some(new_idx);

        for i in 0..old_size {
            let Some(b) = inner.directory[i] else {
                continue;
            };
            let b_id = inner.buckets[b].id;
            let b_depth = inner.buckets[b].depth;
            if i < b_id || (i & ((1 << b_depth) - 1)) != b_id {
                // stale alias from before the doubling
                inner.directory[i] = None;
            } else {
                let step = 1 << b_depth;
                let mut j = i + step;
                while j < inner.directory.len() {
                    inner.directory[j] = Some(b);
                    j += step;
                }
            }
        }
    }

    /// The split fit under the current global depth: only the directory
    /// entries sharing the old prefix are rewired between the two halves.
    fn rewire_directory(
        &self,
        inner: &mut Inner<K, V>,
        bucket_idx: usize,
        new_idx: usize,
        old_id: usize,
        old_depth: usize,
    ) {
        let mut i = old_id;
        while i < inner.directory.len() {
            inner.directory[i] = None;
            i += 1 << old_depth;
        }

        let id = inner.buckets[bucket_idx].id;
        let new_id = inner.buckets[new_idx].id;
        let step = 1 << inner.buckets[bucket_idx].depth;

        inner.directory[id] = Some(bucket_idx);
        inner.directory[new_id] = Some(new_idx);
        let mut j = id + step;
        while j < inner.directory.len() {
            inner.directory[j] = Some(bucket_idx);
            j += step;
        }
        let mut j = new_id + step;
        while j < inner.directory.len() {
            inner.directory[j] = Some(new_idx);
            j += step;
        }
    }

    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    /// Local depth of the bucket behind directory entry `dir_index`.
    pub fn local_depth(&self, dir_index: usize) -> Option<usize> {
        let inner = self.inner.lock();
        let idx = inner.directory.get(dir_index).copied().flatten()?;
        Some(inner.buckets[idx].depth)
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().bucket_count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pair_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check the directory invariant: every entry points at a bucket whose
    /// id equals the entry's low `local_depth` bits.
    #[cfg(test)]
    fn check_directory(&self) -> bool {
        let inner = self.inner.lock();
        inner.directory.iter().enumerate().all(|(i, entry)| {
            entry.map_or(true, |b| {
                i & ((1 << inner.buckets[b].depth) - 1) == inner.buckets[b].id
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::Hasher;

    /// Hashes integers to themselves so tests can steer keys into chosen
    /// directory slots.
    #[derive(Clone, Default)]
    struct IdentityState;

    struct IdentityHasher(u64);

    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            let mut buf = [0u8; 8];
            let n = bytes.len().min(8);
            buf[..n].copy_from_slice(&bytes[..n]);
            self.0 = u64::from_le_bytes(buf);
        }
    }

    impl BuildHasher for IdentityState {
        type Hasher = IdentityHasher;

        fn build_hasher(&self) -> IdentityHasher {
            IdentityHasher(0)
        }
    }

    fn identity_table(bucket_size: usize) -> ExtendibleHashTable<u64, u64, IdentityState> {
        ExtendibleHashTable::with_hasher(bucket_size, IdentityState)
    }

    #[test]
    fn test_insert_find_remove() {
        let table = ExtendibleHashTable::new(50);
        for i in 0..100 {
            table.insert(i, i * 2);
        }
        assert_eq!(table.len(), 100);
        for i in 0..100 {
            assert_eq!(table.find(&i), Some(i * 2));
        }
        assert_eq!(table.find(&1000), None);

        assert!(table.remove(&42));
        assert!(!table.remove(&42));
        assert_eq!(table.find(&42), None);
        assert_eq!(table.len(), 99);
    }

    #[test]
    fn test_insert_overwrites_existing_key() {
        let table = ExtendibleHashTable::new(50);
        table.insert(7, 1);
        table.insert(7, 2);
        assert_eq!(table.find(&7), Some(2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_first_split_doubles_directory() {
        // bucket size 2; keys 0 and 2 share low bit 0, key 1 has low bit 1
        let table = identity_table(2);
        table.insert(0, 0);
        table.insert(2, 20);
        assert_eq!(table.global_depth(), 0);

        table.insert(1, 10);
        assert_eq!(table.global_depth(), 1);
        assert_eq!(table.num_buckets(), 2);
        assert_eq!(table.local_depth(0), Some(1));
        assert_eq!(table.local_depth(1), Some(1));

        assert_eq!(table.find(&0), Some(0));
        assert_eq!(table.find(&2), Some(20));
        assert_eq!(table.find(&1), Some(10));
    }

    #[test]
    fn test_directory_invariant_after_many_splits() {
        let table = identity_table(2);
        for i in 0..256u64 {
            table.insert(i, i);
            assert!(table.check_directory());
        }
        for i in 0..256u64 {
            assert_eq!(table.find(&i), Some(i));
        }
        assert!(table.global_depth() >= 7);
    }

    #[test]
    fn test_skewed_keys_split_repeatedly() {
        // keys sharing many low bits force the local-depth loop
        let table = identity_table(2);
        for i in 0..8u64 {
            table.insert(i << 8, i);
        }
        for i in 0..8u64 {
            assert_eq!(table.find(&(i << 8)), Some(i));
        }
        assert!(table.check_directory());
    }

    #[test]
    fn test_concurrent_inserts() {
        use std::sync::Arc;

        let table = Arc::new(ExtendibleHashTable::new(10));
        let mut handles = Vec::new();
        for t in 0..4u64 {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || {
                for i in 0..200u64 {
                    table.insert(t * 1000 + i, i);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(table.len(), 800);
        for t in 0..4u64 {
            for i in 0..200u64 {
                assert_eq!(table.find(&(t * 1000 + i)), Some(i));
            }
        }
    }
}
