//! Extendible hash table.
//!
//! An in-memory map that grows by doubling its directory instead of
//! rehashing every entry. The directory indexes buckets by the low
//! `global_depth` bits of the key hash; each bucket only distinguishes
//! its own `local_depth` bits, so several directory slots may alias one
//! bucket. An overflowing bucket splits on the next undistinguished bit,
//! doubling the directory only when the bucket was already using every
//! global bit.
//!
//! The buffer pool instantiates this as its page table
//! (`ExtendibleHashTable<PageId, FrameId>`), but the table is generic.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

/// Stable 64-bit hash of a key.
///
/// `DefaultHasher::new()` is fixed-key SipHash: two table instances (or
/// a test) hashing the same key always agree.
fn hash_of<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// A bucket: a bounded run of entries sharing their low `depth` hash
/// bits.
struct Bucket<K, V> {
    depth: u32,
    items: Vec<(K, V)>,
}

impl<K: Eq, V> Bucket<K, V> {
    fn new(depth: u32) -> Self {
        Self {
            depth,
            items: Vec::new(),
        }
    }

    fn find(&self, key: &K) -> Option<&V> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn position(&self, key: &K) -> Option<usize> {
        self.items.iter().position(|(k, _)| k == key)
    }
}

struct Inner<K, V> {
    global_depth: u32,
    /// Directory: `dir[slot]` is an index into `buckets`. Length is
    /// always `2^global_depth`.
    dir: Vec<usize>,
    /// Bucket arena. A split reuses the old bucket's slot for the
    /// 0-side and appends the 1-side, so every arena slot stays
    /// reachable from `dir`.
    buckets: Vec<Bucket<K, V>>,
    len: usize,
}

impl<K, V> Inner<K, V> {
    fn slot_of(&self, hash: u64) -> usize {
        (hash as usize) & ((1usize << self.global_depth) - 1)
    }
}

/// A thread-safe extendible hash table.
///
/// Every public method acquires the table's latch for its full body, so
/// the table can be shared across threads on its own; the buffer pool
/// additionally serializes its calls behind the pool latch.
///
/// Buckets are never merged when entries are removed: the directory
/// only grows.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a table with one empty bucket and a directory of depth 0.
    ///
    /// # Panics
    /// Panics if `bucket_size` is 0.
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket_size must be > 0");

        Self {
            bucket_size,
            inner: Mutex::new(Inner {
                global_depth: 0,
                dir: vec![0],
                buckets: vec![Bucket::new(0)],
                len: 0,
            }),
        }
    }

    /// Look up the value for `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let bucket = inner.dir[inner.slot_of(hash_of(key))];
        inner.buckets[bucket].find(key).cloned()
    }

    /// Remove `key`, reporting whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let bucket = inner.dir[inner.slot_of(hash_of(key))];
        match inner.buckets[bucket].position(key) {
            Some(pos) => {
                inner.buckets[bucket].items.remove(pos);
                inner.len -= 1;
                true
            }
            None => false,
        }
    }

    /// Insert `key -> value`, overwriting in place if the key exists.
    ///
    /// A full bucket splits (doubling the directory when its local
    /// depth has caught up with the global depth) until the target has
    /// room. The loop terminates because every split consults one more
    /// hash bit, and distinct keys differ somewhere.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let hash = hash_of(&key);

        loop {
            let bucket = inner.dir[inner.slot_of(hash)];

            if let Some(pos) = inner.buckets[bucket].position(&key) {
                inner.buckets[bucket].items[pos].1 = value;
                return;
            }
            if inner.buckets[bucket].items.len() < self.bucket_size {
                inner.buckets[bucket].items.push((key, value));
                inner.len += 1;
                return;
            }

            Self::split(&mut inner, bucket, hash);
        }
    }

    /// Split the full bucket `old` along hash bit `old.depth`.
    ///
    /// `hash` is the hash of the key being inserted; its low bits name
    /// the directory slots that alias `old`.
    fn split(inner: &mut Inner<K, V>, old: usize, hash: u64) {
        let depth = inner.buckets[old].depth;

        if depth == inner.global_depth {
            // Double the directory; each new slot aliases the bucket of
            // the slot it mirrors.
            let half = inner.dir.len();
            inner.dir.extend_from_within(0..half);
            inner.global_depth += 1;
        }

        let bit = 1usize << depth;
        let items = std::mem::take(&mut inner.buckets[old].items);
        inner.buckets[old].depth = depth + 1; // old slot becomes the 0-side
        let one = inner.buckets.len();
        inner.buckets.push(Bucket::new(depth + 1)); // the 1-side

        for (k, v) in items {
            let target = if (hash_of(&k) as usize) & bit != 0 {
                one
            } else {
                old
            };
            inner.buckets[target].items.push((k, v));
        }

        // Re-point every slot that aliased the split bucket: those are
        // exactly the slots whose low `depth` bits match the inserted
        // key's.
        let mut slot = (hash as usize) & (bit - 1);
        while slot < inner.dir.len() {
            inner.dir[slot] = if slot & bit != 0 { one } else { old };
            slot += bit;
        }
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current global depth of the directory.
    pub fn global_depth(&self) -> u32 {
        self.inner.lock().global_depth
    }

    /// Local depth of the bucket behind directory slot `dir_index`.
    ///
    /// # Panics
    /// Panics if `dir_index` is outside the directory.
    pub fn local_depth(&self, dir_index: usize) -> u32 {
        let inner = self.inner.lock();
        inner.buckets[inner.dir[dir_index]].depth
    }

    /// Number of distinct buckets reachable from the directory.
    pub fn num_buckets(&self) -> usize {
        // Splits reuse the old arena slot, so every bucket stays
        // reachable and the arena length is the live count.
        self.inner.lock().buckets.len()
    }
}

#[cfg(test)]
impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Assert the directory/bucket structural invariants.
    fn check_invariants(&self) {
        let inner = self.inner.lock();

        assert_eq!(inner.dir.len(), 1usize << inner.global_depth);

        let mut slots_per_bucket = vec![0usize; inner.buckets.len()];
        for (slot, &b) in inner.dir.iter().enumerate() {
            let bucket = &inner.buckets[b];
            assert!(bucket.depth <= inner.global_depth);
            assert!(bucket.items.len() <= self.bucket_size);
            slots_per_bucket[b] += 1;

            // Every key in the bucket matches the slot's low local-depth
            // bits.
            let mask = (1usize << bucket.depth) - 1;
            for (k, _) in &bucket.items {
                assert_eq!((hash_of(k) as usize) & mask, slot & mask);
            }
        }

        // A bucket of depth d is aliased by exactly 2^(g - d) slots, and
        // no arena slot is orphaned.
        for (b, bucket) in inner.buckets.iter().enumerate() {
            assert_eq!(
                slots_per_bucket[b],
                1usize << (inner.global_depth - bucket.depth),
                "bucket {} has the wrong alias count",
                b
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    /// Keys whose hashes agree with `anchor`'s on the low `bits` bits.
    fn colliding_keys(anchor: u64, bits: u32, count: usize) -> Vec<u64> {
        let mask = (1u64 << bits) - 1;
        let target = hash_of(&anchor) & mask;
        (0u64..)
            .filter(|k| hash_of(k) & mask == target)
            .take(count)
            .collect()
    }

    #[test]
    fn test_insert_find_remove() {
        let table = ExtendibleHashTable::new(4);

        table.insert(1u32, "a");
        table.insert(2u32, "b");

        assert_eq!(table.find(&1), Some("a"));
        assert_eq!(table.find(&2), Some("b"));
        assert_eq!(table.find(&3), None);
        assert_eq!(table.len(), 2);

        assert!(table.remove(&1));
        assert!(!table.remove(&1));
        assert_eq!(table.find(&1), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_insert_overwrites_in_place() {
        let table = ExtendibleHashTable::new(4);

        table.insert(7u32, 100usize);
        table.insert(7u32, 200usize);

        assert_eq!(table.find(&7), Some(200));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_split_separates_on_next_bit() {
        // Two keys that collide on hash bit 0 but differ on bit 1, in a
        // table of single-entry buckets: the second insert must split at
        // depth 0 (doubling to depth 1), find both keys still together,
        // and split again at depth 1 where bit 1 finally separates them.
        let keys = colliding_keys(0, 1, 32);
        let bit1 = |k: u64| hash_of(&k) & 0b10;
        let a = keys[0];
        let b = *keys[1..].iter().find(|&&k| bit1(k) != bit1(a)).unwrap();

        let table = ExtendibleHashTable::new(1);
        table.insert(a, 0u32);
        table.insert(b, 1u32);

        assert_eq!(table.global_depth(), 2);
        assert_eq!(table.num_buckets(), 3);
        assert_eq!(table.find(&a), Some(0));
        assert_eq!(table.find(&b), Some(1));
        table.check_invariants();
    }

    #[test]
    fn test_repeated_doubling_on_deep_collision() {
        // Three keys agreeing on the low two hash bits, not all agreeing
        // on bit 2, into buckets of two: the third insert splits at
        // depths 0, 1, and 2 before bit 2 makes room. The directory
        // doubles three times.
        let candidates = colliding_keys(0, 2, 64);
        let bit2 = |k: u64| hash_of(&k) & 0b100;
        let a = candidates[0];
        let b = candidates[1];
        let c = *candidates[2..]
            .iter()
            .find(|&&k| bit2(k) != bit2(a) || bit2(k) != bit2(b))
            .unwrap();

        let table = ExtendibleHashTable::new(2);
        table.insert(a, ());
        table.insert(b, ());
        assert_eq!(table.global_depth(), 0);

        table.insert(c, ());

        assert_eq!(table.global_depth(), 3);
        assert_eq!(table.num_buckets(), 4);
        for k in [a, b, c] {
            assert_eq!(table.find(&k), Some(()));
        }
        table.check_invariants();
    }

    #[test]
    fn test_bulk_insert_invariants() {
        let table = ExtendibleHashTable::new(4);

        for i in 0u32..500 {
            table.insert(i, i * 2);
        }
        table.check_invariants();
        assert_eq!(table.len(), 500);

        for i in 0u32..500 {
            assert_eq!(table.find(&i), Some(i * 2), "key {} lost", i);
        }

        // Overwrites after growth still land on the right bucket.
        for i in 0u32..500 {
            table.insert(i, i);
        }
        assert_eq!(table.len(), 500);
        for i in (0u32..500).step_by(3) {
            assert_eq!(table.find(&i), Some(i));
        }
        table.check_invariants();
    }

    #[test]
    fn test_remove_does_not_shrink_directory() {
        let table = ExtendibleHashTable::new(2);

        for i in 0u32..64 {
            table.insert(i, ());
        }
        let depth = table.global_depth();
        let buckets = table.num_buckets();

        for i in 0u32..64 {
            assert!(table.remove(&i));
        }

        assert!(table.is_empty());
        assert_eq!(table.global_depth(), depth);
        assert_eq!(table.num_buckets(), buckets);
        table.check_invariants();
    }

    #[test]
    fn test_concurrent_inserts_and_finds() {
        let table = Arc::new(ExtendibleHashTable::new(4));
        let mut handles = vec![];

        for t in 0u32..4 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                for i in 0..250 {
                    let key = t * 1000 + i;
                    table.insert(key, key);
                    assert_eq!(table.find(&key), Some(key));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.len(), 1000);
        table.check_invariants();
    }
}
