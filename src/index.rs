use std::sync::atomic::{AtomicU64, Ordering};

const WORD_BITS: usize = 64;

/// A lock-free set of occupied priority ids plus a total item counter.
///
/// `DESIGN NOTES` recommends an array indexed by priority with an atomic occupancy bitmap
/// when `B` is small, so that `min()` reduces to a find-first-set; this is that bitmap,
/// following the same `AtomicU64`-counter style `storage::persistence::WalMetrics` uses for
/// its own bytes/entries/flush counters, kept off the bucket locks to avoid contention
/// between the hot path and callers polling `objects_in_queue`.
pub(crate) struct NonEmptyBucketIndex {
    words: Vec<AtomicU64>,
    objects_in_queue: AtomicU64,
}

impl NonEmptyBucketIndex {
    pub(crate) fn new(num_buckets: usize) -> Self {
        let word_count = num_buckets.div_ceil(WORD_BITS).max(1);
        let words = (0..word_count).map(|_| AtomicU64::new(0)).collect();
        Self {
            words,
            objects_in_queue: AtomicU64::new(0),
        }
    }

    pub(crate) fn insert(&self, priority: usize) {
        let (word, bit) = Self::locate(priority);
        self.words[word].fetch_or(1 << bit, Ordering::AcqRel);
    }

    pub(crate) fn remove(&self, priority: usize) {
        let (word, bit) = Self::locate(priority);
        self.words[word].fetch_and(!(1 << bit), Ordering::AcqRel);
    }

    pub(crate) fn contains(&self, priority: usize) -> bool {
        let (word, bit) = Self::locate(priority);
        self.words[word].load(Ordering::Acquire) & (1 << bit) != 0
    }

    /// The smallest occupied priority, or `None` if every bucket is empty.
    pub(crate) fn min(&self) -> Option<usize> {
        for (word_idx, word) in self.words.iter().enumerate() {
            let bits = word.load(Ordering::Acquire);
            if bits != 0 {
                return Some(word_idx * WORD_BITS + bits.trailing_zeros() as usize);
            }
        }
        None
    }

    pub(crate) fn incr(&self) {
        self.objects_in_queue.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn decr(&self) {
        self.objects_in_queue.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn objects_in_queue(&self) -> u64 {
        self.objects_in_queue.load(Ordering::Acquire)
    }

    fn locate(priority: usize) -> (usize, usize) {
        (priority / WORD_BITS, priority % WORD_BITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_reflects_smallest_occupied() {
        let index = NonEmptyBucketIndex::new(10);
        assert_eq!(index.min(), None);
        index.insert(7);
        index.insert(2);
        index.insert(9);
        assert_eq!(index.min(), Some(2));
        index.remove(2);
        assert_eq!(index.min(), Some(7));
    }

    #[test]
    fn insert_is_idempotent() {
        let index = NonEmptyBucketIndex::new(4);
        index.insert(1);
        index.insert(1);
        assert!(index.contains(1));
        index.remove(1);
        assert!(!index.contains(1));
    }

    #[test]
    fn spans_multiple_words() {
        let index = NonEmptyBucketIndex::new(200);
        index.insert(130);
        assert_eq!(index.min(), Some(130));
        index.insert(65);
        assert_eq!(index.min(), Some(65));
    }

    #[test]
    fn counter_tracks_incr_decr() {
        let index = NonEmptyBucketIndex::new(4);
        index.incr();
        index.incr();
        index.decr();
        assert_eq!(index.objects_in_queue(), 1);
    }
}
