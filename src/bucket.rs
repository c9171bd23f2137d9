use std::collections::VecDeque;
use std::sync::Mutex;

use crate::index::NonEmptyBucketIndex;
use crate::item::Item;

/// A single FIFO priority class, guarded by its own lock.
///
/// Mirrors the per-entity locking in `storage::memory::InMemoryStorage`, which wraps each
/// table in its own `Arc<RwLock<Table>>` rather than locking the whole storage engine; here
/// each bucket gets its own `Mutex` rather than the index or the queue as a whole.
///
/// Every method that can flip a bucket between empty and non-empty takes the shared
/// `NonEmptyBucketIndex` and updates its membership bit for this bucket's `priority`
/// while still holding the bucket's own lock. The bit is always derived from the deque's
/// state at the instant of mutation, never from a flag computed by an earlier call and
/// acted on after the lock was released — that gap is exactly where a concurrent
/// `append`/`pop`/`remove_key` on the same bucket could otherwise race the index update
/// and strand a live item outside the occupancy index.
pub(crate) struct Bucket<T> {
    items: Mutex<VecDeque<Item<T>>>,
}

impl<T> Bucket<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends an item at the back, setting the index bit for `priority` if the bucket
    /// was empty beforehand.
    pub(crate) fn append(&self, item: Item<T>, index: &NonEmptyBucketIndex, priority: usize) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let was_empty = items.is_empty();
        items.push_back(item);
        if was_empty {
            index.insert(priority);
        }
    }

    /// Pops the oldest item, clearing the index bit for `priority` if the pop leaves the
    /// bucket empty.
    pub(crate) fn pop_oldest(&self, index: &NonEmptyBucketIndex, priority: usize) -> Option<Item<T>> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let item = items.pop_front();
        if item.is_some() && items.is_empty() {
            index.remove(priority);
        }
        item
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Snapshots all currently pending items without removing them, for `prioritize` to
    /// classify. The lock is released before the caller acts on the snapshot.
    pub(crate) fn snapshot(&self) -> Vec<Item<T>>
    where
        T: Clone,
    {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Removes a specific item by key (used by `prioritize` to retract an item it decided
    /// to expire or escalate), clearing the index bit for `priority` if this empties the
    /// bucket. Reports whether the key was actually present.
    pub(crate) fn remove_key(&self, key: u64, index: &NonEmptyBucketIndex, priority: usize) -> bool {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let before = items.len();
        items.retain(|i| i.key != key);
        let removed = items.len() != before;
        if removed && items.is_empty() {
            index.remove(priority);
        }
        removed
    }

    /// Reinstates an item at the head of the bucket, setting the index bit for `priority`
    /// if the bucket was empty beforehand. Used to undo an optimistic `pop_oldest`/
    /// `remove_key` when the journal write that was supposed to follow it fails (see
    /// `Gpq::dequeue` and `Gpq::prioritize`); the emptiness check is re-derived fresh
    /// under the lock rather than trusting whatever the original pop/remove observed, so
    /// it stays correct even if another thread appended to this bucket in between.
    pub(crate) fn push_front(&self, item: Item<T>, index: &NonEmptyBucketIndex, priority: usize) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let was_empty = items.is_empty();
        items.push_front(item);
        if was_empty {
            index.insert(priority);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn item(key: u64) -> Item<&'static str> {
        Item {
            key,
            priority: 0,
            enqueued_at: Instant::now(),
            can_timeout: false,
            timeout_after: Duration::ZERO,
            can_escalate: false,
            escalate_after: Duration::ZERO,
            payload: "x",
        }
    }

    #[test]
    fn fifo_order_preserved() {
        let bucket = Bucket::new();
        let index = NonEmptyBucketIndex::new(1);
        bucket.append(item(1), &index, 0);
        bucket.append(item(2), &index, 0);
        bucket.append(item(3), &index, 0);
        assert!(index.contains(0));

        let first = bucket.pop_oldest(&index, 0);
        assert_eq!(first.unwrap().key, 1);
        assert!(index.contains(0));

        let second = bucket.pop_oldest(&index, 0);
        assert_eq!(second.unwrap().key, 2);

        let third = bucket.pop_oldest(&index, 0);
        assert_eq!(third.unwrap().key, 3);
        assert!(!index.contains(0));
    }

    #[test]
    fn pop_from_empty_bucket_returns_none() {
        let bucket: Bucket<&'static str> = Bucket::new();
        let index = NonEmptyBucketIndex::new(1);
        let popped = bucket.pop_oldest(&index, 0);
        assert!(popped.is_none());
        assert!(!index.contains(0));
    }

    #[test]
    fn remove_key_reports_emptiness() {
        let bucket = Bucket::new();
        let index = NonEmptyBucketIndex::new(1);
        bucket.append(item(1), &index, 0);
        bucket.append(item(2), &index, 0);
        assert!(bucket.remove_key(1, &index, 0));
        assert!(index.contains(0));
        assert!(bucket.remove_key(2, &index, 0));
        assert!(!index.contains(0));
    }

    #[test]
    fn push_front_restores_index_bit_when_bucket_was_empty() {
        let bucket: Bucket<&'static str> = Bucket::new();
        let index = NonEmptyBucketIndex::new(1);
        bucket.push_front(item(1), &index, 0);
        assert!(index.contains(0));
    }
}
