use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::bucket::Bucket;
use crate::config::GpqConfig;
use crate::error::{GpqError, Result};
use crate::index::NonEmptyBucketIndex;
use crate::item::Item;
use crate::journal::DiskJournal;

/// Bound on bucket pop/re-pick retries inside `dequeue` when the occupancy index is
/// momentarily stale relative to a concurrent consumer (see the module docs on the
/// "miss" property). A handful of retries resolves the usual race without turning a
/// permanently-empty queue into a spin loop.
const DEQUEUE_RETRY_BUDGET: usize = 8;

/// The façade binding buckets, the occupancy index, the journal, and the monotonic key
/// counter together. `enqueue`/`dequeue`/`prioritize` all take `&self` so a `Gpq<T>` is
/// meant to be shared behind an `Arc` across producer, consumer, and sweep threads.
pub struct Gpq<T> {
    num_buckets: usize,
    buckets: Vec<Bucket<T>>,
    index: NonEmptyBucketIndex,
    journal: Mutex<DiskJournal<T>>,
    next_key: AtomicU64,
    closed: AtomicBool,
}

impl<T> Gpq<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    /// Opens a queue per `config`, replaying an existing journal if one is present.
    ///
    /// # Panics
    /// Panics if `config.num_buckets == 0`: a priority queue with zero priority classes
    /// is a construction error, not a runtime condition callers recover from.
    pub fn open(config: GpqConfig) -> Result<Self> {
        assert!(config.num_buckets > 0, "num_buckets must be at least 1");

        let (journal, records) = DiskJournal::open(&config)?;
        let buckets: Vec<Bucket<T>> = (0..config.num_buckets).map(|_| Bucket::new()).collect();
        let index = NonEmptyBucketIndex::new(config.num_buckets);

        let mut next_key = 0u64;
        let mut restored = 0u64;
        for (key, persisted) in records {
            next_key = key + 1;
            let priority = persisted.priority.min(config.num_buckets - 1);
            if persisted.priority != priority {
                tracing::warn!(
                    persisted_priority = persisted.priority,
                    clamped_to = priority,
                    "restored item priority exceeds current num_buckets; clamping"
                );
            }
            let item = persisted.into_item(key);
            buckets[priority].append(item, &index, priority);
            index.incr();
            restored += 1;
        }

        tracing::info!(num_buckets = config.num_buckets, restored, "gpq opened");

        Ok(Self {
            num_buckets: config.num_buckets,
            buckets,
            index,
            journal: Mutex::new(journal),
            next_key: AtomicU64::new(next_key),
            closed: AtomicBool::new(false),
        })
    }

    /// Enqueues `payload` into bucket `priority`.
    ///
    /// Journals before mutating in-memory state, so a failed journal write leaves the
    /// queue untouched — there is nothing to roll back.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue(
        &self,
        payload: T,
        priority: usize,
        can_timeout: bool,
        timeout_after: Duration,
        can_escalate: bool,
        escalate_after: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        if priority >= self.num_buckets {
            return Err(GpqError::InvalidPriority(priority));
        }

        let key = self.next_key.fetch_add(1, Ordering::AcqRel);
        let item = Item {
            key,
            priority,
            enqueued_at: Instant::now(),
            can_timeout,
            timeout_after,
            can_escalate,
            escalate_after,
            payload,
        };

        self.journal.lock()?.put(key, &item)?;

        self.buckets[priority].append(item, &self.index, priority);
        self.index.incr();
        Ok(())
    }

    /// Pops the oldest item from the smallest non-empty priority bucket.
    pub fn dequeue(&self) -> Result<(usize, T)> {
        self.ensure_open()?;

        for _ in 0..DEQUEUE_RETRY_BUDGET {
            let Some(priority) = self.index.min() else {
                return Err(GpqError::Empty);
            };

            let Some(item) = self.buckets[priority].pop_oldest(&self.index, priority) else {
                // Index said non-empty but a concurrent dequeuer won the race; the index
                // bit has not necessarily been cleared yet. Retry rather than failing the
                // whole call, since other buckets may still hold items.
                continue;
            };

            match self.journal.lock()?.delete(item.key) {
                Ok(()) => {
                    self.index.decr();
                    return Ok((priority, item.into_payload()));
                }
                Err(e) => {
                    // Sync-mode rollback: the item never left the logical queue from the
                    // journal's point of view, so put it back. Lazy mode can't roll back
                    // the already-acked delete; this still restores the in-memory copy so
                    // the dequeue at least returns an error instead of silently eating the
                    // item.
                    self.buckets[priority].push_front(item, &self.index, priority);
                    return Err(e);
                }
            }
        }

        Err(GpqError::Empty)
    }

    /// Sweeps every bucket from highest to lowest priority, expiring timed-out items and
    /// escalating aging ones. Returns `(timed_out, escalated)` plus the first store
    /// failure encountered, if any — a per-item journal failure leaves that item in its
    /// source bucket and the sweep continues with the remaining items.
    pub fn prioritize(&self) -> (u64, u64, Result<()>) {
        if self.closed.load(Ordering::Acquire) {
            return (0, 0, Err(GpqError::Closed));
        }

        let mut timed_out = 0u64;
        let mut escalated = 0u64;
        let mut first_err: Option<GpqError> = None;

        // Snapshot every bucket before acting on any of them. `sweep_escalate` moves an
        // item into bucket[priority - 1]; if that destination bucket were snapshotted
        // *after* the move (e.g. by re-snapshotting per priority while iterating), the
        // same item would be reclassified and escalated again within this single sweep.
        // Taking every snapshot up front guarantees each item is judged against the
        // bucket it occupied when `prioritize` was called, so it moves at most one
        // priority per call regardless of iteration order.
        let snapshots: Vec<Vec<Item<T>>> =
            (0..self.num_buckets).map(|p| self.buckets[p].snapshot()).collect();

        for (priority, snapshot) in snapshots.into_iter().enumerate() {
            for item in snapshot {
                if item.is_expired() {
                    self.sweep_expire(priority, item, &mut timed_out, &mut first_err);
                } else if item.is_escalatable() {
                    self.sweep_escalate(priority, item, &mut escalated, &mut first_err);
                }
            }
        }

        let result = match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        };
        (timed_out, escalated, result)
    }

    fn sweep_expire(
        &self,
        priority: usize,
        item: Item<T>,
        timed_out: &mut u64,
        first_err: &mut Option<GpqError>,
    ) {
        let removed = self.buckets[priority].remove_key(item.key, &self.index, priority);
        if !removed {
            return; // a concurrent dequeue already took it
        }
        match self.journal.lock_or_poisoned().delete(item.key) {
            Ok(()) => {
                self.index.decr();
                *timed_out += 1;
            }
            Err(e) => {
                self.buckets[priority].push_front(item, &self.index, priority);
                first_err.get_or_insert(e);
            }
        }
    }

    fn sweep_escalate(
        &self,
        priority: usize,
        item: Item<T>,
        escalated: &mut u64,
        first_err: &mut Option<GpqError>,
    ) {
        let removed = self.buckets[priority].remove_key(item.key, &self.index, priority);
        if !removed {
            return;
        }

        let new_key = self.next_key.fetch_add(1, Ordering::AcqRel);
        let mut moved = item.clone();
        moved.key = new_key;
        moved.priority = priority - 1;

        let journal_result = {
            let journal = self.journal.lock_or_poisoned();
            journal.delete(item.key).and_then(|()| journal.put(new_key, &moved))
        };

        match journal_result {
            Ok(()) => {
                let dest = priority - 1;
                self.buckets[dest].append(moved, &self.index, dest);
                *escalated += 1;
            }
            Err(e) => {
                self.buckets[priority].push_front(item, &self.index, priority);
                first_err.get_or_insert(e);
            }
        }
    }

    /// Flushes the journal and marks the queue closed. Further operations fail with
    /// [`GpqError::Closed`].
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(GpqError::Closed);
        }
        self.journal.lock()?.close()
    }

    /// Total number of items currently resident across all buckets. A lower-bound-eventual
    /// reading under concurrency — safe for "drain until zero and producers done" loops,
    /// but callers needing a hard stop should pair it with their own completion signal
    /// rather than relying on this counter racing concurrent `enqueue`s alone.
    pub fn objects_in_queue(&self) -> u64 {
        self.index.objects_in_queue()
    }

    pub fn is_empty(&self) -> bool {
        self.objects_in_queue() == 0
    }

    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    /// Read-only snapshot of which priorities currently hold at least one item.
    pub fn bucket_occupancy(&self) -> Vec<bool> {
        (0..self.num_buckets).map(|p| self.index.contains(p)).collect()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(GpqError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Small helper so sweep code doesn't have to thread `?` through a `Result` where a
/// poisoned lock should still let the sweep continue best-effort rather than aborting.
trait LockOrPoisoned<T> {
    fn lock_or_poisoned(&self) -> std::sync::MutexGuard<'_, T>;
}

impl<T> LockOrPoisoned<T> for Mutex<T> {
    fn lock_or_poisoned(&self) -> std::sync::MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|e| e.into_inner())
    }
}
