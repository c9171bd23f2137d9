use std::path::PathBuf;

/// Construction parameters for a [`crate::Gpq`].
///
/// Mirrors the Go source's `NewGPQ(numBuckets, syncToDisk, diskPath, lazy, batchSize)`
/// constructor as one explicit struct rather than a five-argument function.
#[derive(Debug, Clone)]
pub struct GpqConfig {
    /// Number of priority classes. Priorities accepted by `enqueue` are `[0, num_buckets)`.
    pub num_buckets: usize,
    /// Whether items are journaled to disk at all. `false` disables persistence entirely:
    /// a restart loses all items.
    pub sync_to_disk: bool,
    /// Directory holding the journal file. Ignored when `sync_to_disk` is `false`.
    pub disk_path: PathBuf,
    /// Batch journal writes on a background thread instead of blocking each call on
    /// `fsync`. Ignored when `sync_to_disk` is `false`.
    pub lazy: bool,
    /// Flush threshold for lazy mode: the writer thread flushes once this many journal
    /// operations have accumulated, or when `close()` is called.
    pub batch_size: usize,
}

impl GpqConfig {
    /// An in-memory-only queue: no journal, no disk I/O.
    pub fn in_memory(num_buckets: usize) -> Self {
        Self {
            num_buckets,
            sync_to_disk: false,
            disk_path: PathBuf::new(),
            lazy: false,
            batch_size: 0,
        }
    }

    /// A durable queue that fsyncs every journal write before returning.
    pub fn synchronous(num_buckets: usize, disk_path: impl Into<PathBuf>) -> Self {
        Self {
            num_buckets,
            sync_to_disk: true,
            disk_path: disk_path.into(),
            lazy: false,
            batch_size: 0,
        }
    }

    /// A durable queue with batched, write-behind journaling.
    pub fn lazy(num_buckets: usize, disk_path: impl Into<PathBuf>, batch_size: usize) -> Self {
        Self {
            num_buckets,
            sync_to_disk: true,
            disk_path: disk_path.into(),
            lazy: true,
            batch_size,
        }
    }
}
