//! A concurrent, multi-bucket priority queue with optional disk persistence.
//!
//! [`Gpq`] dispatches queued payloads into `num_buckets` priority classes (lower index =
//! higher priority). `enqueue`/`dequeue` are constant-time-ish and safe to call from many
//! threads at once; a caller-driven [`Gpq::prioritize`] sweep ages items across buckets
//! and expires stale ones. Persistence, when enabled, journals every enqueue/dequeue to
//! disk so a restart can replay live items back into memory.
//!
//! ```no_run
//! use gpq::{Gpq, GpqConfig};
//! use std::time::Duration;
//!
//! let queue: Gpq<&'static str> = Gpq::open(GpqConfig::in_memory(4)).unwrap();
//! queue.enqueue("first", 1, false, Duration::ZERO, false, Duration::ZERO).unwrap();
//! let (priority, payload) = queue.dequeue().unwrap();
//! assert_eq!((priority, payload), (1, "first"));
//! ```

mod bucket;
mod config;
mod error;
mod gpq;
mod index;
mod item;
mod journal;

pub use config::GpqConfig;
pub use error::{GpqError, Result};
pub use gpq::Gpq;
