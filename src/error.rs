use thiserror::Error;

/// Errors surfaced by the queue. Every operation that can fail returns one of
/// these instead of swallowing the underlying cause.
#[derive(Error, Debug)]
pub enum GpqError {
    #[error("priority {0} is out of range")]
    InvalidPriority(usize),

    #[error("queue is empty")]
    Empty,

    #[error("journal path unavailable: {0}")]
    PathUnavailable(String),

    #[error("journal store failure: {0}")]
    StoreFailure(String),

    #[error("queue is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, GpqError>;

impl From<std::io::Error> for GpqError {
    fn from(err: std::io::Error) -> Self {
        Self::StoreFailure(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for GpqError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::StoreFailure(format!("failed to encode journal record: {err}"))
    }
}

impl From<rmp_serde::decode::Error> for GpqError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::StoreFailure(format!("failed to decode journal record: {err}"))
    }
}

impl<T> From<std::sync::PoisonError<T>> for GpqError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::StoreFailure(format!("lock poisoned: {err}"))
    }
}
