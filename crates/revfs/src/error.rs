use std::io;

use thiserror::Error;

/// An error surfaced by a file system, caching or backing.
///
/// This error enum is intended to be memoized inside a
/// [`Deferred`](crate::Deferred), so it is cheap to clone and comparable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    /// The path does not exist in the backing file system, or is absent from
    /// its parent directory's child-version map.
    #[error("not found: {0}")]
    NotFound(String),
    /// An I/O error while talking to the backing file system.
    #[error("io error: {0}")]
    Io(String),
    /// Any other failure of the backing file system.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

/// The result of a file system operation.
pub type FsContents<T> = Result<T, FsError>;

/// An error talking to the object store.
///
/// Store faults never fail a `stat` or `read`: the caching layer absorbs
/// them and degrades to always-consult-the-backing-store behavior.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

/// The result of an object store operation.
pub type StoreContents<T> = Result<T, StoreError>;
