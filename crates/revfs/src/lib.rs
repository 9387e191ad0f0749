//! revfs is a read-through, version-validated caching layer for hierarchical
//! file systems.
//!
//! A [`CachingFileSystem`] wraps a (slow, possibly remote) backing
//! [`FileSystem`] and serves the same `stat`/`read` contract, transparently
//! consulting a key-value [`ObjectStore`] before delegating to the backing
//! store. Cached data is validated against per-path version tokens and is
//! never returned once it is known to be stale.

pub mod caching;
pub mod config;
pub mod deferred;
pub mod error;
pub mod fs;
pub mod store;

pub use caching::CachingFileSystem;
pub use config::CacheConfig;
pub use deferred::Deferred;
pub use error::{FsContents, FsError, StoreContents, StoreError};
pub use fs::{FileSystem, PathContents, ReadMode, StatInfo, Version};
pub use store::{CacheCategory, Expiry, ObjectStore, StoreProvider};
