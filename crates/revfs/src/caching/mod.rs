//! # The read-through caching file system
//!
//! [`CachingFileSystem`] wraps a backing [`FileSystem`] and serves the same
//! `stat`/`read` contract, transparently caching results in an object store
//! to avoid repeated round-trips to the (slow, possibly remote) backing
//! store. Three logical caches are maintained, each in its own object store
//! namespace:
//!
//! - `stat`: path to version token. When a directory is stat-ed, every
//!   direct child's version is written back as its own top-level key, so one
//!   directory stat amortizes into N independently queryable entries.
//! - `read` / `read-binary`: path to `(data, version)` pairs, one namespace
//!   per read mode.
//!
//! A cached read entry is valid to serve iff its stored version equals the
//! path's current version as known via the stat cache, or via a fresh stat
//! when unknown. Staleness is detected by version mismatch only; the store's
//! own TTL/eviction is an external concern.
//!
//! A `read` request goes through the following steps:
//! - Look up all requested paths in the read namespace, and their versions
//!   in the stat namespace.
//! - Accept every cached entry whose version matches the current one; any
//!   other path is a miss.
//! - Without misses, the accepted results are returned as an
//!   already-resolved [`Deferred`].
//! - Otherwise only the miss paths are delegated to the backing file
//!   system, and an `UncachedFill` resolver merges the delegate's eventual
//!   result with the accepted results, writing the freshly fetched entries
//!   back before yielding the merged mapping.
//!
//! Store faults are fail-open: an unavailable object store degrades the
//! layer to always-consult-the-backing-store behavior. Backing store faults
//! are fail-closed and propagate to the caller, and a `NotFound` is never
//! cached as a negative result.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::deferred::Deferred;
use crate::error::{FsContents, FsError};
use crate::fs::{self, FileSystem, PathContents, ReadMode, StatInfo, Version};
use crate::store::{CacheCategory, Expiry, Namespace, StoreProvider};

#[cfg(test)]
mod tests;

/// A read-cache entry: content bytes plus the version they were fetched at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadEntry {
    pub data: Bytes,
    pub version: Version,
}

/// A [`FileSystem`] implementation which caches its results in an object
/// store.
#[derive(Clone)]
pub struct CachingFileSystem {
    file_system: Arc<dyn FileSystem>,
    stat_store: Namespace<Version>,
    read_store: Namespace<ReadEntry>,
    read_binary_store: Namespace<ReadEntry>,
    read_expiry: Expiry,
}

impl CachingFileSystem {
    pub fn new(
        file_system: Arc<dyn FileSystem>,
        stores: &dyn StoreProvider,
        config: &CacheConfig,
    ) -> Self {
        CachingFileSystem {
            file_system,
            stat_store: Namespace::new(stores.create(CacheCategory::Stat), CacheCategory::Stat),
            read_store: Namespace::new(stores.create(CacheCategory::Read), CacheCategory::Read),
            read_binary_store: Namespace::new(
                stores.create(CacheCategory::ReadBinary),
                CacheCategory::ReadBinary,
            ),
            read_expiry: config.read_expiry_hint(),
        }
    }

    fn read_store(&self, mode: ReadMode) -> &Namespace<ReadEntry> {
        match mode {
            ReadMode::Text => &self.read_store,
            ReadMode::Binary => &self.read_binary_store,
        }
    }

    /// Stats `path`, going to the backing store at most once.
    ///
    /// On a miss, the *parent* directory is stat-ed instead of the path
    /// itself: it carries the stat of the child anyway, and yields an entire
    /// directory's versions in a single round-trip. All of them are written
    /// back to the stat namespace before returning.
    async fn stat_impl(&self, path: &str) -> FsContents<StatInfo> {
        if let Some(version) = self.stat_store.get(path).await {
            tracing::trace!(path, "stat served from cache");
            return Ok(StatInfo::new(version));
        }

        let dir_path = fs::dir_path(path);
        tracing::debug!(path, dir_path = %dir_path, "stat delegated to backing file system");
        let dir_stat = self.file_system.stat(&dir_path).await?;

        let version = if path == dir_path {
            dir_stat.version.clone()
        } else {
            let name = fs::file_name(path);
            match dir_stat
                .child_versions
                .as_ref()
                .and_then(|children| children.get(name))
            {
                Some(version) => version.clone(),
                // Absent from the parent's child-version map. Nothing is
                // written back: negative results are never cached.
                None => return Err(FsError::NotFound(path.to_owned())),
            }
        };

        let mut entries = BTreeMap::new();
        entries.insert(path.to_owned(), version.clone());
        entries.insert(dir_path.clone(), dir_stat.version.clone());
        if let Some(children) = &dir_stat.child_versions {
            for (child, child_version) in children {
                entries.insert(format!("{dir_path}{child}"), child_version.clone());
            }
        }
        self.stat_store.set_multi(entries, Expiry::Persist);

        if path == dir_path {
            Ok(dir_stat)
        } else {
            Ok(StatInfo::new(version))
        }
    }

    /// Reads a batch of paths, serving every cached entry that is still
    /// current and delegating only the rest to the backing file system.
    async fn read_impl(
        &self,
        paths: &[String],
        mode: ReadMode,
    ) -> FsContents<Deferred<PathContents>> {
        let read_store = self.read_store(mode);

        let mut sorted: Vec<String> = paths.to_vec();
        sorted.sort();
        sorted.dedup();

        let cached = read_store.get_multi(&sorted).await;
        let stats = self.stat_store.get_multi(&sorted).await;

        let mut result = PathContents::new();
        let mut uncached = Vec::new();
        for path in sorted {
            let Some(entry) = cached.get(&path) else {
                uncached.push(path);
                continue;
            };
            let current = match stats.get(&path) {
                Some(version) => version.clone(),
                // No cached stat for this path: a single re-stat settles it,
                // and extends the stat cache through the directory
                // write-back. If the stat namespace is down this forces a
                // true backing stat rather than serving possibly-stale data.
                None => self.stat_impl(&path).await?.version,
            };
            if entry.version != current {
                tracing::trace!(path = %path, "cached read entry is stale");
                uncached.push(path);
                continue;
            }
            result.insert(path, entry.data.clone());
        }

        if uncached.is_empty() {
            return Ok(Deferred::resolved(result));
        }

        tracing::debug!(
            count = uncached.len(),
            "reading uncached paths from backing file system",
        );
        let delegate = self.file_system.read(&uncached, mode).await?;
        let fill = UncachedFill {
            uncached: delegate,
            current: result,
            file_system: self.clone(),
            store: read_store.clone(),
            expiry: self.read_expiry,
        };
        Ok(Deferred::new(fill.resolve()))
    }
}

impl FileSystem for CachingFileSystem {
    fn stat<'a>(&'a self, path: &'a str) -> BoxFuture<'a, FsContents<StatInfo>> {
        Box::pin(self.stat_impl(path))
    }

    fn read<'a>(
        &'a self,
        paths: &'a [String],
        mode: ReadMode,
    ) -> BoxFuture<'a, FsContents<Deferred<PathContents>>> {
        Box::pin(self.read_impl(paths, mode))
    }
}

/// Reconciles a pending fetch of the cache-miss paths with the already
/// accepted cache-hit results.
///
/// Resolving blocks on the backing delegate, re-stats every freshly fetched
/// path through the caching stat (reusing and extending the stat cache),
/// writes the new `(data, version)` entries back to the read namespace, and
/// yields the merged mapping. Write-back is idempotent for an unchanged
/// version, so a redundant second resolution would be wasteful but safe.
struct UncachedFill {
    uncached: Deferred<PathContents>,
    current: PathContents,
    file_system: CachingFileSystem,
    store: Namespace<ReadEntry>,
    expiry: Expiry,
}

impl UncachedFill {
    async fn resolve(mut self) -> FsContents<PathContents> {
        let fresh = self.uncached.get().await?;

        let mut write_back = BTreeMap::new();
        for (path, data) in fresh {
            let version = self.file_system.stat_impl(&path).await?.version;
            write_back.insert(
                path.clone(),
                ReadEntry {
                    data: data.clone(),
                    version,
                },
            );
            self.current.insert(path, data);
        }
        self.store.set_multi(write_back, self.expiry);

        Ok(self.current)
    }
}
