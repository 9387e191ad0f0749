//! Helpers for testing the caching file system.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all
//!    console output is captured by the test runner.
//!
//!  - The fixtures here are deterministic and fully in-memory: a
//!    [`ScriptedFs`] stands in for the slow backing file system and counts
//!    every delegation it receives, and a [`MemoryStore`] records every
//!    write-back together with its expiry hint. Assertions about "no second
//!    backing-store call" are made against those counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::future::BoxFuture;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use revfs::{
    CacheCategory, Deferred, Expiry, FileSystem, FsContents, FsError, ObjectStore, PathContents,
    ReadMode, StatInfo, StoreContents, StoreError, StoreProvider, Version,
};

/// Setup the test environment.
///
///  - Initializes logs: the logger only captures logs from the `revfs` crate
///    and mutes all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("revfs=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A recording in-memory object store.
///
/// Every entry remembers the expiry hint it was written with, writes and
/// reads are counted, and the store can be toggled unavailable to exercise
/// the degraded no-cache path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, (Bytes, Expiry)>>,
    unavailable: AtomicBool,
    gets: AtomicUsize,
    sets: AtomicUsize,
}

impl MemoryStore {
    /// Makes every subsequent store call fail with [`StoreError::Unavailable`].
    ///
    /// `set_multi` calls are silently dropped while unavailable, matching a
    /// fire-and-forget write against a dead store.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Drops all entries, simulating store-side eviction.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    /// The raw encoded entry stored under `key`, if any.
    pub fn raw(&self, key: &str) -> Option<Bytes> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).map(|(raw, _)| raw.clone())
    }

    /// The expiry hint the entry under `key` was last written with.
    pub fn expiry_of(&self, key: &str) -> Option<Expiry> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).map(|(_, expiry)| *expiry)
    }

    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    pub fn set_calls(&self) -> usize {
        self.sets.load(Ordering::Relaxed)
    }

    fn check_available(&self) -> StoreContents<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(StoreError::Unavailable("memory store offline".into()))
        } else {
            Ok(())
        }
    }
}

impl ObjectStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreContents<Option<Bytes>>> {
        Box::pin(async move {
            self.check_available()?;
            self.gets.fetch_add(1, Ordering::Relaxed);
            let entries = self.entries.lock().unwrap();
            Ok(entries.get(key).map(|(raw, _)| raw.clone()))
        })
    }

    fn get_multi<'a>(
        &'a self,
        keys: &'a [String],
    ) -> BoxFuture<'a, StoreContents<BTreeMap<String, Bytes>>> {
        Box::pin(async move {
            self.check_available()?;
            self.gets.fetch_add(1, Ordering::Relaxed);
            let entries = self.entries.lock().unwrap();
            Ok(keys
                .iter()
                .filter_map(|key| {
                    let (raw, _) = entries.get(key)?;
                    Some((key.clone(), raw.clone()))
                })
                .collect())
        })
    }

    fn set_multi(&self, new_entries: BTreeMap<String, Bytes>, expiry: Expiry) {
        if self.check_available().is_err() {
            return;
        }
        self.sets.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().unwrap();
        for (key, raw) in new_entries {
            entries.insert(key, (raw, expiry));
        }
    }
}

/// Hands out one [`MemoryStore`] per cache category and keeps a handle to
/// each, so tests can inspect and perturb the stores individually.
#[derive(Debug, Default)]
pub struct MemoryStoreProvider {
    stores: Mutex<BTreeMap<CacheCategory, Arc<MemoryStore>>>,
}

impl MemoryStoreProvider {
    /// The store backing `category`, created on first use.
    pub fn store(&self, category: CacheCategory) -> Arc<MemoryStore> {
        let mut stores = self.stores.lock().unwrap();
        Arc::clone(stores.entry(category).or_default())
    }
}

impl StoreProvider for MemoryStoreProvider {
    fn create(&self, category: CacheCategory) -> Arc<dyn ObjectStore> {
        self.store(category)
    }
}

/// A scripted backing file system.
///
/// Directories are registered with their own version and a complete
/// child-version map; file contents are registered separately. Both can be
/// mutated mid-test to simulate content changing under the cache. Every
/// `stat` and `read` delegation is counted.
#[derive(Debug, Default)]
pub struct ScriptedFs {
    dirs: Mutex<BTreeMap<String, StatInfo>>,
    files: Mutex<BTreeMap<String, Bytes>>,
    stat_calls: AtomicUsize,
    read_calls: AtomicUsize,
}

impl ScriptedFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a directory with its version and direct children versions.
    pub fn add_dir(&self, path: &str, version: &str, children: &[(&str, &str)]) {
        assert!(path.ends_with('/'), "directory paths end with a separator");
        let child_versions = children
            .iter()
            .map(|(name, version)| ((*name).to_owned(), Version::new(*version)))
            .collect();
        self.dirs.lock().unwrap().insert(
            path.to_owned(),
            StatInfo::directory(Version::new(version), child_versions),
        );
    }

    /// Registers file contents for a full path.
    pub fn add_file(&self, path: &str, contents: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_owned(), Bytes::copy_from_slice(contents));
    }

    /// Removes a file and its entry in the parent's child-version map.
    pub fn remove_file(&self, dir: &str, name: &str) {
        let mut dirs = self.dirs.lock().unwrap();
        if let Some(children) = dirs.get_mut(dir).and_then(|d| d.child_versions.as_mut()) {
            children.remove(name);
        }
        drop(dirs);
        self.files.lock().unwrap().remove(&format!("{dir}{name}"));
    }

    /// Bumps a child's version and replaces its contents, simulating a new
    /// content generation in the backing store.
    pub fn update_file(&self, dir: &str, name: &str, version: &str, contents: &[u8]) {
        let mut dirs = self.dirs.lock().unwrap();
        let children = dirs
            .get_mut(dir)
            .and_then(|d| d.child_versions.as_mut())
            .expect("directory is registered");
        children.insert(name.to_owned(), Version::new(version));
        drop(dirs);
        self.add_file(&format!("{dir}{name}"), contents);
    }

    /// Replaces file contents without touching the version, for asserting
    /// that valid cache entries are served without a backing read.
    pub fn corrupt_file(&self, path: &str, contents: &[u8]) {
        self.add_file(path, contents);
    }

    pub fn stat_calls(&self) -> usize {
        self.stat_calls.load(Ordering::Relaxed)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::Relaxed)
    }
}

impl FileSystem for ScriptedFs {
    fn stat<'a>(&'a self, path: &'a str) -> BoxFuture<'a, FsContents<StatInfo>> {
        Box::pin(async move {
            self.stat_calls.fetch_add(1, Ordering::Relaxed);
            if path.ends_with('/') {
                let dirs = self.dirs.lock().unwrap();
                return dirs
                    .get(path)
                    .cloned()
                    .ok_or_else(|| FsError::NotFound(path.to_owned()));
            }
            let dirs = self.dirs.lock().unwrap();
            let dir = dirs.get(&parent_dir(path));
            dir.and_then(|dir| dir.child_versions.as_ref())
                .and_then(|children| children.get(leaf_name(path)))
                .map(|version| StatInfo::new(version.clone()))
                .ok_or_else(|| FsError::NotFound(path.to_owned()))
        })
    }

    fn read<'a>(
        &'a self,
        paths: &'a [String],
        _mode: ReadMode,
    ) -> BoxFuture<'a, FsContents<Deferred<PathContents>>> {
        Box::pin(async move {
            self.read_calls.fetch_add(1, Ordering::Relaxed);
            let files = self.files.lock().unwrap();
            let mut contents = PathContents::new();
            let mut missing = None;
            for path in paths {
                match files.get(path) {
                    Some(data) => {
                        contents.insert(path.clone(), data.clone());
                    }
                    None => {
                        missing = Some(path.clone());
                        break;
                    }
                }
            }
            drop(files);

            let resolved = match missing {
                Some(path) => Err(FsError::NotFound(path)),
                None => Ok(contents),
            };
            // Hand the outcome back through a pending deferred, like a real
            // backing store that fetches on first resolution.
            Ok(Deferred::new(async move { resolved }))
        })
    }
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..=idx].to_owned(),
        None => "/".to_owned(),
    }
}

fn leaf_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}
