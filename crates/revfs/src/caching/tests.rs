use std::sync::Arc;

use anyhow::Result;
use revfs_test::{MemoryStoreProvider, ScriptedFs};

use revfs::caching::{CachingFileSystem, ReadEntry};
use revfs::config::CacheConfig;
use revfs::error::FsError;
use revfs::fs::{FileSystem, ReadMode, Version};
use revfs::store::{CacheCategory, Expiry};

fn fixture() -> (Arc<ScriptedFs>, Arc<MemoryStoreProvider>, CachingFileSystem) {
    revfs_test::setup();

    let backing = Arc::new(ScriptedFs::new());
    backing.add_dir("/a/", "d1", &[("x", "v1"), ("y", "v2")]);
    backing.add_file("/a/x", b"x contents");
    backing.add_file("/a/y", b"y contents");

    let stores = Arc::new(MemoryStoreProvider::default());
    let caching = CachingFileSystem::new(
        backing.clone(),
        stores.as_ref(),
        &CacheConfig::default(),
    );
    (backing, stores, caching)
}

/// Decodes the read-cache entry stored for `path`.
fn read_entry(
    stores: &MemoryStoreProvider,
    category: CacheCategory,
    path: &str,
) -> Option<ReadEntry> {
    let raw = stores.store(category).raw(path)?;
    Some(serde_json::from_slice(&raw).unwrap())
}

#[tokio::test]
async fn test_stat_amortizes_directory() -> Result<()> {
    let (backing, stores, caching) = fixture();

    // A cold stat of a file goes through one backing stat of the parent
    // directory and writes back every child's version.
    let stat = caching.stat("/a/x").await?;
    assert_eq!(stat.version, Version::new("v1"));
    assert_eq!(backing.stat_calls(), 1);

    // The sibling and the directory itself are now served from the cache.
    let stat = caching.stat("/a/y").await?;
    assert_eq!(stat.version, Version::new("v2"));
    let stat = caching.stat("/a/").await?;
    assert_eq!(stat.version, Version::new("d1"));
    assert_eq!(backing.stat_calls(), 1);

    let mut keys = stores.store(CacheCategory::Stat).keys();
    keys.sort();
    assert_eq!(keys, vec!["/a/", "/a/x", "/a/y"]);

    Ok(())
}

#[tokio::test]
async fn test_stat_directory_returns_children() -> Result<()> {
    let (_backing, _stores, caching) = fixture();

    let stat = caching.stat("/a/").await?;
    let children = stat.child_versions.expect("cold directory stat has children");
    assert_eq!(children.len(), 2);
    assert_eq!(children["x"], Version::new("v1"));
    assert_eq!(children["y"], Version::new("v2"));

    // A cache hit is version-only.
    let stat = caching.stat("/a/").await?;
    assert_eq!(stat.child_versions, None);

    Ok(())
}

#[tokio::test]
async fn test_stat_not_found_is_not_cached() -> Result<()> {
    let (backing, stores, caching) = fixture();

    let err = caching.stat("/a/z").await.unwrap_err();
    assert_eq!(err, FsError::NotFound("/a/z".to_owned()));

    // The failed lookup must not leave anything behind, not even the
    // sibling versions obtained from the directory stat.
    assert!(stores.store(CacheCategory::Stat).is_empty());
    assert_eq!(backing.stat_calls(), 1);

    Ok(())
}

#[tokio::test]
async fn test_stat_missing_directory() -> Result<()> {
    let (_backing, stores, caching) = fixture();

    let err = caching.stat("/nope/").await.unwrap_err();
    assert_eq!(err, FsError::NotFound("/nope/".to_owned()));
    assert!(stores.store(CacheCategory::Stat).is_empty());

    Ok(())
}

#[tokio::test]
async fn test_read_serves_cached_without_backing() -> Result<()> {
    let (backing, _stores, caching) = fixture();

    let paths = vec!["/a/x".to_owned()];
    let contents = caching.read(&paths, ReadMode::Text).await?.get().await?;
    assert_eq!(contents["/a/x"], &b"x contents"[..]);
    assert_eq!(backing.read_calls(), 1);

    // Change the backing contents while keeping the version: the cached
    // bytes must be served without another backing read.
    backing.corrupt_file("/a/x", b"changed behind the cache");
    let contents = caching.read(&paths, ReadMode::Text).await?.get().await?;
    assert_eq!(contents["/a/x"], &b"x contents"[..]);
    assert_eq!(backing.read_calls(), 1);

    Ok(())
}

#[tokio::test]
async fn test_read_refetches_stale_entries() -> Result<()> {
    let (backing, stores, caching) = fixture();

    let paths = vec!["/a/x".to_owned()];
    caching.read(&paths, ReadMode::Text).await?.get().await?;

    // A new content generation lands in the backing store, and the stat
    // cache is evicted: the next read must detect the version mismatch.
    backing.update_file("/a/", "x", "v9", b"x contents v9");
    stores.store(CacheCategory::Stat).clear();

    let contents = caching.read(&paths, ReadMode::Text).await?.get().await?;
    assert_eq!(contents["/a/x"], &b"x contents v9"[..]);
    assert_eq!(backing.read_calls(), 2);

    // The read cache now holds the new generation.
    let entry = read_entry(&stores, CacheCategory::Read, "/a/x").unwrap();
    assert_eq!(entry.version, Version::new("v9"));
    assert_eq!(entry.data, &b"x contents v9"[..]);

    Ok(())
}

#[tokio::test]
async fn test_partial_hit_merge() -> Result<()> {
    let (backing, stores, caching) = fixture();
    backing.add_dir("/a/", "d1", &[("x", "v1"), ("y", "v2"), ("z", "v3")]);
    backing.add_file("/a/z", b"z contents");

    // Warm the cache for x and z only.
    let warm = vec!["/a/x".to_owned(), "/a/z".to_owned()];
    caching.read(&warm, ReadMode::Text).await?.get().await?;
    let read_calls = backing.read_calls();

    // z goes stale, y was never cached, x stays valid.
    backing.update_file("/a/", "z", "v4", b"z contents v4");
    stores.store(CacheCategory::Stat).clear();
    backing.corrupt_file("/a/x", b"must not be served");

    let paths = vec!["/a/x".to_owned(), "/a/y".to_owned(), "/a/z".to_owned()];
    let contents = caching.read(&paths, ReadMode::Text).await?.get().await?;

    assert_eq!(contents.len(), 3);
    assert_eq!(contents["/a/x"], &b"x contents"[..]);
    assert_eq!(contents["/a/y"], &b"y contents"[..]);
    assert_eq!(contents["/a/z"], &b"z contents v4"[..]);

    // The misses went out as a single batched backing read.
    assert_eq!(backing.read_calls(), read_calls + 1);

    // Both fetched paths were written back with their new versions.
    let entry = read_entry(&stores, CacheCategory::Read, "/a/y").unwrap();
    assert_eq!(entry.version, Version::new("v2"));
    let entry = read_entry(&stores, CacheCategory::Read, "/a/z").unwrap();
    assert_eq!(entry.version, Version::new("v4"));

    Ok(())
}

#[tokio::test]
async fn test_deferred_read_is_idempotent() -> Result<()> {
    let (backing, _stores, caching) = fixture();

    let paths = vec!["/a/y".to_owned()];
    let deferred = caching.read(&paths, ReadMode::Text).await?;

    let first = deferred.get().await?;
    let second = deferred.get().await?;
    assert_eq!(first, second);
    assert_eq!(backing.read_calls(), 1);

    Ok(())
}

#[tokio::test]
async fn test_read_not_found_propagates() -> Result<()> {
    let (_backing, _stores, caching) = fixture();

    let paths = vec!["/a/missing".to_owned()];
    let err = caching
        .read(&paths, ReadMode::Text)
        .await?
        .get()
        .await
        .unwrap_err();
    assert_eq!(err, FsError::NotFound("/a/missing".to_owned()));

    Ok(())
}

#[tokio::test]
async fn test_read_vanished_path_with_cached_entry() -> Result<()> {
    let (backing, stores, caching) = fixture();

    let paths = vec!["/a/y".to_owned()];
    caching.read(&paths, ReadMode::Text).await?.get().await?;

    // The path disappears from the backing store and the stat cache is
    // evicted: the single-stat fallback must surface the NotFound.
    backing.remove_file("/a/", "y");
    stores.store(CacheCategory::Stat).clear();

    let err = caching.read(&paths, ReadMode::Text).await.unwrap_err();
    assert_eq!(err, FsError::NotFound("/a/y".to_owned()));

    Ok(())
}

#[tokio::test]
async fn test_stat_store_outage_forces_backing_stat() -> Result<()> {
    let (backing, stores, caching) = fixture();

    let paths = vec!["/a/x".to_owned()];
    caching.read(&paths, ReadMode::Text).await?.get().await?;
    let stat_calls = backing.stat_calls();

    // With the stat namespace down, the cached read entry may not be served
    // on trust: the version is re-settled against the backing store.
    stores.store(CacheCategory::Stat).set_unavailable(true);

    let contents = caching.read(&paths, ReadMode::Text).await?.get().await?;
    assert_eq!(contents["/a/x"], &b"x contents"[..]);
    assert!(backing.stat_calls() > stat_calls);
    // The entry was still valid, so no backing read was necessary.
    assert_eq!(backing.read_calls(), 1);

    Ok(())
}

#[tokio::test]
async fn test_read_store_outage_degrades_to_backing() -> Result<()> {
    let (backing, stores, caching) = fixture();

    let paths = vec!["/a/x".to_owned()];
    caching.read(&paths, ReadMode::Text).await?.get().await?;

    stores.store(CacheCategory::Read).set_unavailable(true);

    // Every read now misses and is delegated, but keeps succeeding.
    let contents = caching.read(&paths, ReadMode::Text).await?.get().await?;
    assert_eq!(contents["/a/x"], &b"x contents"[..]);
    assert_eq!(backing.read_calls(), 2);

    Ok(())
}

#[tokio::test]
async fn test_expiry_hints() -> Result<()> {
    let (backing, stores, caching) = fixture();

    let paths = vec!["/a/x".to_owned()];
    caching.read(&paths, ReadMode::Text).await?.get().await?;

    // Stat entries persist; staleness is a version comparison, not a TTL.
    assert_eq!(
        stores.store(CacheCategory::Stat).expiry_of("/a/x"),
        Some(Expiry::Persist)
    );
    // Read entries carry the store's default expiry unless configured.
    assert_eq!(
        stores.store(CacheCategory::Read).expiry_of("/a/x"),
        Some(Expiry::Default)
    );

    // With a configured read TTL, write-backs carry it as the hint.
    let config = CacheConfig {
        read_expiry: Some(std::time::Duration::from_secs(3600)),
    };
    let stores2 = Arc::new(MemoryStoreProvider::default());
    let caching = CachingFileSystem::new(backing, stores2.as_ref(), &config);
    caching.read(&paths, ReadMode::Text).await?.get().await?;
    assert_eq!(
        stores2.store(CacheCategory::Read).expiry_of("/a/x"),
        Some(Expiry::Ttl(std::time::Duration::from_secs(3600)))
    );

    Ok(())
}

#[tokio::test]
async fn test_text_and_binary_namespaces_are_isolated() -> Result<()> {
    let (backing, stores, caching) = fixture();

    let paths = vec!["/a/x".to_owned()];
    caching.read(&paths, ReadMode::Text).await?.get().await?;
    assert_eq!(backing.read_calls(), 1);

    // A binary read of the same path is a distinct cache entry.
    caching.read(&paths, ReadMode::Binary).await?.get().await?;
    assert_eq!(backing.read_calls(), 2);

    assert!(read_entry(&stores, CacheCategory::Read, "/a/x").is_some());
    assert!(read_entry(&stores, CacheCategory::ReadBinary, "/a/x").is_some());

    // Further reads in either mode are cache hits.
    caching.read(&paths, ReadMode::Text).await?.get().await?;
    caching.read(&paths, ReadMode::Binary).await?.get().await?;
    assert_eq!(backing.read_calls(), 2);

    Ok(())
}

#[tokio::test]
async fn test_read_single() -> Result<()> {
    let (_backing, _stores, caching) = fixture();

    let contents = caching.read_single("/a/x", ReadMode::Text).await?;
    assert_eq!(contents, &b"x contents"[..]);

    let err = caching
        .read_single("/a/missing", ReadMode::Text)
        .await
        .unwrap_err();
    assert_eq!(err, FsError::NotFound("/a/missing".to_owned()));

    Ok(())
}

/// The worked example: directory `/a/` has children `{x: v1, y: v2}`. A cold
/// `stat("/a/x")` performs one backing stat of `/a/` and populates the stat
/// keys for the directory and both children; `stat("/a/y")` then needs zero
/// backing calls.
#[tokio::test]
async fn test_directory_stat_example() -> Result<()> {
    let (backing, stores, caching) = fixture();

    let stat = caching.stat("/a/x").await?;
    assert_eq!(stat.version, Version::new("v1"));
    assert_eq!(backing.stat_calls(), 1);

    let stat_store = stores.store(CacheCategory::Stat);
    let mut keys = stat_store.keys();
    keys.sort();
    assert_eq!(keys, vec!["/a/", "/a/x", "/a/y"]);

    let stat = caching.stat("/a/y").await?;
    assert_eq!(stat.version, Version::new("v2"));
    assert_eq!(backing.stat_calls(), 1);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_paths_collapse() -> Result<()> {
    let (backing, _stores, caching) = fixture();

    let paths = vec!["/a/x".to_owned(), "/a/x".to_owned(), "/a/y".to_owned()];
    let contents = caching.read(&paths, ReadMode::Text).await?.get().await?;
    assert_eq!(contents.len(), 2);
    assert_eq!(backing.read_calls(), 1);

    Ok(())
}
