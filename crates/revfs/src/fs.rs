//! The file system interface and its data model.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::deferred::Deferred;
use crate::error::{FsContents, FsError};

/// Opaque token identifying the content generation of a path.
///
/// Equality is the only comparison that matters: two equal versions imply
/// equal content for caching purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(token: impl Into<String>) -> Self {
        Version(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(token: &str) -> Self {
        Version(token.to_owned())
    }
}

/// Metadata for a single path.
///
/// `child_versions` is populated only when this describes a directory, in
/// which case it carries the current version of every direct child, obtained
/// in the same round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatInfo {
    pub version: Version,
    pub child_versions: Option<BTreeMap<String, Version>>,
}

impl StatInfo {
    /// Stat info for a single path, without directory children.
    pub fn new(version: Version) -> Self {
        StatInfo {
            version,
            child_versions: None,
        }
    }

    /// Stat info for a directory with a complete child-version map.
    pub fn directory(version: Version, child_versions: BTreeMap<String, Version>) -> Self {
        StatInfo {
            version,
            child_versions: Some(child_versions),
        }
    }
}

/// Whether file contents are read as text or as raw binary.
///
/// The two modes are cached in separate object store namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Text,
    Binary,
}

/// The result of a batched read: requested path to contents.
pub type PathContents = BTreeMap<String, Bytes>;

/// A hierarchical file system serving metadata and content requests.
///
/// A path ending in `/` denotes a directory. Stat-ing a directory yields a
/// complete child-version map for everything currently present under it;
/// stat-ing a non-existent path fails with [`FsError::NotFound`].
pub trait FileSystem: Send + Sync + 'static {
    /// Returns the [`StatInfo`] for `path`.
    fn stat<'a>(&'a self, path: &'a str) -> BoxFuture<'a, FsContents<StatInfo>>;

    /// Reads a batch of paths, resolving to a mapping from each requested
    /// path to its contents.
    fn read<'a>(
        &'a self,
        paths: &'a [String],
        mode: ReadMode,
    ) -> BoxFuture<'a, FsContents<Deferred<PathContents>>>;

    /// Reads a single path to completion.
    fn read_single<'a>(&'a self, path: &'a str, mode: ReadMode) -> BoxFuture<'a, FsContents<Bytes>> {
        Box::pin(async move {
            let paths = vec![path.to_owned()];
            let deferred = self.read(&paths, mode).await?;
            let mut contents = deferred.get().await?;
            contents
                .remove(path)
                .ok_or_else(|| FsError::NotFound(path.to_owned()))
        })
    }
}

/// Returns the directory containing `path`.
///
/// A path that already denotes a directory is returned unchanged; otherwise
/// the trailing segment is trimmed, keeping the separator. A separator-free
/// path is taken to live directly under the root.
pub(crate) fn dir_path(path: &str) -> String {
    if path.ends_with('/') {
        return path.to_owned();
    }
    match path.rfind('/') {
        Some(idx) => path[..=idx].to_owned(),
        None => "/".to_owned(),
    }
}

/// Returns the trailing `/`-delimited segment of `path`.
pub(crate) fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_path() {
        assert_eq!(dir_path("/a/x"), "/a/");
        assert_eq!(dir_path("/a/"), "/a/");
        assert_eq!(dir_path("/a/b/c.txt"), "/a/b/");
        assert_eq!(dir_path("/"), "/");
        assert_eq!(dir_path("top"), "/");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/a/x"), "x");
        assert_eq!(file_name("/a/b/c.txt"), "c.txt");
        assert_eq!(file_name("top"), "top");
    }
}
