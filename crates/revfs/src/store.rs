//! The object store interface consumed by the caching layer.
//!
//! The store itself is an external collaborator: its storage engine and
//! eviction policy are not this crate's concern. The caching layer only
//! relies on `get`/`get_multi`/`set_multi` being independently atomic per
//! key, and on every cache category being namespace-isolated from the others.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreContents;

/// Expiry hint attached to a `set_multi`.
///
/// Stat entries are written with [`Expiry::Persist`]: staleness of cached
/// data is detected by version mismatch, never by TTL. Read entries carry
/// the store's default expiry unless a TTL is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Keep the entry until it is overwritten or evicted by the store.
    Persist,
    /// Use the store's default expiry.
    Default,
    /// Expire the entry after the given duration.
    Ttl(Duration),
}

/// The cache categories used by the caching file system.
///
/// Each category is backed by its own [`ObjectStore`] instance; identical
/// keys in different categories never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheCategory {
    Stat,
    Read,
    ReadBinary,
}

impl AsRef<str> for CacheCategory {
    fn as_ref(&self) -> &str {
        match self {
            Self::Stat => "stat",
            Self::Read => "read",
            Self::ReadBinary => "read-binary",
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// A namespaced key-value cache, keyed by path string.
pub trait ObjectStore: Send + Sync + 'static {
    /// Looks up a single key.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreContents<Option<Bytes>>>;

    /// Looks up a batch of keys; absent keys are simply missing from the
    /// returned mapping.
    fn get_multi<'a>(
        &'a self,
        keys: &'a [String],
    ) -> BoxFuture<'a, StoreContents<BTreeMap<String, Bytes>>>;

    /// Writes a batch of entries, fire-and-forget.
    ///
    /// Implementations may queue the write and perform it in the background.
    fn set_multi(&self, entries: BTreeMap<String, Bytes>, expiry: Expiry);
}

/// Hands out one [`ObjectStore`] instance per cache category.
pub trait StoreProvider: Send + Sync {
    fn create(&self, category: CacheCategory) -> Arc<dyn ObjectStore>;
}

/// A typed view of one object store category.
///
/// Values are encoded as JSON. Store unavailability and undecodable entries
/// are absorbed into cache misses here, so that a broken store degrades the
/// caching layer to always-consult-the-backing-store behavior instead of
/// failing requests.
pub(crate) struct Namespace<T> {
    store: Arc<dyn ObjectStore>,
    category: CacheCategory,
    _values: PhantomData<fn() -> T>,
}

impl<T> Clone for Namespace<T> {
    fn clone(&self) -> Self {
        Namespace {
            store: Arc::clone(&self.store),
            category: self.category,
            _values: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> Namespace<T> {
    pub(crate) fn new(store: Arc<dyn ObjectStore>, category: CacheCategory) -> Self {
        Namespace {
            store,
            category,
            _values: PhantomData,
        }
    }

    pub(crate) async fn get(&self, key: &str) -> Option<T> {
        match self.store.get(key).await {
            Ok(raw) => raw.and_then(|raw| self.decode(key, &raw)),
            Err(err) => {
                tracing::warn!(
                    category = %self.category,
                    key,
                    error = %err,
                    "object store unavailable, treating as miss",
                );
                None
            }
        }
    }

    pub(crate) async fn get_multi(&self, keys: &[String]) -> BTreeMap<String, T> {
        match self.store.get_multi(keys).await {
            Ok(raw) => raw
                .iter()
                .filter_map(|(key, raw)| Some((key.clone(), self.decode(key, raw)?)))
                .collect(),
            Err(err) => {
                tracing::warn!(
                    category = %self.category,
                    error = %err,
                    "object store unavailable, treating as miss",
                );
                BTreeMap::new()
            }
        }
    }

    pub(crate) fn set_multi(&self, entries: BTreeMap<String, T>, expiry: Expiry) {
        let mut raw = BTreeMap::new();
        for (key, value) in entries {
            match serde_json::to_vec(&value) {
                Ok(encoded) => {
                    raw.insert(key, Bytes::from(encoded));
                }
                Err(err) => {
                    tracing::error!(
                        category = %self.category,
                        key,
                        error = %err,
                        "failed to encode cache entry",
                    );
                }
            }
        }
        tracing::trace!(category = %self.category, count = raw.len(), "cache write-back");
        self.store.set_multi(raw, expiry);
    }

    fn decode(&self, key: &str, raw: &[u8]) -> Option<T> {
        match serde_json::from_slice(raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(
                    category = %self.category,
                    key,
                    error = %err,
                    "undecodable cache entry, treating as miss",
                );
                None
            }
        }
    }
}
