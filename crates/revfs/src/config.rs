use std::time::Duration;

use serde::Deserialize;

use crate::store::Expiry;

/// Configuration for the caching file system.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Optional expiry hint attached to read-cache write-backs.
    ///
    /// When unset, read entries are written with the store's default expiry.
    /// Stat entries are always written with a persist hint: staleness is
    /// detected by version mismatch, not by TTL.
    #[serde(with = "humantime_serde")]
    pub read_expiry: Option<Duration>,
}

impl CacheConfig {
    pub(crate) fn read_expiry_hint(&self) -> Expiry {
        match self.read_expiry {
            Some(ttl) => Expiry::Ttl(ttl),
            None => Expiry::Default,
        }
    }
}
