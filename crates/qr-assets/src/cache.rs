//! Per-run resolution cache using moka
//!
//! Memoizes successful resolutions by `(reference, kind)`:
//! - Concurrent lookups of the same key share one in-flight resolution
//! - Failures are never stored, a later lookup retries

use crate::error::AssetError;
use crate::kind::AssetKind;
use moka::future::Cache;
use std::fmt::Debug;
use std::future::Future;

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of entries in cache
    pub entry_count: u64,
}

/// Key of a resolved asset
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetKey {
    reference: String,
    kind: AssetKind,
}

impl AssetKey {
    #[inline]
    #[must_use]
    pub fn new(reference: impl Into<String>, kind: AssetKind) -> Self {
        Self {
            reference: reference.into(),
            kind,
        }
    }

    /// Reference as written in the plan
    #[inline]
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> AssetKind {
        self.kind
    }
}

/// Resolution cache, cheap to clone and share across tasks
#[derive(Debug, Clone)]
pub struct ResolutionCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<AssetKey, V>,
}

impl<V> ResolutionCache<V>
where
    V: Clone + Debug + Send + Sync + 'static,
{
    /// Create new cache with max capacity
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::new(max_capacity),
        }
    }

    /// Get or resolve value
    ///
    /// Only one `init` runs per key at a time; other callers wait for its
    /// outcome. An `Err` is handed to every waiter and nothing is stored.
    ///
    /// # Errors
    /// Whatever `init` returned
    pub async fn try_get_or_resolve<F>(&self, key: AssetKey, init: F) -> Result<V, AssetError>
    where
        F: Future<Output = Result<V, AssetError>>,
    {
        self.inner
            .try_get_with(key, init)
            .await
            .map_err(AssetError::from_shared)
    }

    /// Get cache statistics
    #[inline]
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.inner.entry_count(),
        }
    }
}

impl<V> Default for ResolutionCache<V>
where
    V: Clone + Debug + Send + Sync + 'static,
{
    /// Create cache with default capacity (10,000 entries)
    fn default() -> Self {
        Self::new(10_000)
    }
}
