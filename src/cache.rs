//! Scoped, time-boxed cache for expensive lookups.
//!
//! Entries are keyed two-level: `(scope, query_hash)`. The scope is the
//! content type a query touches; the hash is SHA-256 over the serialized
//! logical query, so equivalent queries share one entry. Invalidation is
//! scope-wide (`delete_all(scope)`) — no individual key tracking — and is
//! wired to content-store mutation events.

use crate::content::ContentStore;
use crate::metrics::PipelineMetrics;
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// TTL cache with scope-level mass invalidation.
#[derive(Default)]
pub struct ScopedCache {
    inner: Mutex<HashMap<(String, String), Entry>>,
}

impl ScopedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic hash of a logical query.
    pub fn query_hash<Q: Serialize>(query: &Q) -> String {
        let bytes = serde_json::to_vec(query).expect("query must serialize");
        let digest = Sha256::digest(&bytes);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Return the cached value for `(scope, query)` if it is within its TTL;
    /// otherwise run `compute`, store the result, and return it.
    ///
    /// If `compute` fails nothing is written and the error propagates — an
    /// expired entry is dropped rather than served stale.
    pub fn get_or_compute<Q, T, F>(
        &self,
        scope: &str,
        query: &Q,
        ttl: Duration,
        compute: F,
    ) -> Result<T>
    where
        Q: Serialize,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        let key = (scope.to_string(), Self::query_hash(query));

        {
            let inner = self.inner.lock().unwrap();
            if let Some(entry) = inner.get(&key) {
                if entry.expires_at > Instant::now() {
                    PipelineMetrics::global().record_cache_hit();
                    let value = serde_json::from_value(entry.value.clone())?;
                    return Ok(value);
                }
            }
        }

        PipelineMetrics::global().record_cache_miss();
        match compute() {
            Ok(value) => {
                let stored = serde_json::to_value(&value)?;
                let mut inner = self.inner.lock().unwrap();
                inner.insert(
                    key,
                    Entry {
                        value: stored,
                        expires_at: Instant::now() + ttl,
                    },
                );
                Ok(value)
            }
            Err(e) => {
                // Never fall back to the expired entry.
                self.inner.lock().unwrap().remove(&key);
                Err(e)
            }
        }
    }

    /// Drop every entry in a scope.
    pub fn invalidate_scope(&self, scope: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.retain(|(entry_scope, _), _| entry_scope != scope);
    }

    /// Number of live entries (expired entries included until overwritten).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe this cache to a content store's mutation events: any write
    /// to an item of type T drops every entry scoped to T.
    pub fn attach(self: &Arc<Self>, store: &dyn ContentStore) {
        let cache = Arc::clone(self);
        store.subscribe(Arc::new(move |content_type| {
            cache.invalidate_scope(content_type.as_str());
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentType, MemoryStore};
    use anyhow::anyhow;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    // ==================== Hit/Miss Tests ====================

    #[test]
    #[serial]
    fn test_miss_computes_then_hit_skips_compute() {
        let cache = ScopedCache::new();
        let calls = AtomicUsize::new(0);

        let first: String = cache
            .get_or_compute("page", &("titles", 1), TTL, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("About Us".to_string())
            })
            .unwrap();
        assert_eq!(first, "About Us");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let second: String = cache
            .get_or_compute("page", &("titles", 1), TTL, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("recomputed".to_string())
            })
            .unwrap();
        assert_eq!(second, "About Us");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "hit must not recompute");
    }

    #[test]
    #[serial]
    fn test_equivalent_queries_share_one_entry() {
        let cache = ScopedCache::new();

        let _: Vec<i64> = cache
            .get_or_compute("location", &("ids",), TTL, || Ok(vec![1, 2]))
            .unwrap();
        let _: Vec<i64> = cache
            .get_or_compute("location", &("ids",), TTL, || Ok(vec![9, 9]))
            .unwrap();

        assert_eq!(cache.len(), 1);
    }

    #[test]
    #[serial]
    fn test_different_scopes_do_not_collide() {
        let cache = ScopedCache::new();

        let a: i64 = cache
            .get_or_compute("page", &"count", TTL, || Ok(10))
            .unwrap();
        let b: i64 = cache
            .get_or_compute("location", &"count", TTL, || Ok(20))
            .unwrap();
        assert_eq!((a, b), (10, 20));
        assert_eq!(cache.len(), 2);
    }

    // ==================== Expiry Tests ====================

    #[test]
    #[serial]
    fn test_expired_entry_recomputes() {
        let cache = ScopedCache::new();

        let _: i64 = cache
            .get_or_compute("page", &"q", Duration::ZERO, || Ok(1))
            .unwrap();
        let second: i64 = cache
            .get_or_compute("page", &"q", TTL, || Ok(2))
            .unwrap();
        assert_eq!(second, 2);
    }

    #[test]
    #[serial]
    fn test_expired_entry_never_served_when_recompute_fails() {
        let cache = ScopedCache::new();

        let _: i64 = cache
            .get_or_compute("page", &"q", Duration::ZERO, || Ok(1))
            .unwrap();

        let result: Result<i64> =
            cache.get_or_compute("page", &"q", TTL, || Err(anyhow!("store unavailable")));
        assert!(result.is_err());
        assert!(cache.is_empty(), "failed recompute must drop the stale entry");
    }

    #[test]
    #[serial]
    fn test_compute_failure_writes_nothing() {
        let cache = ScopedCache::new();

        let result: Result<i64> =
            cache.get_or_compute("page", &"q", TTL, || Err(anyhow!("boom")));
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    // ==================== Invalidation Tests ====================

    #[test]
    #[serial]
    fn test_invalidate_scope_drops_only_that_scope() {
        let cache = ScopedCache::new();

        let _: i64 = cache.get_or_compute("page", &"a", TTL, || Ok(1)).unwrap();
        let _: i64 = cache.get_or_compute("page", &"b", TTL, || Ok(2)).unwrap();
        let _: i64 = cache
            .get_or_compute("location", &"a", TTL, || Ok(3))
            .unwrap();

        cache.invalidate_scope("page");
        assert_eq!(cache.len(), 1);

        let recomputed: i64 = cache.get_or_compute("page", &"a", TTL, || Ok(4)).unwrap();
        assert_eq!(recomputed, 4);
    }

    #[test]
    #[serial]
    fn test_store_mutation_invalidates_scope() {
        let cache = Arc::new(ScopedCache::new());
        let store = MemoryStore::new();
        store.insert(1, ContentType::Location);
        cache.attach(&store);

        let _: i64 = cache
            .get_or_compute("location", &"count", TTL, || Ok(1))
            .unwrap();
        assert_eq!(cache.len(), 1);

        use crate::content::ContentStore as _;
        store.set_field(1, "title", "Marietta Center");

        assert!(cache.is_empty());
        let recomputed: i64 = cache
            .get_or_compute("location", &"count", TTL, || Ok(2))
            .unwrap();
        assert_eq!(recomputed, 2);
    }

    #[test]
    #[serial]
    fn test_query_hash_is_deterministic() {
        let a = ScopedCache::query_hash(&("gap_scan", "es", 3));
        let b = ScopedCache::query_hash(&("gap_scan", "es", 3));
        let c = ScopedCache::query_hash(&("gap_scan", "es", 4));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
