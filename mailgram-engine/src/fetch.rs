//! C6 — Body fetch path. Given a message, resolves its raw bytes through
//! a three-tier path: local spool (pre-upload), bytes cache, object store
//! (spec.md §4.6). The object store, cache and local spool are external
//! collaborators (spec.md §1); this module only defines the operational
//! contract they must satisfy and the resolution algorithm over it.

use async_trait::async_trait;

use mailgram_store::{CoreError, Result};

/// Idempotent content-addressed blob store. `put` on an existing key is a
/// no-op (spec.md §4.5, §5) — concurrent puts for the same key are safe.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, content_hash: &str) -> Result<Vec<u8>>;
    async fn put(&self, content_hash: &str, bytes: &[u8]) -> Result<()>;
    /// Invoked only by the GC coordinator (C11) once no message row
    /// references `content_hash` anymore.
    async fn delete(&self, content_hash: &str) -> Result<()>;
}

/// Thread-safe bytes cache keyed by content hash. Eviction is the cache's
/// own responsibility; correctness of the fetch path is unaffected by it
/// (spec.md §4.6, §5).
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, content_hash: &str) -> Option<Vec<u8>>;
    async fn put(&self, content_hash: &str, bytes: &[u8]);
}

/// Append-only local spool: one writer (the accepting session), many
/// readers. A missing entry is a normal, expected state — not an error
/// condition in itself — until the caller decides what it means
/// (spec.md §4.6, §5).
#[async_trait]
pub trait Spool: Send + Sync {
    async fn read(&self, content_hash: &str) -> Result<Option<Vec<u8>>>;
}

/// Resolves a message's raw bytes through the three-tier path. `uploaded`
/// is the message row's `uploaded_flag` (spec.md §4.6):
///
/// 1. If `uploaded`: consult the cache; on miss, read the object store and
///    populate the cache.
/// 2. If not `uploaded`: read the local spool. A missing spool entry
///    surfaces as `MessageNotYetAvailable` — a retryable condition, not a
///    deletion (spec.md §4.6, §7).
pub async fn fetch_body(
    object_store: &dyn ObjectStore,
    cache: &dyn Cache,
    spool: &dyn Spool,
    content_hash: &str,
    uploaded: bool,
) -> Result<Vec<u8>> {
    if uploaded {
        if let Some(bytes) = cache.get(content_hash).await {
            return Ok(bytes);
        }
        let bytes = object_store.get(content_hash).await?;
        cache.put(content_hash, &bytes).await;
        Ok(bytes)
    } else {
        spool
            .read(content_hash)
            .await?
            .ok_or(CoreError::MessageNotYetAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeObjectStore(Mutex<HashMap<String, Vec<u8>>>);
    #[async_trait]
    impl ObjectStore for FakeObjectStore {
        async fn get(&self, content_hash: &str) -> Result<Vec<u8>> {
            self.0.lock().unwrap().get(content_hash).cloned().ok_or(CoreError::NotFound)
        }
        async fn put(&self, content_hash: &str, bytes: &[u8]) -> Result<()> {
            self.0.lock().unwrap().insert(content_hash.to_string(), bytes.to_vec());
            Ok(())
        }
        async fn delete(&self, content_hash: &str) -> Result<()> {
            self.0.lock().unwrap().remove(content_hash);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeCache(Mutex<HashMap<String, Vec<u8>>>);
    #[async_trait]
    impl Cache for FakeCache {
        async fn get(&self, content_hash: &str) -> Option<Vec<u8>> {
            self.0.lock().unwrap().get(content_hash).cloned()
        }
        async fn put(&self, content_hash: &str, bytes: &[u8]) {
            self.0.lock().unwrap().insert(content_hash.to_string(), bytes.to_vec());
        }
    }

    #[derive(Default)]
    struct FakeSpool(Mutex<HashMap<String, Vec<u8>>>);
    #[async_trait]
    impl Spool for FakeSpool {
        async fn read(&self, content_hash: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.0.lock().unwrap().get(content_hash).cloned())
        }
    }

    #[tokio::test]
    async fn uploaded_hits_cache_before_object_store() {
        let store = FakeObjectStore(Mutex::new(HashMap::new()));
        let cache = FakeCache::default();
        let spool = FakeSpool::default();
        cache.put("H1", b"hello").await;

        let bytes = fetch_body(&store, &cache, &spool, "H1", true).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn uploaded_falls_back_to_object_store_and_populates_cache() {
        let mut backing = HashMap::new();
        backing.insert("H1".to_string(), b"world".to_vec());
        let store = FakeObjectStore(Mutex::new(backing));
        let cache = FakeCache::default();
        let spool = FakeSpool::default();

        let bytes = fetch_body(&store, &cache, &spool, "H1", true).await.unwrap();
        assert_eq!(bytes, b"world");
        assert_eq!(cache.get("H1").await, Some(b"world".to_vec()));
    }

    #[tokio::test]
    async fn not_uploaded_reads_spool() {
        let store = FakeObjectStore(Mutex::new(HashMap::new()));
        let cache = FakeCache::default();
        let mut backing = HashMap::new();
        backing.insert("H1".to_string(), b"spooled".to_vec());
        let spool = FakeSpool(Mutex::new(backing));

        let bytes = fetch_body(&store, &cache, &spool, "H1", false).await.unwrap();
        assert_eq!(bytes, b"spooled");
    }

    #[tokio::test]
    async fn not_uploaded_missing_spool_is_retryable_not_fatal() {
        let store = FakeObjectStore(Mutex::new(HashMap::new()));
        let cache = FakeCache::default();
        let spool = FakeSpool::default();

        let err = fetch_body(&store, &cache, &spool, "H1", false).await.unwrap_err();
        assert!(matches!(err, CoreError::MessageNotYetAvailable));
        assert!(err.is_retryable());
    }
}
