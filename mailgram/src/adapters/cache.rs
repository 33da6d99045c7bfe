//! In-process bytes cache bounded by total size, evicting oldest entries
//! first. Correctness of the body fetch path doesn't depend on the
//! eviction policy (spec.md §4.6, §5) — this is the simplest one.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use mailgram_engine::fetch::Cache;

struct Inner {
    entries: HashMap<String, Vec<u8>>,
    order: VecDeque<String>,
    size: u64,
    limit: u64,
}

pub struct BoundedCache(Mutex<Inner>);

impl BoundedCache {
    pub fn new(limit_bytes: u64) -> Self {
        Self(Mutex::new(Inner { entries: HashMap::new(), order: VecDeque::new(), size: 0, limit: limit_bytes }))
    }
}

#[async_trait]
impl Cache for BoundedCache {
    async fn get(&self, content_hash: &str) -> Option<Vec<u8>> {
        self.0.lock().unwrap().entries.get(content_hash).cloned()
    }

    async fn put(&self, content_hash: &str, bytes: &[u8]) {
        let mut inner = self.0.lock().unwrap();
        if inner.entries.contains_key(content_hash) {
            return;
        }
        while inner.size + bytes.len() as u64 > inner.limit {
            match inner.order.pop_front() {
                Some(oldest) => {
                    if let Some(evicted) = inner.entries.remove(&oldest) {
                        inner.size -= evicted.len() as u64;
                    }
                }
                None => break,
            }
        }
        inner.size += bytes.len() as u64;
        inner.order.push_back(content_hash.to_string());
        inner.entries.insert(content_hash.to_string(), bytes.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn evicts_oldest_when_over_limit() {
        let cache = BoundedCache::new(10);
        cache.put("a", &[0u8; 6]).await;
        cache.put("b", &[0u8; 6]).await;
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_some());
    }
}
