use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::Expiry;

use brokerlens_core::cache::{CacheOptions, CacheStats, CacheStore};

type TagIndex = Arc<Mutex<HashMap<String, HashSet<String>>>>;

#[derive(Debug, Clone)]
struct Entry {
    value: Arc<serde_json::Value>,
    ttl: Duration,
    tags: Arc<[String]>,
}

/// Expires each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

fn untag(index: &TagIndex, key: &str, tags: &[String]) {
    let mut index = index.lock().unwrap_or_else(PoisonError::into_inner);
    for tag in tags {
        if let Some(keys) = index.get_mut(tag) {
            keys.remove(key);
            if keys.is_empty() {
                index.remove(tag);
            }
        }
    }
}

/// In-process [`CacheStore`] backed by a bounded moka cache.
///
/// Capacity overflow evicts by TinyLFU. Every entry carries its own TTL and
/// tag set; the tag index is pruned as entries leave the cache.
pub struct MemoryCache {
    cache: Cache<String, Entry>,
    tags: TagIndex,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: Arc<AtomicU64>,
}

impl MemoryCache {
    pub fn new(max_entries: u64) -> Self {
        let tags: TagIndex = Arc::new(Mutex::new(HashMap::new()));
        let expired = Arc::new(AtomicU64::new(0));

        let listener_tags = Arc::clone(&tags);
        let listener_expired = Arc::clone(&expired);
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .eviction_listener(move |key: Arc<String>, entry: Entry, cause| {
                if cause == RemovalCause::Replaced {
                    return;
                }
                if cause == RemovalCause::Expired {
                    listener_expired.fetch_add(1, Ordering::Relaxed);
                }
                untag(&listener_tags, &key, &entry.tags);
            })
            .build();

        Self {
            cache,
            tags,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired,
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get_value(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        match self.cache.get(key).await {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.value.as_ref().clone()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set_value(
        &self,
        key: &str,
        value: serde_json::Value,
        options: CacheOptions,
    ) -> anyhow::Result<()> {
        if let Some(previous) = self.cache.get(key).await {
            untag(&self.tags, key, &previous.tags);
        }
        let entry = Entry {
            value: Arc::new(value),
            ttl: options.ttl,
            tags: options.tags.clone().into(),
        };
        {
            let mut index = self.tags.lock().unwrap_or_else(PoisonError::into_inner);
            for tag in &options.tags {
                index.entry(tag.clone()).or_default().insert(key.to_string());
            }
        }
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn has(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.cache.contains_key(key))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        self.tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }

    async fn clear_by_tag(&self, tag: &str) -> anyhow::Result<usize> {
        let keys = self
            .tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tag)
            .unwrap_or_default();
        let mut removed = 0;
        for key in keys {
            if self.cache.remove(&key).await.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn stats(&self) -> anyhow::Result<CacheStats> {
        self.cache.run_pending_tasks().await;
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        Ok(CacheStats {
            memory_size: self.cache.entry_count(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            total_accesses: total,
            expired_count: self.expired.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn get_set_and_hit_rate() {
        let cache = MemoryCache::new(100);
        assert!(cache.get_value("a").await.unwrap().is_none());
        cache
            .set_value("a", json!({"n": 1}), CacheOptions::default())
            .await
            .unwrap();
        assert_eq!(cache.get_value("a").await.unwrap(), Some(json!({"n": 1})));
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_accesses, 2);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.memory_size, 1);
    }

    #[tokio::test]
    async fn clear_by_tag_only_removes_tagged_entries() {
        let cache = MemoryCache::new(100);
        let tagged = CacheOptions::default().tagged("ab_tests");
        cache.set_value("t1", json!(1), tagged.clone()).await.unwrap();
        cache.set_value("t2", json!(2), tagged).await.unwrap();
        cache
            .set_value("other", json!(3), CacheOptions::default())
            .await
            .unwrap();

        assert_eq!(cache.clear_by_tag("ab_tests").await.unwrap(), 2);
        assert!(!cache.has("t1").await.unwrap());
        assert!(cache.has("other").await.unwrap());
        assert_eq!(cache.clear_by_tag("ab_tests").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn retagging_a_key_drops_old_membership() {
        let cache = MemoryCache::new(100);
        cache
            .set_value("k", json!(1), CacheOptions::default().tagged("old"))
            .await
            .unwrap();
        cache
            .set_value("k", json!(2), CacheOptions::default().tagged("new"))
            .await
            .unwrap();
        assert_eq!(cache.clear_by_tag("old").await.unwrap(), 0);
        assert!(cache.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn entries_expire_after_their_own_ttl() {
        let cache = MemoryCache::new(100);
        cache
            .set_value("short", json!(1), CacheOptions::ttl(Duration::from_millis(20)))
            .await
            .unwrap();
        cache
            .set_value("long", json!(2), CacheOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get_value("short").await.unwrap().is_none());
        assert!(cache.get_value("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let cache = MemoryCache::new(100);
        cache
            .set_value("k", json!(true), CacheOptions::default())
            .await
            .unwrap();
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        cache.clear().await.unwrap();
        assert_eq!(cache.stats().await.unwrap().memory_size, 0);
    }
}
