use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

/// Default time-to-live applied when a caller does not pick one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub ttl: Duration,
    pub tags: Vec<String>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            tags: Vec::new(),
        }
    }
}

impl CacheOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            tags: Vec::new(),
        }
    }

    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub memory_size: u64,
    pub hit_rate: f64,
    pub total_accesses: u64,
    pub expired_count: u64,
}

/// Key/value store shared by every analytics service.
///
/// Values travel as JSON so that a remote store can sit behind the same
/// trait as the in-process one. Writes are last-writer-wins.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get_value(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>>;

    async fn set_value(
        &self,
        key: &str,
        value: serde_json::Value,
        options: CacheOptions,
    ) -> anyhow::Result<()>;

    async fn has(&self, key: &str) -> anyhow::Result<bool>;

    async fn delete(&self, key: &str) -> anyhow::Result<bool>;

    async fn clear(&self) -> anyhow::Result<()>;

    /// Remove every entry written with `tag`. Returns the number removed.
    async fn clear_by_tag(&self, tag: &str) -> anyhow::Result<usize>;

    async fn stats(&self) -> anyhow::Result<CacheStats>;
}

/// Typed read. Store failures and undecodable entries count as misses.
pub async fn cached<T: DeserializeOwned>(cache: &dyn CacheStore, key: &str) -> Option<T> {
    match cache.get_value(key).await {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache entry");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(key, error = %e, "cache read failed");
            None
        }
    }
}

/// Typed write. Failures are logged and otherwise ignored.
pub async fn store<T: Serialize>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    options: CacheOptions,
) {
    let encoded = match serde_json::to_value(value) {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!(key, error = %e, "value not cacheable");
            return;
        }
    };
    if let Err(e) = cache.set_value(key, encoded, options).await {
        warn!(key, error = %e, "cache write failed");
    }
}

/// Fill `keys` that are not yet present using `fetch`.
///
/// A failed fetch is logged and skipped; the remaining keys still load.
pub async fn warmup<F, Fut>(cache: &dyn CacheStore, keys: &[String], options: CacheOptions, fetch: F)
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<serde_json::Value>>,
{
    for key in keys {
        if cache.has(key).await.unwrap_or(false) {
            continue;
        }
        match fetch(key.clone()).await {
            Ok(value) => {
                if let Err(e) = cache.set_value(key, value, options.clone()).await {
                    warn!(key = %key, error = %e, "warmup write failed");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "warmup fetch failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_to_thirty_minutes_without_tags() {
        let opts = CacheOptions::default();
        assert_eq!(opts.ttl, Duration::from_secs(1800));
        assert!(opts.tags.is_empty());
    }

    #[test]
    fn tagged_appends_in_order() {
        let opts = CacheOptions::ttl(Duration::from_secs(60))
            .tagged("user_journeys")
            .tagged("session_1");
        assert_eq!(opts.tags, vec!["user_journeys", "session_1"]);
    }
}
