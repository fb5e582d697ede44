use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use tokio::{sync::RwLock, time::Instant};

use super::PipelineCache;
use crate::error::Result;

/// Process-local cache honoring TTLs. Used by tests and by single-process
/// development runs without Redis.
#[derive(Debug, Default)]
pub struct InMemoryPipelineCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl InMemoryPipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored value for `key`, if present and not expired.
    pub async fn raw(&self, key: &str) -> Option<String> {
        let guard = self.entries.read().await;
        guard
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone())
    }

    /// Remaining lifetime of `key`.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let guard = self.entries.read().await;
        guard
            .get(key)
            .map(|(_, expires_at)| expires_at.saturating_duration_since(Instant::now()))
            .filter(|remaining| !remaining.is_zero())
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let guard = self.entries.read().await;
        guard.values().filter(|(_, expires_at)| *expires_at > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PipelineCache for InMemoryPipelineCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut guard = self.entries.write().await;
        match guard.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                guard.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let cache = InMemoryPipelineCache::new();
        cache
            .set_with_ttl("asm:pipeline:J1", "{}".to_string(), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(cache.len().await, 1);

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get("asm:pipeline:J1").await.unwrap().is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn rewrite_refreshes_ttl() {
        let cache = InMemoryPipelineCache::new();
        cache
            .set_with_ttl("k", "v1".to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        cache
            .set_with_ttl("k", "v2".to_string(), Duration::from_secs(3600))
            .await
            .unwrap();

        let ttl = cache.ttl("k").await.expect("key present");
        assert!(ttl > Duration::from_secs(3500));
        assert_eq!(cache.raw("k").await.as_deref(), Some("v2"));
    }
}
