//! TTL cache in front of a registry client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use tokio::time::Instant;
use tracing::debug;

use super::{RegistryClient, Result};

/// Registry decorator that caches successful lookups per service.
///
/// Failed lookups are never cached, so an outage is retried on the next call.
#[derive(Debug)]
pub struct CachedRegistry {
    inner: Arc<dyn RegistryClient>,
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    endpoints: Vec<String>,
    cached_at: Instant,
}

impl CachedRegistry {
    /// Wraps `inner`, keeping results for `ttl`.
    pub fn new(inner: Arc<dyn RegistryClient>, ttl: Duration) -> Self {
        Self {
            inner,
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns the configured time-to-live.
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn get(&self, service: &str) -> Option<Vec<String>> {
        self.entries.get(service).and_then(|entry| {
            if entry.cached_at.elapsed() < self.ttl {
                Some(entry.endpoints.clone())
            } else {
                None
            }
        })
    }

    fn set(&self, service: &str, endpoints: Vec<String>) {
        self.entries.insert(
            service.to_owned(),
            CacheEntry {
                endpoints,
                cached_at: Instant::now(),
            },
        );
    }
}

#[async_trait]
impl RegistryClient for CachedRegistry {
    async fn list_healthy_endpoints(&self, service: &str) -> Result<Vec<String>> {
        if let Some(cached) = self.get(service) {
            counter!("waypoint.registry.cache_hits", "service" => service.to_owned()).increment(1);
            debug!(service = %service, endpoints = cached.len(), "Registry cache hit");
            return Ok(cached);
        }

        counter!("waypoint.registry.cache_misses", "service" => service.to_owned()).increment(1);
        let endpoints = self.inner.list_healthy_endpoints(service).await?;
        self.set(service, endpoints.clone());
        Ok(endpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{LocalRegistry, RegistryError};

    fn cached(ttl: Duration) -> (Arc<LocalRegistry>, CachedRegistry) {
        let local = Arc::new(LocalRegistry::new());
        local.register("orders", "a", "10.0.0.1:8500").unwrap();
        let cache = CachedRegistry::new(local.clone(), ttl);
        (local, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn cache_hit_within_ttl() {
        let (local, cache) = cached(Duration::from_secs(5));

        let first = cache.list_healthy_endpoints("orders").await.unwrap();
        local.register("orders", "b", "10.0.0.2:8500").unwrap();

        let second = cache.list_healthy_endpoints("orders").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_ttl_expiry() {
        let (local, cache) = cached(Duration::from_secs(5));

        cache.list_healthy_endpoints("orders").await.unwrap();
        local.register("orders", "b", "10.0.0.2:8500").unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        let refreshed = cache.list_healthy_endpoints("orders").await.unwrap();
        assert_eq!(refreshed.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_not_cached() {
        let (local, cache) = cached(Duration::from_secs(5));
        local.set_reachable(false);

        let result = cache.list_healthy_endpoints("orders").await;
        assert!(matches!(result, Err(RegistryError::Unavailable(_))));

        local.set_reachable(true);
        let recovered = cache.list_healthy_endpoints("orders").await.unwrap();
        assert_eq!(recovered, vec!["10.0.0.1:8500"]);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_forces_refresh() {
        let (local, cache) = cached(Duration::from_secs(60));

        cache.list_healthy_endpoints("orders").await.unwrap();
        local.register("orders", "b", "10.0.0.2:8500").unwrap();
        cache.clear();

        let refreshed = cache.list_healthy_endpoints("orders").await.unwrap();
        assert_eq!(refreshed.len(), 2);
    }
}
