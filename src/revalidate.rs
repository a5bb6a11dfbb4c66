//! Page cache and path revalidation.
//!
//! Writes call [`PageCache::revalidate_path`] for the route the user was on so
//! the next read of that page is fresh. Failures are logged, never returned:
//! a stale page must not fail a committed write.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, Method};
use serde_json::Value;

#[async_trait]
pub trait PageCache: Send + Sync {
    /// Cached body for a route key (`/`, `/?page=2&size=20`).
    async fn get(&self, key: &str) -> Option<Value>;
    async fn put(&self, key: &str, body: Value);
    /// Evict `path` and every key of that path with a query string.
    async fn revalidate_path(&self, path: &str);
}

fn key_matches(key: &str, path: &str) -> bool {
    match key.strip_prefix(path) {
        Some(rest) => rest.is_empty() || rest.starts_with('?'),
        None => false,
    }
}

pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// In-process route cache. Holds at most `max_entries` routes; puts beyond
/// that are dropped until a revalidation frees space.
#[derive(Clone)]
pub struct InMemoryPageCache {
    entries: Arc<DashMap<String, Value>>,
    revalidations: Arc<AtomicUsize>,
    max_entries: usize,
}

impl Default for InMemoryPageCache {
    fn default() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES)
    }
}

impl InMemoryPageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self { entries: Arc::new(DashMap::new()), revalidations: Arc::new(AtomicUsize::new(0)), max_entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of revalidation calls seen so far.
    pub fn revalidations(&self) -> usize {
        self.revalidations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PageCache for InMemoryPageCache {
    async fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    async fn put(&self, key: &str, body: Value) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(key) {
            tracing::debug!(key, "page cache full; not caching");
            return;
        }
        self.entries.insert(key.to_string(), body);
    }

    async fn revalidate_path(&self, path: &str) {
        self.revalidations.fetch_add(1, Ordering::Relaxed);
        self.entries.retain(|k, _| !key_matches(k, path));
        tracing::debug!(path, "revalidated");
    }
}

const PURGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends `PURGE <base><path>` to a fronting reverse proxy. Holds nothing locally.
pub struct PurgePageCache {
    client: Client,
    base_url: String,
}

impl PurgePageCache {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self { client: Client::new(), base_url: base_url.trim_end_matches('/').to_string() }
    }

    pub fn purge_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl PageCache for PurgePageCache {
    async fn get(&self, _key: &str) -> Option<Value> {
        None
    }

    async fn put(&self, _key: &str, _body: Value) {}

    async fn revalidate_path(&self, path: &str) {
        let Ok(method) = Method::from_bytes(b"PURGE") else { return };
        let url = self.purge_url(path);
        match tokio::time::timeout(PURGE_TIMEOUT, self.client.request(method, &url).send()).await {
            Ok(Ok(resp)) if resp.status().is_success() => tracing::debug!(%url, "purged"),
            Ok(Ok(resp)) => tracing::warn!(%url, status = %resp.status(), "cache purge rejected"),
            Ok(Err(e)) => tracing::warn!(%url, error = %e, "cache purge failed"),
            Err(_) => tracing::warn!(%url, "cache purge timed out"),
        }
    }
}

pub struct NoopPageCache;

#[async_trait]
impl PageCache for NoopPageCache {
    async fn get(&self, _key: &str) -> Option<Value> {
        None
    }

    async fn put(&self, _key: &str, _body: Value) {}

    async fn revalidate_path(&self, _path: &str) {}
}

/// Pick a cache from `CACHE_PROVIDER` (`memory` default, `purge`, `none`).
pub fn make_page_cache(provider: &str, purge_url: Option<&str>) -> anyhow::Result<Arc<dyn PageCache>> {
    match provider {
        "memory" | "" => Ok(Arc::new(InMemoryPageCache::new())),
        "purge" => {
            let base = purge_url.ok_or_else(|| anyhow::anyhow!("CACHE_PURGE_URL is required for the purge cache provider"))?;
            Ok(Arc::new(PurgePageCache::new(base)))
        }
        "none" => {
            tracing::info!("page cache disabled");
            Ok(Arc::new(NoopPageCache))
        }
        other => Err(anyhow::anyhow!("unknown cache provider: {other}")),
    }
}
