//! Typed TTL cache over the host settings store.
//!
//! The cache is a performance layer only: store failures are logged and treated
//! as misses, never surfaced to callers.

use crate::store::SettingsStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Get-or-fetch cache with explicit bypass.
#[derive(Debug, Clone)]
pub struct TtlCache {
    store: Arc<dyn SettingsStore>,
}

impl TtlCache {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Borrow the backing store.
    pub fn store(&self) -> &Arc<dyn SettingsStore> {
        &self.store
    }

    /// Cached value for `key`, if present, live and decodable.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_value(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding undecodable cache entry");
                self.invalidate(key).await;
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl`.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let encoded = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to encode cache entry");
                return;
            }
        };
        if let Err(e) = self.store.set(key, encoded, Some(ttl)).await {
            tracing::warn!(key, error = %e, "cache write failed");
        }
    }

    /// Drop the entry for `key`.
    pub async fn invalidate(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            tracing::warn!(key, error = %e, "cache invalidation failed");
        }
    }

    /// Return the cached value unless `bypass` is set; otherwise run `fetch`,
    /// cache what it returns and hand it back.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: &str, ttl: Duration, bypass: bool, fetch: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !bypass {
            if let Some(hit) = self.get::<T>(key).await {
                tracing::debug!(key, "cache hit");
                return hit;
            }
        }
        tracing::debug!(key, bypass, "cache miss");
        let value = fetch().await;
        self.put(key, &value, ttl).await;
        value
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch) but only caches `Some` results,
    /// so a failed fetch is retried on the next read.
    pub async fn get_or_try_fetch<T, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            tracing::debug!(key, "cache hit");
            return Some(hit);
        }
        tracing::debug!(key, "cache miss");
        let value = fetch().await?;
        self.put(key, &value, ttl).await;
        Some(value)
    }
}
