use crate::error::StoreError;
use crate::store::{keys, SettingsStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Storage for rate-limit hits: per caller, the millisecond timestamps of
/// requests still inside the window.
#[async_trait]
pub trait HitStore: Send + Sync + std::fmt::Debug {
    async fn load(&self, caller: &str) -> Result<Vec<u64>, StoreError>;

    /// Replace the hits for `caller`. `ttl` is the window length; backends with
    /// expiry may drop the entry once it passes.
    async fn save(&self, caller: &str, hits: &[u64], ttl: Duration) -> Result<(), StoreError>;
}

/// Process-local hit store.
#[derive(Default, Clone, Debug)]
pub struct InMemoryHitStore {
    data: Arc<Mutex<HashMap<String, Vec<u64>>>>,
}

impl InMemoryHitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HitStore for InMemoryHitStore {
    async fn load(&self, caller: &str) -> Result<Vec<u64>, StoreError> {
        let guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(caller).cloned().unwrap_or_default())
    }

    async fn save(&self, caller: &str, hits: &[u64], _ttl: Duration) -> Result<(), StoreError> {
        let mut guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        if hits.is_empty() {
            guard.remove(caller);
        } else {
            guard.insert(caller.to_string(), hits.to_vec());
        }
        Ok(())
    }
}

/// Hits kept as a transient in the host settings store, so every worker
/// serving the site shares one window.
#[derive(Clone, Debug)]
pub struct SettingsHitStore {
    store: Arc<dyn SettingsStore>,
}

impl SettingsHitStore {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HitStore for SettingsHitStore {
    async fn load(&self, caller: &str) -> Result<Vec<u64>, StoreError> {
        let key = keys::rate_limit(caller);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_value(raw) {
            Ok(hits) => Ok(hits),
            Err(source) => {
                tracing::warn!(%key, error = %source, "discarding unreadable rate limit entry");
                self.store.delete(&key).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, caller: &str, hits: &[u64], ttl: Duration) -> Result<(), StoreError> {
        let key = keys::rate_limit(caller);
        if hits.is_empty() {
            return self.store.delete(&key).await;
        }
        let value = serde_json::to_value(hits).map_err(|source| StoreError::Encode { key: key.clone(), source })?;
        self.store.set(&key, value, Some(ttl)).await
    }
}
