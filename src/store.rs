//! Host-managed key/value settings.
//!
//! The host persists two kinds of entries: options (no expiry) and transients
//! (expire after a TTL). Both are modelled by a single [`SettingsStore`] whose
//! `set` takes an optional TTL. Every key this crate writes starts with
//! [`keys::PREFIX`] so uninstall can sweep them.

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Key names shared by every component.
pub mod keys {
    pub const PREFIX: &str = "altmeter_";

    pub const SITE_ID: &str = "altmeter_site_id";
    pub const USER_EMAIL: &str = "altmeter_user_email";
    pub const ACTIVATION_TIME: &str = "altmeter_activation_time";
    pub const LAST_HEARTBEAT: &str = "altmeter_last_heartbeat";
    pub const PRO_OVERRIDE: &str = "altmeter_pro_override";
    pub const DEBUG_OVERRIDE: &str = "altmeter_debug_mode";
    pub const EXTERNAL_SERVICE_NOTICE_DISMISSED: &str =
        "altmeter_external_service_notice_dismissed";
    pub const WELCOME_DISMISSED: &str = "altmeter_welcome_dismissed";
    pub const FEEDBACK_DISMISSED: &str = "altmeter_feedback_dismissed";
    pub const LOW_CREDITS_DISMISSED: &str = "altmeter_low_credits_dismissed";

    /// Options deleted on uninstall.
    pub const OPTIONS: &[&str] = &[
        SITE_ID,
        USER_EMAIL,
        ACTIVATION_TIME,
        LAST_HEARTBEAT,
        PRO_OVERRIDE,
        DEBUG_OVERRIDE,
        EXTERNAL_SERVICE_NOTICE_DISMISSED,
        WELCOME_DISMISSED,
        FEEDBACK_DISMISSED,
        LOW_CREDITS_DISMISSED,
    ];

    pub fn pro_status(site_id: &str) -> String {
        format!("altmeter_pro_status_{site_id}")
    }

    pub fn monthly_usage(site_id: &str) -> String {
        format!("altmeter_monthly_usage_{site_id}")
    }

    pub fn billing_cycle(site_id: &str) -> String {
        format!("altmeter_billing_cycle_{site_id}")
    }

    pub fn rate_limit(caller: &str) -> String {
        format!("altmeter_rate_limit_{caller}")
    }
}

/// Abstract storage for options and transients.
#[async_trait]
pub trait SettingsStore: Send + Sync + std::fmt::Debug {
    /// Fetch a live value. Expired transients read as `None`.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write a value; `ttl = None` stores it without expiry.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Delete every key starting with `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError>;
}

/// Read a string option, treating non-string values as absent.
pub async fn get_string(store: &dyn SettingsStore, key: &str) -> Result<Option<String>, StoreError> {
    Ok(store.get(key).await?.and_then(|v| v.as_str().map(str::to_owned)))
}

/// Read a `"yes"` flag option.
pub async fn get_flag(store: &dyn SettingsStore, key: &str) -> Result<bool, StoreError> {
    Ok(get_string(store, key).await?.is_some_and(|v| v == "yes"))
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory settings store. Clones share the same map.
#[derive(Debug, Clone)]
pub struct InMemorySettingsStore {
    data: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemorySettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Expiry is evaluated against `clock`.
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self { data: Arc::new(Mutex::new(HashMap::new())), clock: Arc::new(clock) }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        guard.values().filter(|e| e.expires_at.map_or(true, |at| at > now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        let guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = guard
            .iter()
            .filter(|(_, e)| e.expires_at.map_or(true, |at| at > now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let now = self.clock.now();
        let mut guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.get(key) {
            Some(entry) if entry.expires_at.is_some_and(|at| at <= now) => {
                guard.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    /// Also drops every expired entry, so keys that are never read again do
    /// not accumulate.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = self.clock.now();
        let expires_at = match ttl {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|e| StoreError::Backend(format!("ttl out of range: {e}")))?;
                Some(now + ttl)
            }
            None => None,
        };
        let mut guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        guard.retain(|_, e| e.expires_at.map_or(true, |at| at > now));
        guard.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let mut guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        guard.retain(|k, _| !k.starts_with(prefix));
        Ok(before - guard.len())
    }
}
