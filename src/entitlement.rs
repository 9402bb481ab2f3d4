//! Entitlement cache: pro/free status, quota limits and debug mode.
//!
//! Resolution order for pro status:
//!
//! 1. local override option (`"yes"` forces pro, no remote call),
//! 2. the shared TTL cache, unless the request asked to bypass it,
//! 3. the account service, bounded by the status timeout.
//!
//! Every failure resolves to the free tier. The override is the only way this
//! module ever answers "pro" without the account service saying so.

use crate::cache::TtlCache;
use crate::config::MeterConfig;
use crate::context::{RequestContext, RequestScope};
use crate::error::StoreError;
use crate::remote::{AccountService, Limits};
use crate::store::{self, keys};
use crate::timeout::bounded;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Resolved entitlement tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProStatus {
    Pro,
    Free,
}

impl ProStatus {
    pub fn is_pro(self) -> bool {
        self == ProStatus::Pro
    }

    fn from_remote(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("pro") => ProStatus::Pro,
            _ => ProStatus::Free,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntitlementCache {
    account: Arc<dyn AccountService>,
    cache: TtlCache,
    config: Arc<MeterConfig>,
}

impl EntitlementCache {
    pub fn new(account: Arc<dyn AccountService>, cache: TtlCache, config: Arc<MeterConfig>) -> Self {
        Self { account, cache, config }
    }

    /// Pro or free for `site_id`. A missing site id is free.
    pub async fn pro_status(&self, site_id: Option<&str>, ctx: &RequestContext) -> ProStatus {
        if self.override_enabled(keys::PRO_OVERRIDE).await {
            tracing::debug!("pro override active");
            return ProStatus::Pro;
        }
        let Some(site_id) = site_id else {
            return ProStatus::Free;
        };

        let ttl = self.config.cache.pro_status(ctx.is_developer);
        self.cache
            .get_or_fetch(&keys::pro_status(site_id), ttl, ctx.bypass_cache, || async {
                let lookup = bounded(
                    "settings",
                    self.config.timeouts.status(),
                    self.account.site_info(site_id),
                )
                .await;
                match lookup {
                    Ok(info) => ProStatus::from_remote(info.pro_status.as_deref()),
                    Err(e) => {
                        tracing::warn!(site_id, error = %e, "pro status lookup failed; assuming free");
                        ProStatus::Free
                    }
                }
            })
            .await
    }

    pub async fn is_pro(&self, site_id: Option<&str>, ctx: &RequestContext) -> bool {
        self.pro_status(site_id, ctx).await.is_pro()
    }

    /// Quota limits, fetched at most once per [`RequestScope`].
    pub async fn limits(&self, scope: &RequestScope, site_id: Option<&str>) -> Limits {
        scope
            .limits_cell()
            .get_or_init(|| self.fetch_limits(site_id))
            .await
            .clone()
    }

    async fn fetch_limits(&self, site_id: Option<&str>) -> Limits {
        let fallback = Limits::fallback(self.config.quota.fallback_limit);
        let Some(site_id) = site_id else {
            return fallback;
        };
        match bounded("settings", self.config.timeouts.status(), self.account.limits(site_id)).await {
            Ok(limits) => limits,
            Err(e) => {
                tracing::warn!(site_id, error = %e, "limits lookup failed; using fallback");
                fallback
            }
        }
    }

    /// Drop the cached pro status so the next read asks the account service.
    pub async fn invalidate_pro_status(&self, site_id: &str) {
        self.cache.invalidate(&keys::pro_status(site_id)).await;
    }

    /// Debug mode is only honoured for the vendor's own sites. The local option
    /// wins; otherwise the account service decides. Memoized per request.
    pub async fn is_debug_mode(&self, scope: &RequestScope, site_url: &str) -> bool {
        if !site_url.contains(self.config.debug_host.as_str()) {
            return false;
        }
        *scope
            .debug_cell()
            .get_or_init(|| async {
                if self.override_enabled(keys::DEBUG_OVERRIDE).await {
                    return true;
                }
                bounded("settings", self.config.timeouts.status(), self.account.debug_mode())
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "debug mode lookup failed");
                        false
                    })
            })
            .await
    }

    /// Turn the local pro override on or off.
    pub async fn set_pro_override(&self, enabled: bool) -> Result<(), StoreError> {
        let value = if enabled { "yes" } else { "no" };
        self.cache.store().set(keys::PRO_OVERRIDE, Value::from(value), None).await
    }

    async fn override_enabled(&self, key: &str) -> bool {
        store::get_flag(self.cache.store().as_ref(), key).await.unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "override read failed");
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::remote::{LifecycleEvent, Registration, SiteInfo};
    use crate::clock::ManualClock;
    use crate::store::InMemorySettingsStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Scripted {
        pro_status: Mutex<Option<Result<SiteInfo, RemoteError>>>,
        limits: Mutex<Option<Result<Limits, RemoteError>>>,
        debug: bool,
        site_info_calls: AtomicUsize,
        limits_calls: AtomicUsize,
        debug_calls: AtomicUsize,
    }

    fn unavailable() -> RemoteError {
        RemoteError::Transport { endpoint: "settings", message: "unreachable".into() }
    }

    #[async_trait]
    impl AccountService for Scripted {
        async fn site_info(&self, _: &str) -> Result<SiteInfo, RemoteError> {
            self.site_info_calls.fetch_add(1, Ordering::SeqCst);
            self.pro_status.lock().unwrap().clone().unwrap_or_else(|| Err(unavailable()))
        }
        async fn limits(&self, _: &str) -> Result<Limits, RemoteError> {
            self.limits_calls.fetch_add(1, Ordering::SeqCst);
            self.limits.lock().unwrap().clone().unwrap_or_else(|| Err(unavailable()))
        }
        async fn debug_mode(&self) -> Result<bool, RemoteError> {
            self.debug_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.debug)
        }
        async fn usage_count(&self, _: &str) -> Result<u64, RemoteError> {
            Ok(0)
        }
        async fn register(&self, _: &Registration) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn lookup_site(&self, _: &str) -> Result<Option<String>, RemoteError> {
            Ok(None)
        }
        async fn heartbeat(&self, _: &Registration) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn track_event(&self, _: &LifecycleEvent) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn clear_usage(&self, _: &str, _: &str) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    fn pro_info() -> Result<SiteInfo, RemoteError> {
        Ok(SiteInfo { pro_status: Some("pro".into()), created_at: None })
    }

    fn entitlement(account: Arc<Scripted>) -> EntitlementCache {
        let store = Arc::new(InMemorySettingsStore::new());
        EntitlementCache::new(account, TtlCache::new(store), Arc::new(MeterConfig::default()))
    }

    #[tokio::test]
    async fn remote_pro_is_cached() {
        let account = Arc::new(Scripted { pro_status: Mutex::new(Some(pro_info())), ..Default::default() });
        let ent = entitlement(account.clone());
        let ctx = RequestContext::default();
        assert_eq!(ent.pro_status(Some("s1"), &ctx).await, ProStatus::Pro);
        assert_eq!(ent.pro_status(Some("s1"), &ctx).await, ProStatus::Pro);
        assert_eq!(account.site_info_calls.load(Ordering::SeqCst), 1);

        ent.pro_status(Some("s1"), &ctx.with_bypass()).await;
        assert_eq!(account.site_info_calls.load(Ordering::SeqCst), 2);

        ent.invalidate_pro_status("s1").await;
        ent.pro_status(Some("s1"), &ctx).await;
        assert_eq!(account.site_info_calls.load(Ordering::SeqCst), 3);
    }

    fn clocked(account: Arc<Scripted>) -> (EntitlementCache, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap());
        let store = Arc::new(InMemorySettingsStore::with_clock(clock.clone()));
        let ent = EntitlementCache::new(account, TtlCache::new(store), Arc::new(MeterConfig::default()));
        (ent, clock)
    }

    #[tokio::test]
    async fn developer_status_goes_stale_after_five_seconds() {
        let account = Arc::new(Scripted { pro_status: Mutex::new(Some(pro_info())), ..Default::default() });
        let (ent, clock) = clocked(account.clone());
        let ctx = RequestContext::developer();

        ent.pro_status(Some("s1"), &ctx).await;
        clock.advance(Duration::from_secs(4));
        ent.pro_status(Some("s1"), &ctx).await;
        assert_eq!(account.site_info_calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(2));
        ent.pro_status(Some("s1"), &ctx).await;
        assert_eq!(account.site_info_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn default_status_is_kept_for_thirty_seconds() {
        let account = Arc::new(Scripted { pro_status: Mutex::new(Some(pro_info())), ..Default::default() });
        let (ent, clock) = clocked(account.clone());
        let ctx = RequestContext::default();

        ent.pro_status(Some("s1"), &ctx).await;
        clock.advance(Duration::from_secs(6));
        assert_eq!(ent.pro_status(Some("s1"), &ctx).await, ProStatus::Pro);
        assert_eq!(account.site_info_calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(25));
        ent.pro_status(Some("s1"), &ctx).await;
        assert_eq!(account.site_info_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn remote_failure_is_free() {
        let account = Arc::new(Scripted::default());
        let ent = entitlement(account);
        assert!(!ent.is_pro(Some("s1"), &RequestContext::default()).await);
    }

    #[tokio::test]
    async fn missing_site_id_is_free_without_remote_call() {
        let account = Arc::new(Scripted { pro_status: Mutex::new(Some(pro_info())), ..Default::default() });
        let ent = entitlement(account.clone());
        assert_eq!(ent.pro_status(None, &RequestContext::default()).await, ProStatus::Free);
        assert_eq!(account.site_info_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn override_wins_over_remote() {
        let account = Arc::new(Scripted::default());
        let ent = entitlement(account.clone());
        ent.set_pro_override(true).await.unwrap();
        assert!(ent.is_pro(Some("s1"), &RequestContext::default()).await);
        assert_eq!(account.site_info_calls.load(Ordering::SeqCst), 0);

        ent.set_pro_override(false).await.unwrap();
        assert!(!ent.is_pro(Some("s1"), &RequestContext::default()).await);
    }

    #[tokio::test]
    async fn limits_are_memoized_per_scope() {
        let limits = Limits { current_limit: 100, plan: "pro".into(), is_pro: true };
        let account = Arc::new(Scripted { limits: Mutex::new(Some(Ok(limits.clone()))), ..Default::default() });
        let ent = entitlement(account.clone());

        let scope = RequestScope::default();
        assert_eq!(ent.limits(&scope, Some("s1")).await, limits);
        assert_eq!(ent.limits(&scope, Some("s1")).await, limits);
        assert_eq!(account.limits_calls.load(Ordering::SeqCst), 1);

        ent.limits(&RequestScope::default(), Some("s1")).await;
        assert_eq!(account.limits_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn limits_fall_back_to_free_tier() {
        let ent = entitlement(Arc::new(Scripted::default()));
        let limits = ent.limits(&RequestScope::default(), Some("s1")).await;
        assert_eq!(limits, Limits::fallback(15));
    }

    #[tokio::test]
    async fn debug_mode_only_on_vendor_host() {
        let account = Arc::new(Scripted { debug: true, ..Default::default() });
        let ent = entitlement(account.clone());
        let scope = RequestScope::default();
        assert!(!ent.is_debug_mode(&scope, "https://blog.example.test").await);
        assert_eq!(account.debug_calls.load(Ordering::SeqCst), 0);

        assert!(ent.is_debug_mode(&scope, "https://hatrixsolutions.com").await);
        assert!(ent.is_debug_mode(&scope, "https://hatrixsolutions.com").await);
        assert_eq!(account.debug_calls.load(Ordering::SeqCst), 1);
    }
}
