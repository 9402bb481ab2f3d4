//! Monthly usage counter, billing-cycle resolution and the usage mutator.
//!
//! The account service owns the counter. Locally it is only mirrored through a
//! short TTL cache and invalidated after anything that changes it; there is no
//! local arithmetic.

use crate::billing::{self, BillingCycle};
use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::config::MeterConfig;
use crate::remote::AccountService;
use crate::store::keys;
use crate::timeout::bounded;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct UsageMeter {
    account: Arc<dyn AccountService>,
    cache: TtlCache,
    clock: Arc<dyn Clock>,
    config: Arc<MeterConfig>,
}

impl UsageMeter {
    pub fn new(
        account: Arc<dyn AccountService>,
        cache: TtlCache,
        clock: Arc<dyn Clock>,
        config: Arc<MeterConfig>,
    ) -> Self {
        Self { account, cache, clock, config }
    }

    /// Generations used in the current cycle.
    ///
    /// Zero when the site has no id or the account service cannot be reached.
    /// A failed lookup is not cached, so the next read tries again.
    pub async fn monthly_usage(&self, site_id: Option<&str>) -> u64 {
        let Some(site_id) = site_id else {
            return 0;
        };
        self.cache
            .get_or_try_fetch(&keys::monthly_usage(site_id), self.config.cache.usage(), || async {
                let lookup = bounded(
                    "usage",
                    self.config.timeouts.status(),
                    self.account.usage_count(site_id),
                )
                .await;
                match lookup {
                    Ok(count) => Some(count),
                    Err(e) => {
                        tracing::warn!(site_id, error = %e, "usage lookup failed; reporting zero");
                        None
                    }
                }
            })
            .await
            .unwrap_or(0)
    }

    /// Billing cycle containing "now", or `None` when the signup date is
    /// unknown.
    ///
    /// The cycle is cached; a cached cycle that no longer contains "now" is
    /// rolled forward from its signup date without another remote call.
    pub async fn billing_cycle(&self, site_id: Option<&str>) -> Option<BillingCycle> {
        let site_id = site_id?;
        let key = keys::billing_cycle(site_id);
        let ttl = self.config.cache.billing_cycle();
        let now = self.clock.now();

        if let Some(cached) = self.cache.get::<BillingCycle>(&key).await {
            if cached.contains(now) {
                return Some(cached);
            }
            let rolled = BillingCycle::compute(cached.signup_date, now);
            self.cache.put(&key, &rolled, ttl).await;
            return Some(rolled);
        }

        let signup = self.signup_date(site_id).await?;
        let cycle = BillingCycle::compute(signup, now);
        self.cache.put(&key, &cycle, ttl).await;
        Some(cycle)
    }

    pub async fn next_reset(&self, site_id: Option<&str>) -> Option<DateTime<Utc>> {
        self.billing_cycle(site_id).await.map(|c| c.next_reset)
    }

    /// Handle for invalidating the cached counter.
    pub fn mutator(&self) -> UsageMutator {
        UsageMutator { cache: self.cache.clone() }
    }

    async fn signup_date(&self, site_id: &str) -> Option<DateTime<Utc>> {
        let info = match bounded("settings", self.config.timeouts.status(), self.account.site_info(site_id)).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(site_id, error = %e, "signup date lookup failed");
                return None;
            }
        };
        let raw = info.created_at?;
        let parsed = billing::parse_signup(&raw);
        if parsed.is_none() {
            tracing::warn!(site_id, created_at = %raw, "unparseable signup date");
        }
        parsed
    }
}

/// Clears the cached usage counter after a generation or a clear.
#[derive(Debug, Clone)]
pub struct UsageMutator {
    cache: TtlCache,
}

impl UsageMutator {
    pub fn new(cache: TtlCache) -> Self {
        Self { cache }
    }

    pub async fn invalidate(&self, site_id: &str) {
        tracing::debug!(site_id, "invalidating usage cache");
        self.cache.invalidate(&keys::monthly_usage(site_id)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::RemoteError;
    use crate::remote::{LifecycleEvent, Limits, Registration, SiteInfo};
    use crate::store::InMemorySettingsStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Counter {
        usage: AtomicU64,
        down: AtomicBool,
        usage_calls: AtomicUsize,
        info_calls: AtomicUsize,
        created_at: Option<String>,
    }

    #[async_trait]
    impl AccountService for Counter {
        async fn site_info(&self, _: &str) -> Result<SiteInfo, RemoteError> {
            self.info_calls.fetch_add(1, Ordering::SeqCst);
            Ok(SiteInfo { pro_status: None, created_at: self.created_at.clone() })
        }
        async fn limits(&self, _: &str) -> Result<Limits, RemoteError> {
            Ok(Limits::fallback(15))
        }
        async fn debug_mode(&self) -> Result<bool, RemoteError> {
            Ok(false)
        }
        async fn usage_count(&self, _: &str) -> Result<u64, RemoteError> {
            self.usage_calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(RemoteError::Timeout { endpoint: "usage", timeout: Duration::from_secs(5) });
            }
            Ok(self.usage.load(Ordering::SeqCst))
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

    fn meter(account: Arc<Counter>, clock: ManualClock) -> UsageMeter {
        let store = Arc::new(InMemorySettingsStore::with_clock(clock.clone()));
        UsageMeter::new(account, TtlCache::new(store), Arc::new(clock), Arc::new(MeterConfig::default()))
    }

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 4, 15, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn usage_is_cached_until_invalidated() {
        let account = Arc::new(Counter::default());
        account.usage.store(4, Ordering::SeqCst);
        let meter = meter(account.clone(), clock());

        assert_eq!(meter.monthly_usage(Some("s1")).await, 4);
        account.usage.store(5, Ordering::SeqCst);
        assert_eq!(meter.monthly_usage(Some("s1")).await, 4, "served from cache");
        assert_eq!(account.usage_calls.load(Ordering::SeqCst), 1);

        meter.mutator().invalidate("s1").await;
        assert_eq!(meter.monthly_usage(Some("s1")).await, 5);
        assert_eq!(account.usage_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn usage_expires_after_ttl() {
        let account = Arc::new(Counter::default());
        let clock = clock();
        let meter = meter(account.clone(), clock.clone());
        meter.monthly_usage(Some("s1")).await;
        clock.advance(Duration::from_secs(301));
        meter.monthly_usage(Some("s1")).await;
        assert_eq!(account.usage_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_usage_lookup_is_zero_and_not_cached() {
        let account = Arc::new(Counter::default());
        account.down.store(true, Ordering::SeqCst);
        account.usage.store(9, Ordering::SeqCst);
        let meter = meter(account.clone(), clock());

        assert_eq!(meter.monthly_usage(Some("s1")).await, 0);
        account.down.store(false, Ordering::SeqCst);
        assert_eq!(meter.monthly_usage(Some("s1")).await, 9);
    }

    #[tokio::test]
    async fn no_site_id_means_zero_usage_and_no_cycle() {
        let account = Arc::new(Counter::default());
        let meter = meter(account.clone(), clock());
        assert_eq!(meter.monthly_usage(None).await, 0);
        assert_eq!(meter.billing_cycle(None).await, None);
        assert_eq!(account.usage_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn billing_cycle_is_cached_and_rolled_forward() {
        let account = Arc::new(Counter { created_at: Some("2023-01-31 08:00:00".into()), ..Default::default() });
        let clock = clock();
        let meter = meter(account.clone(), clock.clone());

        let cycle = meter.billing_cycle(Some("s1")).await.unwrap();
        assert_eq!(cycle.reset_day, 30);
        assert_eq!(cycle.next_reset, Utc.with_ymd_and_hms(2024, 4, 30, 0, 0, 0).unwrap());
        meter.billing_cycle(Some("s1")).await;
        assert_eq!(account.info_calls.load(Ordering::SeqCst), 1);

        clock.set(Utc.with_ymd_and_hms(2024, 4, 30, 0, 30, 0).unwrap());
        let next = meter.next_reset(Some("s1")).await.unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap());
        assert_eq!(account.info_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_signup_date_yields_no_cycle() {
        let account = Arc::new(Counter { created_at: Some("soon".into()), ..Default::default() });
        let meter = meter(account, clock());
        assert_eq!(meter.billing_cycle(Some("s1")).await, None);
    }
}
