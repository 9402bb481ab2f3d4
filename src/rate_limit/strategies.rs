use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::error::StoreError;
use crate::rate_limit::store::HitStore;
use crate::rate_limit::{Decision, RateLimiter};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A sliding-window rate limiter.
///
/// Allows at most `max_requests` per caller within any rolling `window`. Hits
/// older than the window are pruned on every check.
#[derive(Debug, Clone)]
pub struct SlidingWindow<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    max_requests: u32,
    window: Duration,
}

impl<S> SlidingWindow<S>
where
    S: HitStore + 'static,
{
    pub fn new(store: S, max_requests: u32, window: Duration) -> Self {
        Self { store: Arc::new(store), clock: Arc::new(SystemClock), max_requests, window }
    }

    pub fn from_config(store: S, config: &RateLimitConfig) -> Self {
        Self::new(store, config.max_requests, config.window())
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }
}

#[async_trait]
impl<S> RateLimiter for SlidingWindow<S>
where
    S: HitStore + 'static,
{
    async fn acquire(&self, caller: &str) -> Result<Decision, StoreError> {
        let now = self.clock.now_millis();
        let window = self.window_millis();
        let mut hits = self.store.load(caller).await?;
        hits.retain(|&t| t <= now && now - t < window);

        let used = u32::try_from(hits.len()).unwrap_or(u32::MAX);
        if used >= self.max_requests {
            let oldest = hits.iter().copied().min().unwrap_or(now);
            let wait = Duration::from_millis((oldest + window).saturating_sub(now));
            return Ok(Decision::Denied { wait, reason: "sliding_window_full".into() });
        }

        hits.push(now);
        self.store.save(caller, &hits, self.window).await?;
        Ok(Decision::Allowed { remaining: self.max_requests - used - 1 })
    }
}
