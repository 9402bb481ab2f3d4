//! Per-caller rate limiting for the generation entry points.
//!
//! - [`RateLimiter`]: the decision interface the orchestrator consults.
//! - [`Decision`]: result of a check (allowed / denied).
//! - [`strategies::SlidingWindow`]: rolling-window counter.
//! - [`store::HitStore`]: where hit timestamps live, either in memory or in the
//!   host settings store as a transient.

use crate::error::StoreError;
use std::time::Duration;

pub mod store;
pub mod strategies;

pub use store::{HitStore, InMemoryHitStore, SettingsHitStore};
pub use strategies::SlidingWindow;

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allowed {
        /// Requests left in the current window after this one.
        remaining: u32,
    },
    /// The request is refused.
    Denied {
        /// How long until the oldest hit leaves the window.
        wait: Duration,
        reason: String,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Core interface for rate limiting logic.
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync + std::fmt::Debug {
    /// Record one request for `caller` if it fits in the limit.
    async fn acquire(&self, caller: &str) -> Result<Decision, StoreError>;
}
