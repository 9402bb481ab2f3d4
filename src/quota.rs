//! Quota guard: usage against limits.
//!
//! Decisions are taken on a [`QuotaSnapshot`] so the usage counter cannot move
//! between the check and the decision inside one operation.

use crate::context::RequestScope;
use crate::entitlement::EntitlementCache;
use crate::remote::Limits;
use crate::usage::UsageMeter;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Generations left in the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Limited(u64),
    Unlimited,
}

impl Remaining {
    pub fn is_exhausted(self) -> bool {
        self == Remaining::Limited(0)
    }

    /// The finite count, if any.
    pub fn count(self) -> Option<u64> {
        match self {
            Remaining::Limited(n) => Some(n),
            Remaining::Unlimited => None,
        }
    }
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remaining::Limited(n) => write!(f, "{n}"),
            Remaining::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// Serialized as a number, or the string `"unlimited"`.
impl Serialize for Remaining {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Remaining::Limited(n) => serializer.serialize_u64(*n),
            Remaining::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

/// `max(0, limit - usage)`; a limit of `-1` is unlimited.
pub fn remaining_for(usage: u64, limit: i64) -> Remaining {
    if limit == Limits::UNLIMITED {
        return Remaining::Unlimited;
    }
    let limit = u64::try_from(limit).unwrap_or(0);
    Remaining::Limited(limit.saturating_sub(usage))
}

/// Usage and limits read together for one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    pub usage: u64,
    pub limits: Limits,
}

impl QuotaSnapshot {
    pub fn new(usage: u64, limits: Limits) -> Self {
        Self { usage, limits }
    }

    /// Whether one more generation is permitted.
    pub fn allows(&self) -> bool {
        if self.limits.is_unlimited() {
            return true;
        }
        u64::try_from(self.limits.current_limit).is_ok_and(|limit| self.usage < limit)
    }

    pub fn remaining(&self) -> Remaining {
        remaining_for(self.usage, self.limits.current_limit)
    }
}

#[derive(Debug, Clone)]
pub struct QuotaGuard {
    entitlement: Arc<EntitlementCache>,
    usage: Arc<UsageMeter>,
}

impl QuotaGuard {
    pub fn new(entitlement: Arc<EntitlementCache>, usage: Arc<UsageMeter>) -> Self {
        Self { entitlement, usage }
    }

    /// Read usage (cached) and limits (memoized in `scope`).
    pub async fn snapshot(&self, scope: &RequestScope, site_id: Option<&str>) -> QuotaSnapshot {
        let limits = self.entitlement.limits(scope, site_id).await;
        let usage = self.usage.monthly_usage(site_id).await;
        QuotaSnapshot::new(usage, limits)
    }

    pub async fn can_generate(&self, scope: &RequestScope, site_id: Option<&str>) -> bool {
        self.snapshot(scope, site_id).await.allows()
    }

    pub async fn remaining(&self, scope: &RequestScope, site_id: Option<&str>) -> Remaining {
        self.snapshot(scope, site_id).await.remaining()
    }
}
