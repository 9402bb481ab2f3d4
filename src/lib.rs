#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # altmeter
//!
//! Usage metering and entitlement resolution for an AI alt-text generator that
//! runs inside a CMS admin.
//!
//! ## Features
//!
//! - **Billing cycles** anchored to the signup day, clamped for short months
//! - **Entitlement cache** with a local pro override, bypass and per-context TTLs
//! - **Quota guard** deciding on one usage/limits snapshot per request
//! - **Orchestrator** for single and bulk generation, clear-alt and the overview
//! - **Per-caller rate limiting** over a sliding window
//! - **Telemetry** through `tower::Service` sinks
//!
//! Every remote call carries a hard deadline and every failure resolves to the
//! conservative answer: free tier, zero usage, fallback limits.
//!
//! ## Quick Start
//!
//! ```rust
//! use altmeter::billing::BillingCycle;
//! use altmeter::quota::{remaining_for, Remaining};
//! use chrono::{TimeZone, Utc};
//!
//! let signup = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
//! let now = Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap();
//! let cycle = BillingCycle::compute(signup, now);
//! assert!(cycle.contains(now));
//!
//! assert_eq!(remaining_for(12, 15), Remaining::Limited(3));
//! assert_eq!(remaining_for(99, -1), Remaining::Unlimited);
//! ```

pub mod billing;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod detached;
pub mod entitlement;
pub mod error;
pub mod http;
pub mod media;
pub mod orchestrator;
pub mod prelude;
pub mod quota;
pub mod rate_limit;
pub mod remote;
pub mod site;
pub mod store;
pub mod telemetry;
pub mod timeout;
pub mod usage;

// Re-exports
pub use billing::BillingCycle;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MeterConfig;
pub use context::{RequestContext, RequestScope};
pub use entitlement::{EntitlementCache, ProStatus};
pub use error::{ConfigError, MediaError, RemoteError, StoreError};
pub use orchestrator::{Caller, Orchestrator, OrchestratorBuilder};
pub use quota::{QuotaGuard, QuotaSnapshot, Remaining};
pub use remote::{AccountService, AltTextGenerator, Limits};
pub use timeout::TimeoutPolicy;
pub use usage::{UsageMeter, UsageMutator};
