//! Runtime configuration.
//!
//! Every field has a default, so an empty TOML document yields the production
//! settings:
//!
//! ```rust
//! use altmeter::config::MeterConfig;
//! use std::time::Duration;
//!
//! let cfg = MeterConfig::from_toml_str(r#"
//!     bulk_batch_size = 10
//!
//!     [rate_limit]
//!     max_requests = 30
//! "#).unwrap();
//! assert_eq!(cfg.bulk_batch_size, 10);
//! assert_eq!(cfg.rate_limit.max_requests, 30);
//! assert_eq!(cfg.timeouts.generation(), Duration::from_secs(30));
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_API_BASE: &str =
    "https://hatrixsolutions.com/api/hs-auto-alt-text-generator-for-seo";

/// Top-level configuration for the meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Base URL every endpoint path is joined onto.
    pub api_base: String,
    pub endpoints: Endpoints,
    pub timeouts: Timeouts,
    pub cache: CacheTtls,
    pub quota: QuotaDefaults,
    pub rate_limit: RateLimitConfig,
    /// Candidate images fetched per bulk call.
    pub bulk_batch_size: usize,
    /// Minimum spacing between heartbeats, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Debug mode only applies to sites whose URL contains this host.
    pub debug_host: String,
    pub plugin_version: String,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            endpoints: Endpoints::default(),
            timeouts: Timeouts::default(),
            cache: CacheTtls::default(),
            quota: QuotaDefaults::default(),
            rate_limit: RateLimitConfig::default(),
            bulk_batch_size: 2,
            heartbeat_interval_secs: 24 * 60 * 60,
            debug_host: "hatrixsolutions.com".to_string(),
            plugin_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl MeterConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make the meter misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base.trim().is_empty() {
            return Err(invalid("api_base", "must not be empty"));
        }
        if self.bulk_batch_size == 0 {
            return Err(invalid("bulk_batch_size", "must be at least 1"));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(invalid("rate_limit.max_requests", "must be at least 1"));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(invalid("rate_limit.window_secs", "must be non-zero"));
        }
        self.timeouts.validate()?;
        Ok(())
    }

    /// Absolute URL for an endpoint path.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.to_string() }
}

/// Endpoint paths relative to `api_base`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub generate: String,
    pub settings: String,
    pub usage: String,
    pub clear_usage: String,
    pub register: String,
    pub track_event: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            generate: "generate-alt-tag.php".into(),
            settings: "dev-settings.php".into(),
            usage: "get-usage.php".into(),
            clear_usage: "clear-alt-usage.php".into(),
            register: "register-site.php".into(),
            track_event: "track-event.php".into(),
        }
    }
}

/// Per-call deadlines, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub status_secs: u64,
    pub generation_secs: u64,
    pub registration_secs: u64,
    pub event_secs: u64,
    pub clear_usage_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            status_secs: 5,
            generation_secs: 30,
            registration_secs: 10,
            event_secs: 5,
            clear_usage_secs: 15,
        }
    }
}

impl Timeouts {
    pub fn status(&self) -> Duration {
        Duration::from_secs(self.status_secs)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }

    pub fn registration(&self) -> Duration {
        Duration::from_secs(self.registration_secs)
    }

    pub fn event(&self) -> Duration {
        Duration::from_secs(self.event_secs)
    }

    pub fn clear_usage(&self) -> Duration {
        Duration::from_secs(self.clear_usage_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("timeouts.status_secs", self.status_secs),
            ("timeouts.generation_secs", self.generation_secs),
            ("timeouts.registration_secs", self.registration_secs),
            ("timeouts.event_secs", self.event_secs),
            ("timeouts.clear_usage_secs", self.clear_usage_secs),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(invalid(field, "timeout must be non-zero"));
            }
        }
        Ok(())
    }
}

/// Cache lifetimes, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
    pub pro_status_secs: u64,
    pub pro_status_developer_secs: u64,
    pub usage_secs: u64,
    pub billing_cycle_secs: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            pro_status_secs: 30,
            pro_status_developer_secs: 5,
            usage_secs: 5 * 60,
            billing_cycle_secs: 60 * 60,
        }
    }
}

impl CacheTtls {
    /// Pro-status lifetime, shorter for developer contexts.
    pub fn pro_status(&self, is_developer: bool) -> Duration {
        if is_developer {
            Duration::from_secs(self.pro_status_developer_secs)
        } else {
            Duration::from_secs(self.pro_status_secs)
        }
    }

    pub fn usage(&self) -> Duration {
        Duration::from_secs(self.usage_secs)
    }

    pub fn billing_cycle(&self) -> Duration {
        Duration::from_secs(self.billing_cycle_secs)
    }
}

/// Limits used when the account service cannot be consulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaDefaults {
    /// Monthly limit assumed when the remote limits lookup fails.
    pub fallback_limit: i64,
    /// Pro-tier allowance quoted in the free-tier denial message.
    pub upgrade_limit: i64,
}

impl Default for QuotaDefaults {
    fn default() -> Self {
        Self { fallback_limit: 15, upgrade_limit: 100 }
    }
}

/// Per-caller sliding window for generation entry points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_requests: 60, window_secs: 60 }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = MeterConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, MeterConfig::default());
        assert_eq!(cfg.timeouts.status(), Duration::from_secs(5));
        assert_eq!(cfg.timeouts.registration(), Duration::from_secs(10));
        assert_eq!(cfg.cache.pro_status(true), Duration::from_secs(5));
        assert_eq!(cfg.cache.pro_status(false), Duration::from_secs(30));
        assert_eq!(cfg.quota.fallback_limit, 15);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = MeterConfig::from_toml_str("[timeouts]\ngeneration_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("timeouts.generation_secs"));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(MeterConfig::from_toml_str("bulk_batch_size = 0").is_err());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = MeterConfig::from_toml_str("bulk_batch_size = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn url_joins_without_duplicate_slashes() {
        let cfg = MeterConfig { api_base: "https://api.example.test/v1/".into(), ..Default::default() };
        assert_eq!(cfg.url("/get-usage.php"), "https://api.example.test/v1/get-usage.php");
    }
}
