//! Contracts for the two remote collaborators: the account/entitlement service
//! and the alt-text generator, plus the payloads exchanged with them.

use crate::error::RemoteError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Quota limits resolved for a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Generations allowed per cycle; `-1` means unlimited.
    pub current_limit: i64,
    pub plan: String,
    pub is_pro: bool,
}

impl Limits {
    pub const UNLIMITED: i64 = -1;

    /// Free-tier limits used whenever the account service cannot answer.
    pub fn fallback(current_limit: i64) -> Self {
        Self { current_limit, plan: "free".to_string(), is_pro: false }
    }

    pub fn is_unlimited(&self) -> bool {
        self.current_limit == Self::UNLIMITED
    }
}

/// Site facts held by the account service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteInfo {
    #[serde(default)]
    pub pro_status: Option<String>,
    /// Signup timestamp as the service formats it.
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Body sent to the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    pub image_url: String,
    pub filename: String,
    pub site_id: String,
}

/// Site registration payload, also used for heartbeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub site_id: String,
    pub site_url: String,
    pub email: String,
    #[serde(rename = "wp_version")]
    pub host_version: String,
    pub plugin_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Activation,
    Deactivation,
    Uninstall,
    Heartbeat,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Activation => "activation",
            EventType::Deactivation => "deactivation",
            EventType::Uninstall => "uninstall",
            EventType::Heartbeat => "heartbeat",
        };
        f.write_str(name)
    }
}

/// Lifecycle event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEvent {
    pub site_id: String,
    pub event_type: EventType,
    pub site_url: String,
    pub plugin_version: String,
    /// UTC, formatted `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
}

/// The centralized account service: source of truth for entitlement, limits,
/// signup date and the monthly usage counter.
#[async_trait]
pub trait AccountService: Send + Sync + fmt::Debug {
    async fn site_info(&self, site_id: &str) -> Result<SiteInfo, RemoteError>;

    async fn limits(&self, site_id: &str) -> Result<Limits, RemoteError>;

    /// Whether the service has debug mode switched on.
    async fn debug_mode(&self) -> Result<bool, RemoteError>;

    async fn usage_count(&self, site_id: &str) -> Result<u64, RemoteError>;

    async fn register(&self, registration: &Registration) -> Result<(), RemoteError>;

    /// Site id previously registered under `site_url`, if any.
    async fn lookup_site(&self, site_url: &str) -> Result<Option<String>, RemoteError>;

    async fn heartbeat(&self, registration: &Registration) -> Result<(), RemoteError>;

    async fn track_event(&self, event: &LifecycleEvent) -> Result<(), RemoteError>;

    /// Remove the usage record for an image whose alt text was cleared.
    async fn clear_usage(&self, image_url: &str, site_id: &str) -> Result<(), RemoteError>;
}

/// The remote AI endpoint. Returns the raw alt text, which may be empty.
#[async_trait]
pub trait AltTextGenerator: Send + Sync + fmt::Debug {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, RemoteError>;
}
