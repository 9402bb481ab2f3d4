//! Site identity and its lifecycle with the account service.
//!
//! The site id is created once at activation: kept if one is already stored,
//! otherwise recovered from a previous registration under the same site URL,
//! otherwise freshly generated. It is only removed by [`SiteManager::uninstall`].

use crate::clock::Clock;
use crate::config::MeterConfig;
use crate::detached::spawn_detached;
use crate::error::{RemoteError, StoreError};
use crate::remote::{AccountService, EventType, LifecycleEvent, Registration};
use crate::store::{self, keys, SettingsStore};
use crate::timeout::bounded;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Facts about the host installation sent along with registrations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostInfo {
    pub site_url: String,
    pub host_version: String,
}

/// Where the site id came from on activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdSource {
    Existing,
    Recovered,
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Activation {
    pub site_id: String,
    pub source: IdSource,
}

/// What uninstall removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UninstallReport {
    /// The uninstall event reached the account service.
    pub event_sent: bool,
    pub options_deleted: usize,
    /// Remaining prefixed entries (transients) swept after the options.
    pub transients_deleted: usize,
}

#[derive(Debug, Clone)]
pub struct SiteManager {
    account: Arc<dyn AccountService>,
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    config: Arc<MeterConfig>,
    host: HostInfo,
}

impl SiteManager {
    pub fn new(
        account: Arc<dyn AccountService>,
        settings: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
        config: Arc<MeterConfig>,
        host: HostInfo,
    ) -> Self {
        Self { account, settings, clock, config, host }
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    /// Stored site id, if any. Read failures count as "no id".
    pub async fn site_id(&self) -> Option<String> {
        match store::get_string(self.settings.as_ref(), keys::SITE_ID).await {
            Ok(id) => id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "site id read failed");
                None
            }
        }
    }

    pub async fn email(&self) -> String {
        store::get_string(self.settings.as_ref(), keys::USER_EMAIL).await.ok().flatten().unwrap_or_default()
    }

    pub async fn set_email(&self, email: &str) -> Result<(), StoreError> {
        self.settings.set(keys::USER_EMAIL, Value::from(email.trim()), None).await
    }

    /// Resolve and persist the site id, then register and announce the
    /// activation in the background.
    pub async fn activate(&self) -> Result<Activation, StoreError> {
        let now = self.clock.now().timestamp();
        self.settings.set(keys::ACTIVATION_TIME, Value::from(now), None).await?;

        let activation = match self.site_id().await {
            Some(site_id) => Activation { site_id, source: IdSource::Existing },
            None => {
                let activation = match self.recover_site_id().await {
                    Some(site_id) => Activation { site_id, source: IdSource::Recovered },
                    None => Activation {
                        site_id: uuid::Uuid::new_v4().to_string(),
                        source: IdSource::Generated,
                    },
                };
                self.settings.set(keys::SITE_ID, Value::from(activation.site_id.as_str()), None).await?;
                activation
            }
        };
        tracing::info!(site_id = %activation.site_id, source = ?activation.source, "site activated");

        let registration = self.registration(&activation.site_id).await;
        let account = self.account.clone();
        let timeout = self.config.timeouts.registration();
        spawn_detached("register", async move {
            bounded("register", timeout, account.register(&registration)).await
        });
        self.track(&activation.site_id, EventType::Activation);
        Ok(activation)
    }

    pub async fn deactivate(&self) {
        if let Some(site_id) = self.site_id().await {
            self.track(&site_id, EventType::Deactivation);
        }
    }

    /// One awaited registration attempt, used when the account service reports
    /// the site as unknown.
    pub async fn reregister(&self, site_id: &str) -> Result<(), RemoteError> {
        let registration = self.registration(site_id).await;
        bounded("register", self.config.timeouts.registration(), self.account.register(&registration)).await
    }

    /// Send a detached heartbeat when the last one is older than the configured
    /// interval. Returns whether one was sent.
    pub async fn heartbeat_if_due(&self) -> bool {
        let Some(site_id) = self.site_id().await else {
            return false;
        };
        let now = self.clock.now().timestamp();
        let last = match self.settings.get(keys::LAST_HEARTBEAT).await {
            Ok(v) => v.and_then(|v| v.as_i64()),
            Err(e) => {
                tracing::warn!(error = %e, "heartbeat timestamp read failed");
                return false;
            }
        };
        let interval = i64::try_from(self.config.heartbeat_interval_secs).unwrap_or(i64::MAX);
        if last.is_some_and(|last| now.saturating_sub(last) < interval) {
            return false;
        }
        if let Err(e) = self.settings.set(keys::LAST_HEARTBEAT, Value::from(now), None).await {
            tracing::warn!(error = %e, "heartbeat timestamp write failed; skipping heartbeat");
            return false;
        }

        let registration = self.registration(&site_id).await;
        let account = self.account.clone();
        let timeout = self.config.timeouts.registration();
        spawn_detached("heartbeat", async move {
            bounded("register", timeout, account.heartbeat(&registration)).await
        });
        true
    }

    /// Fire a detached lifecycle event.
    pub fn track(&self, site_id: &str, event_type: EventType) {
        let event = self.event(site_id, event_type);
        let account = self.account.clone();
        let timeout = self.config.timeouts.event();
        spawn_detached("track_event", async move {
            bounded("track_event", timeout, account.track_event(&event)).await
        });
    }

    /// Send a blocking uninstall event, then delete every option and transient
    /// this crate owns. Alt texts on images are left alone.
    pub async fn uninstall(&self) -> UninstallReport {
        let mut report = UninstallReport::default();

        if let Some(site_id) = self.site_id().await {
            let event = self.event(&site_id, EventType::Uninstall);
            match bounded("track_event", self.config.timeouts.event(), self.account.track_event(&event)).await {
                Ok(()) => report.event_sent = true,
                Err(e) => tracing::warn!(site_id = %site_id, error = %e, "uninstall event failed"),
            }
        }

        for key in keys::OPTIONS {
            let existed = matches!(self.settings.get(key).await, Ok(Some(_)));
            match self.settings.delete(key).await {
                Ok(()) if existed => report.options_deleted += 1,
                Ok(()) => {}
                Err(e) => tracing::warn!(key, error = %e, "option delete failed"),
            }
        }
        match self.settings.delete_prefix(keys::PREFIX).await {
            Ok(n) => report.transients_deleted = n,
            Err(e) => tracing::warn!(error = %e, "transient sweep failed"),
        }
        tracing::info!(?report, "uninstall cleanup finished");
        report
    }

    async fn recover_site_id(&self) -> Option<String> {
        let lookup = bounded(
            "register",
            self.config.timeouts.registration(),
            self.account.lookup_site(&self.host.site_url),
        )
        .await;
        match lookup {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(site_url = %self.host.site_url, error = %e, "site lookup failed");
                None
            }
        }
    }

    async fn registration(&self, site_id: &str) -> Registration {
        Registration {
            site_id: site_id.to_string(),
            site_url: self.host.site_url.clone(),
            email: self.email().await,
            host_version: self.host.host_version.clone(),
            plugin_version: self.config.plugin_version.clone(),
        }
    }

    fn event(&self, site_id: &str, event_type: EventType) -> LifecycleEvent {
        LifecycleEvent {
            site_id: site_id.to_string(),
            event_type,
            site_url: self.host.site_url.clone(),
            plugin_version: self.config.plugin_version.clone(),
            timestamp: self.clock.now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}
