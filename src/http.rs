//! HTTP implementations of [`AccountService`] and [`AltTextGenerator`] using
//! [`reqwest`].
//!
//! All endpoints speak JSON. Reads go out as `GET` with query parameters,
//! mutations as `POST` with a JSON body. A response is a failure when the
//! status is non-2xx or the body carries `"success": false`; either way the
//! `error` (or `message`) field becomes the error text.

use crate::config::MeterConfig;
use crate::error::RemoteError;
use crate::remote::{
    AccountService, AltTextGenerator, GenerationRequest, LifecycleEvent, Limits, Registration,
    SiteInfo,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const ENDPOINT_GENERATE: &str = "generate";
const ENDPOINT_SETTINGS: &str = "settings";
const ENDPOINT_USAGE: &str = "usage";
const ENDPOINT_CLEAR_USAGE: &str = "clear_usage";
const ENDPOINT_REGISTER: &str = "register";
const ENDPOINT_TRACK_EVENT: &str = "track_event";

/// Remote error code the account service uses for unknown sites.
const NOT_REGISTERED_CODE: &str = "site_not_registered";

/// HTTP client for the account service and the generator.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    config: Arc<MeterConfig>,
}

impl HttpBackend {
    /// Build a client with its own connection pool.
    pub fn new(config: MeterConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("altmeter/{}", config.plugin_version))
            .build()
            .map_err(|e| RemoteError::Transport { endpoint: "client", message: e.to_string() })?;
        Ok(Self::with_client(client, config))
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: MeterConfig) -> Self {
        Self { client, config: Arc::new(config) }
    }

    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    async fn get_json(
        &self,
        endpoint: &'static str,
        path: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Value, RemoteError> {
        let response = self
            .client
            .get(self.config.url(path))
            .query(query)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(endpoint, timeout, e))?;
        read_body(endpoint, timeout, response).await
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        endpoint: &'static str,
        path: &str,
        query: &[(&str, &str)],
        body: &B,
        timeout: Duration,
    ) -> Result<Value, RemoteError> {
        let response = self
            .client
            .post(self.config.url(path))
            .query(query)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(endpoint, timeout, e))?;
        read_body(endpoint, timeout, response).await
    }
}

fn transport_error(endpoint: &'static str, timeout: Duration, e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout { endpoint, timeout }
    } else {
        RemoteError::Transport { endpoint, message: e.to_string() }
    }
}

async fn read_body(
    endpoint: &'static str,
    timeout: Duration,
    response: reqwest::Response,
) -> Result<Value, RemoteError> {
    let status = response.status();
    let text = response.text().await.map_err(|e| transport_error(endpoint, timeout, e))?;
    let body: Option<Value> = serde_json::from_str(&text).ok();

    if !status.is_success() {
        if body.as_ref().is_some_and(is_not_registered) {
            return Err(RemoteError::SiteNotRegistered);
        }
        let message = body
            .as_ref()
            .and_then(error_message)
            .or_else(|| (!text.trim().is_empty()).then(|| text.trim().to_string()))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        return Err(RemoteError::Status { endpoint, status: status.as_u16(), message });
    }

    let body = body.ok_or_else(|| RemoteError::Decode {
        endpoint,
        message: "response body is not JSON".to_string(),
    })?;
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        if is_not_registered(&body) {
            return Err(RemoteError::SiteNotRegistered);
        }
        let message = error_message(&body).unwrap_or_else(|| "unknown error".to_string());
        return Err(RemoteError::Rejected { endpoint, message });
    }
    Ok(body)
}

fn error_message(body: &Value) -> Option<String> {
    ["error", "message"]
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_str))
        .map(str::to_owned)
}

fn is_not_registered(body: &Value) -> bool {
    if body.get("code").and_then(Value::as_str) == Some(NOT_REGISTERED_CODE) {
        return true;
    }
    error_message(body).is_some_and(|m| m.to_ascii_lowercase().contains("not registered"))
}

fn field<T: DeserializeOwned>(endpoint: &'static str, body: &Value, name: &str) -> Result<T, RemoteError> {
    let raw = body.get(name).cloned().ok_or_else(|| RemoteError::Decode {
        endpoint,
        message: format!("missing `{name}`"),
    })?;
    serde_json::from_value(raw)
        .map_err(|e| RemoteError::Decode { endpoint, message: format!("`{name}`: {e}") })
}

/// Accept counters sent either as numbers or numeric strings.
fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_i64().map(|v| v.max(0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl AccountService for HttpBackend {
    async fn site_info(&self, site_id: &str) -> Result<SiteInfo, RemoteError> {
        let cfg = &self.config;
        let body = self
            .get_json(
                ENDPOINT_SETTINGS,
                &cfg.endpoints.settings,
                &[("action", "get"), ("site_id", site_id)],
                cfg.timeouts.status(),
            )
            .await?;
        field(ENDPOINT_SETTINGS, &body, "site_info")
    }

    async fn limits(&self, site_id: &str) -> Result<Limits, RemoteError> {
        let cfg = &self.config;
        let body = self
            .get_json(
                ENDPOINT_SETTINGS,
                &cfg.endpoints.settings,
                &[("action", "get_limits"), ("site_id", site_id)],
                cfg.timeouts.status(),
            )
            .await?;
        field(ENDPOINT_SETTINGS, &body, "limits")
    }

    async fn debug_mode(&self) -> Result<bool, RemoteError> {
        let cfg = &self.config;
        let body = self
            .get_json(
                ENDPOINT_SETTINGS,
                &cfg.endpoints.settings,
                &[("action", "get_debug")],
                cfg.timeouts.status(),
            )
            .await?;
        Ok(body.get("debug_mode").and_then(Value::as_str) == Some("yes"))
    }

    async fn usage_count(&self, site_id: &str) -> Result<u64, RemoteError> {
        let cfg = &self.config;
        let body = self
            .get_json(
                ENDPOINT_USAGE,
                &cfg.endpoints.usage,
                &[("site_id", site_id)],
                cfg.timeouts.status(),
            )
            .await?;
        Ok(body.get("usage_count").and_then(lenient_u64).unwrap_or(0))
    }

    async fn register(&self, registration: &Registration) -> Result<(), RemoteError> {
        let cfg = &self.config;
        self.post_json(
            ENDPOINT_REGISTER,
            &cfg.endpoints.register,
            &[("action", "register")],
            registration,
            cfg.timeouts.registration(),
        )
        .await?;
        Ok(())
    }

    async fn lookup_site(&self, site_url: &str) -> Result<Option<String>, RemoteError> {
        let cfg = &self.config;
        let body = self
            .get_json(
                ENDPOINT_REGISTER,
                &cfg.endpoints.register,
                &[("action", "lookup"), ("site_url", site_url)],
                cfg.timeouts.registration(),
            )
            .await?;
        Ok(body
            .get("site_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_owned))
    }

    async fn heartbeat(&self, registration: &Registration) -> Result<(), RemoteError> {
        let cfg = &self.config;
        self.post_json(
            ENDPOINT_REGISTER,
            &cfg.endpoints.register,
            &[("action", "heartbeat")],
            registration,
            cfg.timeouts.registration(),
        )
        .await?;
        Ok(())
    }

    async fn track_event(&self, event: &LifecycleEvent) -> Result<(), RemoteError> {
        let cfg = &self.config;
        self.post_json(
            ENDPOINT_TRACK_EVENT,
            &cfg.endpoints.track_event,
            &[],
            event,
            cfg.timeouts.event(),
        )
        .await?;
        Ok(())
    }

    async fn clear_usage(&self, image_url: &str, site_id: &str) -> Result<(), RemoteError> {
        let cfg = &self.config;
        let body = serde_json::json!({ "image_url": image_url, "site_id": site_id });
        self.post_json(
            ENDPOINT_CLEAR_USAGE,
            &cfg.endpoints.clear_usage,
            &[],
            &body,
            cfg.timeouts.clear_usage(),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AltTextGenerator for HttpBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, RemoteError> {
        let cfg = &self.config;
        let body = self
            .post_json(
                ENDPOINT_GENERATE,
                &cfg.endpoints.generate,
                &[],
                request,
                cfg.timeouts.generation(),
            )
            .await?;
        Ok(body.get("alt_text").and_then(Value::as_str).unwrap_or_default().to_string())
    }
}
