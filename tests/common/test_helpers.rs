use altmeter::clock::ManualClock;
use altmeter::error::RemoteError;
use altmeter::media::{ImageRecord, InMemoryMediaLibrary};
use altmeter::orchestrator::Orchestrator;
use altmeter::remote::{
    AccountService, AltTextGenerator, GenerationRequest, LifecycleEvent, Limits, Registration,
    SiteInfo,
};
use altmeter::site::HostInfo;
use altmeter::store::{keys, InMemorySettingsStore, SettingsStore};
use altmeter::telemetry::MemorySink;
use altmeter::MeterConfig;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SITE_ID: &str = "3f2c9a4e-1111-4d2b-9a77-5a1c0de0f00d";
pub const SITE_URL: &str = "https://blog.example.test";

/// Account service double. Usage is bumped by [`FakeGenerator`] on every
/// non-empty generation, the way the real service counts.
#[derive(Debug)]
pub struct FakeAccount {
    pub usage: AtomicU64,
    pub limits: Mutex<Result<Limits, RemoteError>>,
    pub pro_status: Mutex<Option<String>>,
    pub created_at: Mutex<Option<String>>,
    pub known_site_for_url: Mutex<Option<String>>,
    /// Applied to every status/usage lookup.
    pub delay: Mutex<Option<Duration>>,
    pub usage_calls: AtomicUsize,
    pub limits_calls: AtomicUsize,
    pub registrations: Mutex<Vec<Registration>>,
    pub heartbeats: Mutex<Vec<Registration>>,
    pub events: Mutex<Vec<LifecycleEvent>>,
    pub cleared: Mutex<Vec<(String, String)>>,
    pub clear_error: Mutex<Option<RemoteError>>,
}

impl FakeAccount {
    pub fn free(usage: u64) -> Arc<Self> {
        Self::with_limits(usage, Limits { current_limit: 15, plan: "free".into(), is_pro: false })
    }

    pub fn pro(usage: u64, limit: i64) -> Arc<Self> {
        let account = Self::with_limits(usage, Limits { current_limit: limit, plan: "pro".into(), is_pro: true });
        *account.pro_status.lock().unwrap() = Some("pro".into());
        account
    }

    pub fn with_limits(usage: u64, limits: Limits) -> Arc<Self> {
        Arc::new(Self {
            usage: AtomicU64::new(usage),
            limits: Mutex::new(Ok(limits)),
            pro_status: Mutex::new(None),
            created_at: Mutex::new(Some("2024-01-31 10:00:00".into())),
            known_site_for_url: Mutex::new(None),
            delay: Mutex::new(None),
            usage_calls: AtomicUsize::new(0),
            limits_calls: AtomicUsize::new(0),
            registrations: Mutex::new(Vec::new()),
            heartbeats: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            cleared: Mutex::new(Vec::new()),
            clear_error: Mutex::new(None),
        })
    }

    pub fn usage_calls(&self) -> usize {
        self.usage_calls.load(Ordering::SeqCst)
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|e| e.event_type.to_string()).collect()
    }

    async fn lag(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl AccountService for FakeAccount {
    async fn site_info(&self, _site_id: &str) -> Result<SiteInfo, RemoteError> {
        self.lag().await;
        Ok(SiteInfo {
            pro_status: self.pro_status.lock().unwrap().clone(),
            created_at: self.created_at.lock().unwrap().clone(),
        })
    }

    async fn limits(&self, _site_id: &str) -> Result<Limits, RemoteError> {
        self.limits_calls.fetch_add(1, Ordering::SeqCst);
        self.lag().await;
        self.limits.lock().unwrap().clone()
    }

    async fn debug_mode(&self) -> Result<bool, RemoteError> {
        Ok(false)
    }

    async fn usage_count(&self, _site_id: &str) -> Result<u64, RemoteError> {
        self.usage_calls.fetch_add(1, Ordering::SeqCst);
        self.lag().await;
        Ok(self.usage.load(Ordering::SeqCst))
    }

    async fn register(&self, registration: &Registration) -> Result<(), RemoteError> {
        self.registrations.lock().unwrap().push(registration.clone());
        Ok(())
    }

    async fn lookup_site(&self, _site_url: &str) -> Result<Option<String>, RemoteError> {
        Ok(self.known_site_for_url.lock().unwrap().clone())
    }

    async fn heartbeat(&self, registration: &Registration) -> Result<(), RemoteError> {
        self.heartbeats.lock().unwrap().push(registration.clone());
        Ok(())
    }

    async fn track_event(&self, event: &LifecycleEvent) -> Result<(), RemoteError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn clear_usage(&self, image_url: &str, site_id: &str) -> Result<(), RemoteError> {
        self.cleared.lock().unwrap().push((image_url.to_string(), site_id.to_string()));
        match self.clear_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Generator double. Plays scripted replies first, then describes the file.
#[derive(Debug)]
pub struct FakeGenerator {
    account: Arc<FakeAccount>,
    pub script: Mutex<VecDeque<Result<String, RemoteError>>>,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl FakeGenerator {
    pub fn new(account: Arc<FakeAccount>) -> Arc<Self> {
        Arc::new(Self { account, script: Mutex::new(VecDeque::new()), requests: Mutex::new(Vec::new()) })
    }

    pub fn push(&self, reply: Result<&str, RemoteError>) {
        self.script.lock().unwrap().push_back(reply.map(str::to_owned));
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AltTextGenerator for FakeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, RemoteError> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("A photo described by {}", request.filename)));
        if let Ok(text) = &reply {
            if !text.trim().is_empty() {
                self.account.usage.fetch_add(1, Ordering::SeqCst);
            }
        }
        reply
    }
}

pub fn transport_error() -> RemoteError {
    RemoteError::Transport { endpoint: "generate", message: "connection refused".into() }
}

pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 15, 12, 0, 0).unwrap()
}

pub struct Harness {
    pub meter: Orchestrator<MemorySink>,
    pub account: Arc<FakeAccount>,
    pub generator: Arc<FakeGenerator>,
    pub media: InMemoryMediaLibrary,
    pub settings: Arc<InMemorySettingsStore>,
    pub clock: ManualClock,
    pub sink: MemorySink,
}

impl Harness {
    /// Registered site with `images` candidate images (ids 1..=images).
    pub async fn new(account: Arc<FakeAccount>, images: u64) -> Self {
        Self::with_config(account, images, MeterConfig::default()).await
    }

    pub async fn with_config(account: Arc<FakeAccount>, images: u64, config: MeterConfig) -> Self {
        let harness = Self::unregistered(account, images, config);
        harness
            .settings
            .set(keys::SITE_ID, serde_json::Value::from(SITE_ID), None)
            .await
            .unwrap();
        harness
    }

    /// No site id stored yet.
    pub fn unregistered(account: Arc<FakeAccount>, images: u64, config: MeterConfig) -> Self {
        let clock = ManualClock::new(start_time());
        let settings = Arc::new(InMemorySettingsStore::with_clock(clock.clone()));
        let media = InMemoryMediaLibrary::new();
        for id in 1..=images {
            media.insert(ImageRecord::new(id, format!("{SITE_URL}/uploads/photo-{id}.jpg")).with_title(format!("Photo {id}")));
        }
        let generator = FakeGenerator::new(account.clone());
        let sink = MemorySink::new();
        let meter = Orchestrator::builder(account.clone(), generator.clone(), Arc::new(media.clone()), settings.clone())
            .config(config)
            .host(HostInfo { site_url: SITE_URL.into(), host_version: "6.5.2".into() })
            .clock(Arc::new(clock.clone()))
            .build()
            .expect("valid config")
            .with_sink(sink.clone());
        Self { meter, account, generator, media, settings, clock, sink }
    }
}

/// Let detached tasks run to completion.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
