//! Generation orchestrator: the entry points the host dispatches to.
//!
//! - [`Orchestrator::generate_single`]: one image by id.
//! - [`Orchestrator::scan_and_tag`]: a batch of images lacking alt text.
//! - [`Orchestrator::clear_alt`]: remove alt text and its usage record.
//! - [`Orchestrator::overview`]: usage dashboard data.
//!
//! None of them return `Result`. Every failure ends up in a structured outcome
//! (see [`outcome`]) that serializes to the JSON the admin UI expects.
//!
//! ```rust,no_run
//! use altmeter::config::MeterConfig;
//! use altmeter::context::RequestContext;
//! use altmeter::http::HttpBackend;
//! use altmeter::media::InMemoryMediaLibrary;
//! use altmeter::orchestrator::{Caller, Orchestrator};
//! use altmeter::site::HostInfo;
//! use altmeter::store::InMemorySettingsStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MeterConfig::default();
//! let backend = Arc::new(HttpBackend::new(config.clone())?);
//! let meter = Orchestrator::builder(
//!     backend.clone(),
//!     backend,
//!     Arc::new(InMemoryMediaLibrary::new()),
//!     Arc::new(InMemorySettingsStore::new()),
//! )
//! .config(config)
//! .host(HostInfo { site_url: "https://blog.example.test".into(), host_version: "6.5".into() })
//! .build()?;
//!
//! let outcome = meter.generate_single(&Caller::admin("1"), 42, RequestContext::default()).await;
//! println!("{}", serde_json::to_string(&outcome)?);
//! # Ok(())
//! # }
//! ```

pub mod outcome;

pub use outcome::{
    BulkOutcome, BulkReport, ClearOutcome, Failure, FailureKind, GenerateOutcome, QuotaDenial,
    RateLimited, TaggedImage, UsageOverview,
};

use crate::cache::TtlCache;
use crate::clock::{Clock, SystemClock};
use crate::config::MeterConfig;
use crate::context::{RequestContext, RequestScope};
use crate::entitlement::EntitlementCache;
use crate::error::{ConfigError, MediaError, RemoteError};
use crate::media::{sanitize_alt_text, ImageRecord, MediaLibrary};
use crate::quota::{QuotaGuard, QuotaSnapshot};
use crate::rate_limit::{Decision, RateLimiter, SettingsHitStore, SlidingWindow};
use crate::remote::{AccountService, AltTextGenerator, GenerationRequest};
use crate::site::{HostInfo, SiteManager};
use crate::store::SettingsStore;
use crate::telemetry::{emit_best_effort, MeterEvent, NullSink, TelemetrySink};
use crate::timeout::bounded;
use crate::usage::UsageMeter;
use std::sync::Arc;

const SITE_NOT_REGISTERED: &str =
    "This site was not registered with the alt text service. It has been re-registered, please try again.";
const NOT_CONFIGURED: &str = "Site ID missing. Please deactivate and reactivate the plugin.";

/// Who is invoking an entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Identity the rate limit is keyed on.
    pub id: String,
    /// Authenticated and allowed to manage the site.
    pub authorized: bool,
}

impl Caller {
    pub fn new(id: impl Into<String>, authorized: bool) -> Self {
        Self { id: id.into(), authorized }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, true)
    }
}

/// What one generator call produced, after sanitisation.
enum Attempt {
    Text(String),
    Empty,
    Error(RemoteError),
}

pub struct Orchestrator<S = NullSink> {
    config: Arc<MeterConfig>,
    account: Arc<dyn AccountService>,
    entitlement: Arc<EntitlementCache>,
    usage: Arc<UsageMeter>,
    quota: QuotaGuard,
    generator: Arc<dyn AltTextGenerator>,
    media: Arc<dyn MediaLibrary>,
    site: SiteManager,
    limiter: Arc<dyn RateLimiter>,
    sink: S,
}

impl<S: std::fmt::Debug> std::fmt::Debug for Orchestrator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}

impl Orchestrator<NullSink> {
    pub fn builder(
        account: Arc<dyn AccountService>,
        generator: Arc<dyn AltTextGenerator>,
        media: Arc<dyn MediaLibrary>,
        settings: Arc<dyn SettingsStore>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder::new(account, generator, media, settings)
    }
}

impl<S> Orchestrator<S> {
    /// Send domain events to `sink`.
    pub fn with_sink<NewSink>(self, sink: NewSink) -> Orchestrator<NewSink>
    where
        NewSink: TelemetrySink,
    {
        Orchestrator {
            config: self.config,
            account: self.account,
            entitlement: self.entitlement,
            usage: self.usage,
            quota: self.quota,
            generator: self.generator,
            media: self.media,
            site: self.site,
            limiter: self.limiter,
            sink,
        }
    }

    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    pub fn site(&self) -> &SiteManager {
        &self.site
    }

    pub fn entitlement(&self) -> &EntitlementCache {
        &self.entitlement
    }

    pub fn usage(&self) -> &UsageMeter {
        &self.usage
    }

    pub fn quota(&self) -> &QuotaGuard {
        &self.quota
    }
}

impl<S> Orchestrator<S>
where
    S: tower::Service<MeterEvent, Response = ()> + Clone + Send + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    /// Generate and persist alt text for one image.
    pub async fn generate_single(&self, caller: &Caller, image_id: u64, ctx: RequestContext) -> GenerateOutcome {
        if !caller.authorized {
            return GenerateOutcome::Failed(unauthorized());
        }
        if let Some(limited) = self.check_rate(caller).await {
            return GenerateOutcome::RateLimited(limited);
        }
        let image = match self.media.image(image_id).await {
            Ok(image) => image,
            Err(e) => return GenerateOutcome::Failed(media_failure(&e)),
        };
        let Some(site_id) = self.site.site_id().await else {
            return GenerateOutcome::Failed(Failure::new(FailureKind::NotConfigured, NOT_CONFIGURED));
        };

        let scope = RequestScope::new(ctx);
        let snapshot = self.quota.snapshot(&scope, Some(&site_id)).await;
        if !snapshot.allows() {
            return GenerateOutcome::LimitReached(self.deny(&snapshot, &site_id).await);
        }

        match self.attempt(&image, &site_id).await {
            Attempt::Text(alt) => {
                self.usage.mutator().invalidate(&site_id).await;
                if let Err(e) = self.media.set_alt_text(image.id, &alt).await {
                    tracing::warn!(image_id = image.id, error = %e, "failed to persist alt text");
                    return GenerateOutcome::Failed(Failure::new(FailureKind::Storage, e.to_string()));
                }
                self.emit(MeterEvent::GenerationSucceeded { image_id: image.id, site_id: site_id.clone(), bulk: false })
                    .await;
                let remaining = self.quota.remaining(&scope, Some(&site_id)).await;
                GenerateOutcome::Generated { image_id: image.id, alt, remaining }
            }
            Attempt::Empty => {
                self.emit(MeterEvent::EmptyResult { image_id: image.id, bulk: false }).await;
                GenerateOutcome::NoAltText { remaining: snapshot.remaining() }
            }
            Attempt::Error(e) if e.is_not_registered() => {
                let success = match self.site.reregister(&site_id).await {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::warn!(site_id = %site_id, error = %err, "re-registration failed");
                        false
                    }
                };
                self.emit(MeterEvent::SiteReregistered { site_id, success }).await;
                GenerateOutcome::Failed(Failure::new(FailureKind::SiteNotRegistered, SITE_NOT_REGISTERED))
            }
            Attempt::Error(e) => {
                self.emit(MeterEvent::GenerationFailed { image_id: image.id, error: e.to_string(), bulk: false })
                    .await;
                let kind = if e.is_transport() { FailureKind::Connection } else { FailureKind::Remote };
                GenerateOutcome::Failed(Failure::new(kind, e.user_message()))
            }
        }
    }

    /// Tag up to `bulk_batch_size` images lacking alt text, one at a time,
    /// stopping as soon as the quota runs out.
    pub async fn scan_and_tag(&self, caller: &Caller, ctx: RequestContext) -> BulkOutcome {
        if !caller.authorized {
            return BulkOutcome::Failed(unauthorized());
        }
        if let Some(limited) = self.check_rate(caller).await {
            return BulkOutcome::RateLimited(limited);
        }
        let Some(site_id) = self.site.site_id().await else {
            return BulkOutcome::Failed(Failure::new(FailureKind::NotConfigured, NOT_CONFIGURED));
        };

        let scope = RequestScope::new(ctx);
        let snapshot = self.quota.snapshot(&scope, Some(&site_id)).await;
        if !snapshot.allows() {
            return BulkOutcome::LimitReached(self.deny(&snapshot, &site_id).await);
        }

        let candidates = match self.media.candidates(self.config.bulk_batch_size).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "could not list candidate images");
                return BulkOutcome::Failed(Failure::new(FailureKind::Storage, e.to_string()));
            }
        };

        let mut images = Vec::new();
        for image in &candidates {
            if !self.quota.can_generate(&scope, Some(&site_id)).await {
                tracing::info!(site_id = %site_id, tagged = images.len(), "quota exhausted mid-run");
                break;
            }
            match self.attempt(image, &site_id).await {
                Attempt::Text(alt) => {
                    self.usage.mutator().invalidate(&site_id).await;
                    if let Err(e) = self.media.set_alt_text(image.id, &alt).await {
                        tracing::warn!(image_id = image.id, error = %e, "failed to persist alt text; skipping");
                        continue;
                    }
                    self.emit(MeterEvent::GenerationSucceeded {
                        image_id: image.id,
                        site_id: site_id.clone(),
                        bulk: true,
                    })
                    .await;
                    images.push(TaggedImage {
                        id: image.id,
                        url: image.url.clone(),
                        alt,
                        title: image.title.clone(),
                    });
                }
                Attempt::Empty => {
                    self.emit(MeterEvent::EmptyResult { image_id: image.id, bulk: true }).await;
                }
                Attempt::Error(e) => {
                    tracing::warn!(image_id = image.id, error = %e, "generation failed; skipping image");
                    self.emit(MeterEvent::GenerationFailed { image_id: image.id, error: e.to_string(), bulk: true })
                        .await;
                }
            }
        }

        let remaining = self.quota.remaining(&scope, Some(&site_id)).await;
        self.emit(MeterEvent::BulkCompleted { tagged: images.len(), candidates: candidates.len() }).await;
        BulkOutcome::Completed(BulkReport { candidates: candidates.len(), images, remaining })
    }

    /// Remove an image's alt text and ask the account service to drop its usage
    /// record. A failed remote call does not fail the operation.
    pub async fn clear_alt(&self, caller: &Caller, image_id: u64) -> ClearOutcome {
        if !caller.authorized {
            return ClearOutcome::Failed(unauthorized());
        }
        let image_url = match self.media.image(image_id).await {
            Ok(image) => Some(image.url),
            Err(MediaError::MissingUrl(_)) => None,
            Err(e) => return ClearOutcome::Failed(media_failure(&e)),
        };
        if let Err(e) = self.media.clear_alt_text(image_id).await {
            return ClearOutcome::Failed(Failure::new(FailureKind::Storage, e.to_string()));
        }

        if let Some(site_id) = self.site.site_id().await {
            if let Some(url) = image_url.as_deref() {
                let timeout = self.config.timeouts.clear_usage();
                match bounded("clear_usage", timeout, self.account.clear_usage(url, &site_id)).await {
                    Ok(()) => tracing::info!(image_url = url, "removed usage record"),
                    Err(e) => tracing::warn!(image_url = url, error = %e, "clear usage call failed"),
                }
            }
            self.usage.mutator().invalidate(&site_id).await;
        }

        self.emit(MeterEvent::AltCleared { image_id }).await;
        ClearOutcome::Cleared { image_id }
    }

    /// Usage, limits, cycle and library counts for the dashboard. Also sends a
    /// heartbeat when one is due.
    pub async fn overview(&self, ctx: RequestContext) -> UsageOverview {
        let scope = RequestScope::new(ctx);
        let site_id = self.site.site_id().await;
        let heartbeat_sent = self.site.heartbeat_if_due().await;

        let snapshot = self.quota.snapshot(&scope, site_id.as_deref()).await;
        let pro_status = self.entitlement.is_pro(site_id.as_deref(), scope.context()).await;
        let debug_mode = self.entitlement.is_debug_mode(&scope, &self.site.host().site_url).await;
        let billing_cycle = self.usage.billing_cycle(site_id.as_deref()).await;
        let stats = self.media.stats().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "media stats unavailable");
            Default::default()
        });

        UsageOverview {
            site_id,
            usage: snapshot.usage,
            limit: snapshot.limits.current_limit,
            remaining: snapshot.remaining(),
            plan: snapshot.limits.plan.clone(),
            is_pro: snapshot.limits.is_pro || pro_status,
            debug_mode,
            billing_cycle,
            total_images: stats.total_images,
            missing_alt: stats.missing_alt,
            heartbeat_sent,
        }
    }

    async fn attempt(&self, image: &ImageRecord, site_id: &str) -> Attempt {
        let request = GenerationRequest {
            image_url: image.url.clone(),
            filename: image.filename.clone(),
            site_id: site_id.to_string(),
        };
        match bounded("generate", self.config.timeouts.generation(), self.generator.generate(&request)).await {
            Ok(raw) => {
                let alt = sanitize_alt_text(&raw);
                if alt.is_empty() {
                    Attempt::Empty
                } else {
                    Attempt::Text(alt)
                }
            }
            Err(e) => Attempt::Error(e),
        }
    }

    async fn check_rate(&self, caller: &Caller) -> Option<RateLimited> {
        match self.limiter.acquire(&caller.id).await {
            Ok(Decision::Allowed { .. }) => None,
            Ok(Decision::Denied { wait, reason }) => {
                tracing::info!(caller = %caller.id, ?wait, reason = %reason, "rate limited");
                let wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
                self.emit(MeterEvent::RateLimited { caller: caller.id.clone(), wait_ms }).await;
                Some(RateLimited { retry_after_secs: wait.as_secs().max(1) })
            }
            Err(e) => {
                tracing::warn!(caller = %caller.id, error = %e, "rate limit store failed; allowing request");
                None
            }
        }
    }

    async fn deny(&self, snapshot: &QuotaSnapshot, site_id: &str) -> QuotaDenial {
        let limits = &snapshot.limits;
        self.emit(MeterEvent::QuotaDenied {
            usage: snapshot.usage,
            limit: limits.current_limit,
            is_pro: limits.is_pro,
        })
        .await;
        let message = if limits.is_pro {
            format!(
                "Monthly Pro generation limit reached ({}/month). Your limit resets next billing cycle.",
                limits.current_limit
            )
        } else {
            format!(
                "Monthly generation limit reached. Upgrade to Pro for {} generations per month.",
                self.config.quota.upgrade_limit
            )
        };
        QuotaDenial {
            message,
            next_reset: self.usage.next_reset(Some(site_id)).await,
            is_pro_limit: limits.is_pro,
        }
    }

    async fn emit(&self, event: MeterEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }
}

fn unauthorized() -> Failure {
    Failure::new(FailureKind::Unauthorized, "Insufficient permissions")
}

fn media_failure(e: &MediaError) -> Failure {
    match e {
        MediaError::NotFound(_) | MediaError::NotAnImage(_) => {
            Failure::new(FailureKind::InvalidImage, "Invalid image ID")
        }
        MediaError::MissingUrl(_) => Failure::new(FailureKind::InvalidImage, "Could not get image URL"),
        MediaError::Backend(_) => Failure::new(FailureKind::Storage, e.to_string()),
    }
}

/// Assembles an [`Orchestrator`] from its collaborators.
pub struct OrchestratorBuilder {
    account: Arc<dyn AccountService>,
    generator: Arc<dyn AltTextGenerator>,
    media: Arc<dyn MediaLibrary>,
    settings: Arc<dyn SettingsStore>,
    config: MeterConfig,
    host: HostInfo,
    clock: Arc<dyn Clock>,
    limiter: Option<Arc<dyn RateLimiter>>,
}

impl OrchestratorBuilder {
    pub fn new(
        account: Arc<dyn AccountService>,
        generator: Arc<dyn AltTextGenerator>,
        media: Arc<dyn MediaLibrary>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            account,
            generator,
            media,
            settings,
            config: MeterConfig::default(),
            host: HostInfo::default(),
            clock: Arc::new(SystemClock),
            limiter: None,
        }
    }

    pub fn config(mut self, config: MeterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn host(mut self, host: HostInfo) -> Self {
        self.host = host;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the default per-caller sliding window kept in the settings store.
    pub fn rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Validate the configuration and wire everything together.
    pub fn build(self) -> Result<Orchestrator<NullSink>, ConfigError> {
        self.config.validate()?;
        let config = Arc::new(self.config);
        let cache = TtlCache::new(self.settings.clone());

        let entitlement = Arc::new(EntitlementCache::new(self.account.clone(), cache.clone(), config.clone()));
        let usage = Arc::new(UsageMeter::new(self.account.clone(), cache, self.clock.clone(), config.clone()));
        let quota = QuotaGuard::new(entitlement.clone(), usage.clone());
        let site = SiteManager::new(self.account.clone(), self.settings.clone(), self.clock.clone(), config.clone(), self.host);
        let limiter = match self.limiter {
            Some(limiter) => limiter,
            None => Arc::new(
                SlidingWindow::from_config(SettingsHitStore::new(self.settings), &config.rate_limit)
                    .with_clock(self.clock),
            ),
        };

        Ok(Orchestrator {
            config,
            account: self.account,
            entitlement,
            usage,
            quota,
            generator: self.generator,
            media: self.media,
            site,
            limiter,
            sink: NullSink,
        })
    }
}
