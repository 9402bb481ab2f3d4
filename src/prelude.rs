//! Convenient re-exports for wiring and driving an orchestrator.
pub use crate::{
    clock::{Clock, ManualClock, SystemClock},
    config::MeterConfig,
    context::RequestContext,
    http::HttpBackend,
    media::{ImageRecord, InMemoryMediaLibrary, MediaLibrary},
    orchestrator::{
        BulkOutcome, Caller, ClearOutcome, GenerateOutcome, Orchestrator, UsageOverview,
    },
    quota::Remaining,
    remote::{AccountService, AltTextGenerator},
    site::HostInfo,
    store::{InMemorySettingsStore, SettingsStore},
    telemetry::{LogSink, MemorySink, MeterEvent, NullSink},
};
