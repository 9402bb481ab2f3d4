//! Structured results of the orchestrator entry points and their JSON shapes.
//!
//! Every outcome serializes to an object with a boolean `success`; failures
//! carry an `error` (or `message` for quota denials) meant for the admin.

use crate::billing::BillingCycle;
use crate::quota::Remaining;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

const RESET_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) const NO_ALT_TEXT: &str = "No alt text generated";
pub(crate) const TOO_MANY_REQUESTS: &str = "Too many requests. Please wait a moment and try again.";

/// Quota exhausted before generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDenial {
    pub message: String,
    pub next_reset: Option<DateTime<Utc>>,
    pub is_pro_limit: bool,
}

impl QuotaDenial {
    fn to_json(&self) -> Value {
        let mut body = json!({
            "success": false,
            "message": self.message,
            "limit_reached": true,
            "next_reset": self.next_reset.map(|t| t.format(RESET_FORMAT).to_string()),
            "remaining": 0,
        });
        if self.is_pro_limit {
            insert(&mut body, "is_pro_limit", Value::Bool(true));
        }
        body
    }
}

/// The caller exceeded the request rate. Checked before quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub retry_after_secs: u64,
}

impl RateLimited {
    fn to_json(self) -> Value {
        json!({
            "success": false,
            "error": TOO_MANY_REQUESTS,
            "rate_limited": true,
            "retry_after": self.retry_after_secs,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The caller may not manage the site.
    Unauthorized,
    /// The reference is not an image, or the image cannot be resolved.
    InvalidImage,
    /// The site has no id yet.
    NotConfigured,
    /// The generator could not be reached or timed out.
    Connection,
    /// The generator answered with an error.
    Remote,
    /// The account service did not know the site; it has been re-registered.
    SiteNotRegistered,
    /// Reading or writing the media library failed.
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    fn to_json(&self) -> Value {
        let mut body = json!({ "success": false, "error": self.message, "code": self.kind });
        if self.kind == FailureKind::SiteNotRegistered {
            insert(&mut body, "retry", Value::Bool(true));
        }
        body
    }
}

/// Result of generating alt text for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateOutcome {
    Generated { image_id: u64, alt: String, remaining: Remaining },
    /// The generator returned nothing usable; no quota was consumed.
    NoAltText { remaining: Remaining },
    LimitReached(QuotaDenial),
    RateLimited(RateLimited),
    Failed(Failure),
}

impl GenerateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerateOutcome::Generated { .. })
    }

    pub fn to_json(&self) -> Value {
        match self {
            GenerateOutcome::Generated { alt, remaining, .. } => {
                json!({ "success": true, "alt": alt, "remaining": remaining })
            }
            GenerateOutcome::NoAltText { remaining } => {
                json!({ "success": false, "error": NO_ALT_TEXT, "remaining": remaining })
            }
            GenerateOutcome::LimitReached(denial) => denial.to_json(),
            GenerateOutcome::RateLimited(limited) => limited.to_json(),
            GenerateOutcome::Failed(failure) => failure.to_json(),
        }
    }
}

/// One image tagged during a bulk run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaggedImage {
    pub id: u64,
    pub url: String,
    pub alt: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkReport {
    pub candidates: usize,
    pub images: Vec<TaggedImage>,
    pub remaining: Remaining,
}

impl BulkReport {
    pub fn tagged(&self) -> usize {
        self.images.len()
    }

    pub fn message(&self) -> String {
        format!("Tagged {} image(s).", self.tagged())
    }
}

/// Result of a bulk scan-and-tag run. Per-image failures never turn a run
/// into a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOutcome {
    Completed(BulkReport),
    LimitReached(QuotaDenial),
    RateLimited(RateLimited),
    Failed(Failure),
}

impl BulkOutcome {
    pub fn to_json(&self) -> Value {
        match self {
            BulkOutcome::Completed(report) => json!({
                "success": true,
                "message": report.message(),
                "images": report.images,
                "remaining": report.remaining,
            }),
            BulkOutcome::LimitReached(denial) => denial.to_json(),
            BulkOutcome::RateLimited(limited) => limited.to_json(),
            BulkOutcome::Failed(failure) => failure.to_json(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearOutcome {
    Cleared { image_id: u64 },
    Failed(Failure),
}

impl ClearOutcome {
    pub fn to_json(&self) -> Value {
        match self {
            ClearOutcome::Cleared { .. } => json!({ "success": true }),
            ClearOutcome::Failed(failure) => failure.to_json(),
        }
    }
}

/// Data behind the usage dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageOverview {
    pub site_id: Option<String>,
    pub usage: u64,
    pub limit: i64,
    pub remaining: Remaining,
    pub plan: String,
    pub is_pro: bool,
    pub debug_mode: bool,
    pub billing_cycle: Option<BillingCycle>,
    pub total_images: u64,
    pub missing_alt: u64,
    pub heartbeat_sent: bool,
}

fn insert(body: &mut Value, key: &str, value: Value) {
    if let Value::Object(map) = body {
        map.insert(key.to_string(), value);
    }
}

macro_rules! serialize_via_json {
    ($($ty:ty),*) => {$(
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                self.to_json().serialize(serializer)
            }
        }
    )*};
}

serialize_via_json!(GenerateOutcome, BulkOutcome, ClearOutcome);
