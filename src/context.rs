//! Per-request state threaded explicitly through the call chain.

use crate::remote::Limits;
use tokio::sync::OnceCell;

/// Ambient facts about the current request, supplied by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Developer contexts get shorter entitlement caching.
    pub is_developer: bool,
    /// Skip the shared pro-status cache for this request.
    pub bypass_cache: bool,
}

impl RequestContext {
    pub fn developer() -> Self {
        Self { is_developer: true, ..Self::default() }
    }

    pub fn with_bypass(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Request-scoped memo: one limits lookup and one debug-mode lookup per logical
/// operation, no matter how many times they are consulted.
#[derive(Debug, Default)]
pub struct RequestScope {
    ctx: RequestContext,
    limits: OnceCell<Limits>,
    debug_mode: OnceCell<bool>,
}

impl RequestScope {
    pub fn new(ctx: RequestContext) -> Self {
        Self { ctx, limits: OnceCell::new(), debug_mode: OnceCell::new() }
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    pub(crate) fn limits_cell(&self) -> &OnceCell<Limits> {
        &self.limits
    }

    pub(crate) fn debug_cell(&self) -> &OnceCell<bool> {
        &self.debug_mode
    }
}
