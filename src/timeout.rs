//! Hard deadlines for remote calls.
//!
//! The HTTP client sets its own request timeout, but collaborator traits can be
//! implemented by anything, so every call site also wraps the future here. A
//! call that overruns resolves to [`RemoteError::Timeout`] and the caller picks
//! its conservative default.

use crate::error::RemoteError;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    endpoint: &'static str,
    duration: Duration,
}

impl TimeoutPolicy {
    /// Deadline for calls to `endpoint`. A zero duration is bumped to 1ms so the
    /// call is still attempted.
    pub fn new(endpoint: &'static str, duration: Duration) -> Self {
        Self { endpoint, duration: duration.max(Duration::from_millis(1)) }
    }

    /// Inspect the configured timeout duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub async fn execute<T, Fut>(&self, operation: Fut) -> Result<T, RemoteError>
    where
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        match tokio::time::timeout(self.duration, operation).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(endpoint = self.endpoint, timeout = ?self.duration, "remote call timed out");
                Err(RemoteError::Timeout { endpoint: self.endpoint, timeout: self.duration })
            }
        }
    }
}

/// Shorthand for `TimeoutPolicy::new(endpoint, duration).execute(operation)`.
pub async fn bounded<T, Fut>(endpoint: &'static str, duration: Duration, operation: Fut) -> Result<T, RemoteError>
where
    Fut: Future<Output = Result<T, RemoteError>>,
{
    TimeoutPolicy::new(endpoint, duration).execute(operation).await
}
