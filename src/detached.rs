//! Fire-and-forget remote calls.
//!
//! The caller never waits for a detached task and never sees its outcome, but
//! the call itself is attempted exactly once. Failures are logged.

use crate::error::RemoteError;
use std::future::Future;
use tokio::task::JoinHandle;

/// Run `call` in the background. Returns `None` (and drops the call) when no
/// tokio runtime is available.
pub fn spawn_detached<F>(label: &'static str, call: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = Result<(), RemoteError>> + Send + 'static,
{
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => {
            tracing::warn!(task = label, "no async runtime; detached call dropped");
            return None;
        }
    };
    Some(handle.spawn(async move {
        match call.await {
            Ok(()) => tracing::debug!(task = label, "detached call completed"),
            Err(e) => tracing::warn!(task = label, error = %e, "detached call failed"),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn runs_once_and_swallows_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let handle = spawn_detached("register", async move {
            c.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::SiteNotRegistered)
        })
        .expect("runtime present");
        handle.await.expect("task does not panic");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn without_runtime_the_call_is_dropped() {
        assert!(spawn_detached("event", async { Ok(()) }).is_none());
    }
}
