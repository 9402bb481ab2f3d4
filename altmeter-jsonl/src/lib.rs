//! JSONL sink for `altmeter`. Writes one event per line.
//! Always appends; bring your own path.

use altmeter::telemetry::{MeterEvent, TelemetrySink};
use futures::future::BoxFuture;
use std::io;
use std::path::PathBuf;
use std::task::{Context, Poll};

#[derive(Clone, Debug)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl tower::Service<MeterEvent> for JsonlSink {
    type Response = ();
    type Error = io::Error;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: MeterEvent) -> Self::Future {
        let path = self.path.clone();
        let line = serde_json::to_string(&event).map(|l| l + "\n");
        Box::pin(async move {
            use tokio::io::AsyncWriteExt;
            let line = line.map_err(io::Error::other)?;
            let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            tracing::trace!(path = %path.display(), "meter event appended");
            Ok(())
        })
    }
}

impl TelemetrySink for JsonlSink {
    type SinkError = io::Error;
}
