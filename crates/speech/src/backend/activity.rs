use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::{BackendEvent, BackendKind, RecognitionBackend};
use crate::error::StartError;
use crate::platform::{CaptureUiHost, CaptureUiOutcome, CaptureUiRequest, LaunchError};
use crate::session::SessionLink;

/// Delegates one recognition attempt to the host's capture UI.
///
/// Once launched the UI owns the microphone and its own lifecycle; this
/// adapter only waits for the outcome. `stop` is deliberately a no-op
/// mid-attempt so a result the UI still delivers can settle the session.
pub struct ActivityBackend {
    host: Arc<dyn CaptureUiHost>,
    prompt: String,
    max_results: usize,
    waiter: Mutex<Option<JoinHandle<()>>>,
}

impl ActivityBackend {
    pub fn new(
        host: Arc<dyn CaptureUiHost>,
        prompt: impl Into<String>,
        max_results: usize,
    ) -> Self {
        Self {
            host,
            prompt: prompt.into(),
            max_results,
            waiter: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RecognitionBackend for ActivityBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Activity
    }

    async fn probe(&self) -> bool {
        self.host.resolves_capture_intent()
    }

    async fn start(&self, locale: &str, link: SessionLink) -> Result<(), StartError> {
        let request = CaptureUiRequest {
            locale: locale.to_owned(),
            prompt: self.prompt.clone(),
            max_results: self.max_results,
        };
        let outcome = self.host.launch(request).map_err(|err| match err {
            LaunchError::NoHost => StartError::NoActivity,
            LaunchError::Failed(message) => StartError::Service(message),
        })?;
        debug!(locale, "Capture UI launched");

        let waiter = tokio::spawn(async move {
            let event = match outcome.await {
                Ok(CaptureUiOutcome::Results(values)) => BackendEvent::Final(values),
                Ok(CaptureUiOutcome::Cancelled) => BackendEvent::Cancelled,
                Err(_) => {
                    warn!("Capture UI went away without reporting an outcome");
                    BackendEvent::Cancelled
                }
            };
            link.post(event).await;
        });
        if let Some(stale) = self.waiter.lock().replace(waiter) {
            stale.abort();
        }
        Ok(())
    }

    async fn stop(&self) {
        // The external UI owns capture; there is nothing to release.
    }

    async fn destroy(&self) {
        if let Some(waiter) = self.waiter.lock().take() {
            waiter.abort();
        }
    }
}
