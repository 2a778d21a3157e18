use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::{BackendEvent, BackendKind, RecognitionBackend};
use crate::error::{RecognitionError, RecognitionErrorKind, StartError};
use crate::platform::{RecognizeRequest, RecognizerHandle, RecognizerService, RecognizerSignal};
use crate::session::SessionLink;

/// Streams one recognition attempt through a [`RecognizerService`].
///
/// The service's signal sequence is translated into backend events; the
/// service promises exactly one final result or one error per attempt,
/// so the translation task ends on whichever arrives first. `stop` ends
/// capture but keeps draining signals, because a service may still flush
/// its terminal result afterwards.
pub struct StreamingBackend {
    service: Arc<dyn RecognizerService>,
    max_results: usize,
    partial_results: bool,
    handle: Mutex<Option<Box<dyn RecognizerHandle>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingBackend {
    pub fn new(service: Arc<dyn RecognizerService>, max_results: usize, partial_results: bool) -> Self {
        Self {
            service,
            max_results,
            partial_results,
            handle: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RecognitionBackend for StreamingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Streaming
    }

    async fn probe(&self) -> bool {
        self.service.is_recognition_available()
    }

    async fn start(&self, locale: &str, link: SessionLink) -> Result<(), StartError> {
        let request = RecognizeRequest {
            locale: locale.to_owned(),
            max_results: self.max_results,
            partial_results: self.partial_results,
        };
        let session = self
            .service
            .begin(request)
            .await
            .map_err(|err| StartError::Service(format!("{err:#}")))?;
        debug!(locale, "Recognizer session opened");

        *self.handle.lock() = Some(session.handle);
        let worker = tokio::spawn(translate_signals(session.signals, link));
        if let Some(stale) = self.worker.lock().replace(worker) {
            stale.abort();
        }
        Ok(())
    }

    async fn stop(&self) {
        let handle = self.handle.lock().take();
        if let Some(mut handle) = handle {
            handle.stop();
            debug!("Recognizer stopped");
        }
    }

    async fn destroy(&self) {
        self.stop().await;
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

/// Forwards recognizer signals as backend events until the attempt's
/// terminal signal arrives.
async fn translate_signals(mut signals: mpsc::Receiver<RecognizerSignal>, link: SessionLink) {
    while let Some(signal) = signals.recv().await {
        match signal {
            RecognizerSignal::ReadyForSpeech => debug!("Recognizer ready for speech"),
            RecognizerSignal::BeginningOfSpeech => debug!("Beginning of speech"),
            RecognizerSignal::Partial(values) => link.post(BackendEvent::Partial(values)).await,
            RecognizerSignal::EndOfSpeech => link.post(BackendEvent::EndOfSpeech).await,
            RecognizerSignal::Final(values) => {
                link.post(BackendEvent::Final(values)).await;
                return;
            }
            RecognizerSignal::Error(code) => {
                link.post(BackendEvent::Error(RecognitionError::from_native(code)))
                    .await;
                return;
            }
        }
    }
    // The service dropped its sender without a final result or error.
    warn!("Recognizer signal stream closed without a terminal signal");
    link.post(BackendEvent::Error(RecognitionError::new(
        RecognitionErrorKind::Unknown,
    )))
    .await;
}
