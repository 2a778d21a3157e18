use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::backend::{BackendEvent, BackendKind, RecognitionBackend};
use crate::error::{RecognitionError, RecognitionErrorKind, StartError};
use crate::model::{DecodeStep, UtteranceDecoder};
use crate::platform::{AudioSource, AudioSpec, CaptureHandle};
use crate::provision::ModelProvisioner;
use crate::session::SessionLink;

/// Runs recognition locally against the provisioned acoustic model.
///
/// Each attempt opens an exclusive microphone stream and feeds frames
/// into a fresh decoder. A recognized end of utterance completes the
/// attempt and ends capture; an explicit stop closes capture and then
/// flushes whatever the decoder still holds. Captures that exceed the
/// utterance cap fail with a speech-timeout error.
pub struct OfflineBackend {
    provisioner: Arc<ModelProvisioner>,
    audio: Arc<dyn AudioSource>,
    sample_rate: u32,
    max_speech: Duration,
    capture: Mutex<Option<Box<dyn CaptureHandle>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OfflineBackend {
    pub fn new(
        provisioner: Arc<ModelProvisioner>,
        audio: Arc<dyn AudioSource>,
        sample_rate: u32,
        max_speech: Duration,
    ) -> Self {
        Self {
            provisioner,
            audio,
            sample_rate,
            max_speech,
            capture: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RecognitionBackend for OfflineBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Offline
    }

    async fn probe(&self) -> bool {
        self.provisioner.is_ready()
    }

    async fn start(&self, locale: &str, link: SessionLink) -> Result<(), StartError> {
        // The model ignores the locale; it recognizes whatever language
        // it was trained for.
        let model = self.provisioner.model().ok_or(StartError::ModelNotReady)?;

        let mut capture = self
            .audio
            .open(AudioSpec {
                sample_rate: self.sample_rate,
            })
            .await
            .map_err(|err| StartError::Audio(format!("{err:#}")))?;
        let decoder = match model.create_decoder(capture.sample_rate) {
            Ok(decoder) => decoder,
            Err(err) => {
                capture.handle.close();
                return Err(StartError::Service(format!("{err:#}")));
            }
        };
        debug!(
            locale,
            sample_rate = capture.sample_rate,
            "Microphone opened for offline recognition"
        );

        *self.capture.lock() = Some(capture.handle);
        // A zero cap means uncapped.
        let deadline = (!self.max_speech.is_zero()).then(|| Instant::now() + self.max_speech);
        let worker = tokio::spawn(decode_loop(capture.frames, decoder, deadline, link));
        if let Some(stale) = self.worker.lock().replace(worker) {
            stale.abort();
        }
        Ok(())
    }

    async fn stop(&self) {
        let handle = self.capture.lock().take();
        if let Some(mut handle) = handle {
            handle.close();
            debug!("Microphone released");
        }
    }

    async fn destroy(&self) {
        self.stop().await;
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

/// Feeds captured frames into the decoder until an utterance completes,
/// capture closes, or the utterance cap expires.
///
/// Empty hypotheses are swallowed: an empty partial is noise, and an
/// empty utterance-final means the decoder heard nothing worth
/// reporting, so listening simply continues.
async fn decode_loop(
    mut frames: mpsc::Receiver<Vec<i16>>,
    mut decoder: Box<dyn UtteranceDecoder>,
    deadline: Option<Instant>,
    link: SessionLink,
) {
    loop {
        let next = match deadline {
            Some(deadline) => timeout_at(deadline, frames.recv()).await,
            None => Ok(frames.recv().await),
        };
        let frame = match next {
            Ok(Some(frame)) => frame,
            // Capture closed: explicit stop, flush below.
            Ok(None) => break,
            Err(_) => {
                warn!("Utterance exceeded the configured cap");
                link.post(BackendEvent::Error(RecognitionError::new(
                    RecognitionErrorKind::SpeechTimeout,
                )))
                .await;
                return;
            }
        };
        match decoder.accept_frame(&frame) {
            Ok(DecodeStep::Buffering) => {}
            Ok(DecodeStep::Partial(text)) => {
                if !text.is_empty() {
                    link.post(BackendEvent::Partial(vec![text])).await;
                }
            }
            Ok(DecodeStep::Final(text)) => {
                if text.is_empty() {
                    continue;
                }
                link.post(BackendEvent::Final(vec![text])).await;
                link.post(BackendEvent::EndOfSpeech).await;
                return;
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "Decoder rejected audio");
                link.post(BackendEvent::Error(RecognitionError::new(
                    RecognitionErrorKind::Client,
                )))
                .await;
                return;
            }
        }
    }

    // Explicit stop: emit whatever the decoder can still produce from
    // the audio it already saw, then signal the end of capture.
    match decoder.finalize() {
        Ok(Some(text)) => link.post(BackendEvent::Final(vec![text])).await,
        Ok(None) => {}
        Err(err) => warn!(error = %format!("{err:#}"), "Decoder flush failed"),
    }
    link.post(BackendEvent::EndOfSpeech).await;
}
