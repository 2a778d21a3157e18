use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use tokio::sync::{Mutex, broadcast, oneshot};
use tracing::{debug, info, trace, warn};

use crate::backend::{BackendEvent, BackendKind, RecognitionBackend};
use crate::error::{ErrorCode, SpeechError, StartError};
use crate::events::{EventSink, SpeechEvent};
use crate::provision::ModelProvisioner;
use crate::selector::BackendSelector;

/// Lifecycle of the live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Starting,
    Listening,
    Completing,
    Error,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Starting => "starting",
            SessionPhase::Listening => "listening",
            SessionPhase::Completing => "completing",
            SessionPhase::Error => "error",
        }
    }
}

type Settlement = Result<bool, SpeechError>;

struct ActiveSession {
    backend: Arc<dyn RecognitionBackend>,
    kind: BackendKind,
    locale: String,
    started_at: Instant,
}

/// Controller state behind the transition mutex.
struct Inner {
    phase: SessionPhase,
    /// Bumped on every new session and on destroy; the staleness check
    /// for incoming backend events.
    generation: u64,
    /// The caller awaiting `start_listening`. Taking the sender settles
    /// it, so it can only ever fire once.
    pending: Option<oneshot::Sender<Settlement>>,
    /// Kept until the session settles, which may be after an explicit
    /// stop if the backend still owes a flushed result.
    session: Option<ActiveSession>,
}

/// A backend's way to post events into the session that started it.
#[derive(Clone)]
pub struct SessionLink {
    controller: Weak<SessionController>,
    generation: u64,
}

impl SessionLink {
    /// Posts one event. Dropped silently when the controller is gone;
    /// dropped with a debug log when the session was superseded.
    pub async fn post(&self, event: BackendEvent) {
        if let Some(controller) = self.controller.upgrade() {
            controller.on_backend_event(self.generation, event).await;
        }
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            controller: Weak::new(),
            generation: 0,
        }
    }
}

/// Owns the single in-flight session and serializes every transition.
///
/// Caller operations and backend callbacks all funnel through one async
/// mutex, so every transition reads consistent state and events leave
/// the sink in session order. Backends talk back through a
/// [`SessionLink`] stamped with the session's generation; a link whose
/// generation went stale can no longer touch anything.
pub struct SessionController {
    self_weak: Weak<SessionController>,
    inner: Mutex<Inner>,
    /// Mirror of `phase == Listening` for the synchronous query.
    listening: AtomicBool,
    sink: EventSink,
    selector: BackendSelector,
    provisioner: Option<Arc<ModelProvisioner>>,
    default_locale: String,
}

impl SessionController {
    pub fn new(
        selector: BackendSelector,
        provisioner: Option<Arc<ModelProvisioner>>,
        default_locale: impl Into<String>,
        event_capacity: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            self_weak: self_weak.clone(),
            inner: Mutex::new(Inner {
                phase: SessionPhase::Idle,
                generation: 0,
                pending: None,
                session: None,
            }),
            listening: AtomicBool::new(false),
            sink: EventSink::new(event_capacity),
            selector,
            provisioner,
            default_locale: default_locale.into(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeechEvent> {
        self.sink.subscribe()
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Whether any backend could start right now. Probes run fresh.
    pub async fn is_available(&self) -> bool {
        self.selector.any_available().await
    }

    /// Provisions the offline model. Safe to call repeatedly; a model
    /// that is already on disk is loaded without re-extraction.
    pub async fn init_model(&self) -> Result<bool, SpeechError> {
        match &self.provisioner {
            Some(provisioner) => {
                provisioner.ensure_ready().await?;
                Ok(true)
            }
            None => Err(SpeechError::new(
                ErrorCode::InitError,
                "No offline model configured",
            )),
        }
    }

    /// Starts a listening session, superseding any live one, and waits
    /// for its outcome: `Ok(true)` once a final result was delivered,
    /// or the error that ended it.
    pub async fn start_listening(&self, locale: Option<&str>) -> Result<bool, SpeechError> {
        let rx = self.begin(locale).await?;
        match rx.await {
            Ok(settlement) => settlement,
            // Unreachable while the controller is alive; the sender is
            // only ever consumed by a settlement.
            Err(_) => Err(SpeechError::cancelled("Speech recognizer went away")),
        }
    }

    /// Runs the locked part of `start_listening`: supersede, select,
    /// start, register the pending request. The returned receiver is
    /// awaited outside the lock so backend events can flow.
    async fn begin(&self, locale: Option<&str>) -> Result<oneshot::Receiver<Settlement>, SpeechError> {
        let mut inner = self.inner.lock().await;
        self.cancel_current(&mut inner, "Cancelled by a superseding start request")
            .await;

        inner.generation += 1;
        let generation = inner.generation;
        let locale = match locale {
            Some(tag) if !tag.is_empty() => tag.to_owned(),
            _ => self.default_locale.clone(),
        };
        self.set_phase(&mut inner, SessionPhase::Starting);

        let backend = match self.selector.select().await {
            Ok(backend) => backend,
            Err(err) => return Err(self.fail_start(&mut inner, err)),
        };
        let kind = backend.kind();
        info!(backend = kind.as_str(), %locale, generation, "Starting listening session");

        let link = SessionLink {
            controller: self.self_weak.clone(),
            generation,
        };
        if let Err(err) = backend.start(&locale, link).await {
            return Err(self.fail_start(&mut inner, err));
        }

        let (tx, rx) = oneshot::channel();
        inner.pending = Some(tx);
        inner.session = Some(ActiveSession {
            backend,
            kind,
            locale,
            started_at: Instant::now(),
        });
        self.set_phase(&mut inner, SessionPhase::Listening);
        self.sink.emit(SpeechEvent::Start {});
        Ok(rx)
    }

    /// Ends audio capture for the live session. The session's original
    /// request stays pending; backends that can still flush a result
    /// from captured audio settle it afterwards.
    pub async fn stop_listening(&self) -> Result<bool, SpeechError> {
        let mut inner = self.inner.lock().await;
        if inner.phase == SessionPhase::Listening {
            let backend = inner.session.as_ref().map(|s| s.backend.clone());
            self.set_phase(&mut inner, SessionPhase::Completing);
            if let Some(backend) = backend {
                debug!(backend = backend.kind().as_str(), "Stopping listening session");
                backend.stop().await;
            }
            self.set_phase(&mut inner, SessionPhase::Idle);
        }
        Ok(true)
    }

    /// Tears everything down: cancels the pending request, stops the
    /// live session, destroys every backend, and drops the loaded
    /// model. Always lands in Idle; a later `start_listening` builds a
    /// fresh session (the offline backend needs `init_model` again).
    pub async fn destroy(&self) -> Result<bool, SpeechError> {
        let mut inner = self.inner.lock().await;
        info!("Destroying speech recognizer");
        if let Some(tx) = inner.pending.take() {
            let _ = tx.send(Err(SpeechError::cancelled("Speech recognizer destroyed")));
        }
        inner.generation += 1;
        if let Some(session) = inner.session.take() {
            session.backend.stop().await;
        }
        for backend in self.selector.backends() {
            backend.destroy().await;
        }
        if let Some(provisioner) = &self.provisioner {
            provisioner.release();
        }
        self.set_phase(&mut inner, SessionPhase::Idle);
        Ok(true)
    }

    /// Applies one backend event to the state machine. Events from
    /// superseded sessions are dropped here.
    async fn on_backend_event(&self, generation: u64, event: BackendEvent) {
        let mut inner = self.inner.lock().await;
        if generation != inner.generation {
            debug!(
                generation,
                current = inner.generation,
                "Dropping stale backend event"
            );
            return;
        }
        match event {
            BackendEvent::Partial(values) => {
                if inner.phase == SessionPhase::Listening {
                    self.sink.emit(SpeechEvent::PartialResults { value: values });
                } else {
                    trace!("Dropping partial result outside listening");
                }
            }
            BackendEvent::EndOfSpeech => {
                // May legitimately trail the final result (a backend
                // flushing after stop), so only the generation gates it.
                self.sink.emit(SpeechEvent::End {});
            }
            BackendEvent::Final(values) => {
                if inner.phase == SessionPhase::Listening || inner.pending.is_some() {
                    self.complete_session(&mut inner, values).await;
                } else {
                    trace!("Dropping final result for settled session");
                }
            }
            BackendEvent::Error(err) => {
                if inner.phase == SessionPhase::Listening || inner.pending.is_some() {
                    self.fail_session(&mut inner, err.native_code, err.into())
                        .await;
                } else {
                    trace!("Dropping error for settled session");
                }
            }
            BackendEvent::Cancelled => {
                if inner.phase == SessionPhase::Listening || inner.pending.is_some() {
                    self.sink.emit(SpeechEvent::Error {
                        code: None,
                        message: "Speech recognition cancelled".to_string(),
                    });
                    if let Some(tx) = inner.pending.take() {
                        let _ =
                            tx.send(Err(SpeechError::cancelled("Speech recognition was cancelled")));
                    }
                    self.release_session(&mut inner).await;
                }
            }
        }
    }

    /// Final result: emit, resolve, clear, release, in that order.
    async fn complete_session(&self, inner: &mut Inner, values: Vec<String>) {
        if let Some(session) = &inner.session {
            debug!(
                backend = session.kind.as_str(),
                locale = %session.locale,
                results = values.len(),
                elapsed = ?session.started_at.elapsed(),
                "Session completed"
            );
        }
        self.set_phase(inner, SessionPhase::Completing);
        self.sink.emit(SpeechEvent::Results { value: values });
        if let Some(tx) = inner.pending.take() {
            let _ = tx.send(Ok(true));
        }
        self.release_session(inner).await;
    }

    /// Backend error: emit, reject, clear, release, in that order.
    async fn fail_session(&self, inner: &mut Inner, native_code: Option<i32>, err: SpeechError) {
        warn!(
            code = err.code.as_str(),
            native_code,
            message = %err.message,
            "Session failed"
        );
        self.set_phase(inner, SessionPhase::Error);
        self.sink.emit(SpeechEvent::Error {
            code: native_code,
            message: err.message.clone(),
        });
        if let Some(tx) = inner.pending.take() {
            let _ = tx.send(Err(err));
        }
        self.release_session(inner).await;
    }

    /// Start failure: reject the caller and emit the session error, the
    /// only event such a session produces.
    fn fail_start(&self, inner: &mut Inner, err: StartError) -> SpeechError {
        let speech = self.speech_error_for_start(&err);
        warn!(code = speech.code.as_str(), message = %speech.message, "Listening did not start");
        self.set_phase(inner, SessionPhase::Error);
        self.sink.emit(SpeechEvent::Error {
            code: None,
            message: speech.message.clone(),
        });
        self.set_phase(inner, SessionPhase::Idle);
        speech
    }

    fn speech_error_for_start(&self, err: &StartError) -> SpeechError {
        let message = match err {
            StartError::NoBackendAvailable {
                companion_missing: true,
            } => format!(
                "Speech recognition not available. {} is not installed.",
                self.selector.companion_package()
            ),
            StartError::NoBackendAvailable {
                companion_missing: false,
            } => "Speech recognition not available on this device".to_string(),
            other => other.to_string(),
        };
        SpeechError::new(err.code(), message)
    }

    /// Rejects the live pending request and stops its backend. Used by
    /// a superseding start.
    async fn cancel_current(&self, inner: &mut Inner, reason: &str) {
        if let Some(tx) = inner.pending.take() {
            debug!(reason, "Rejecting pending request");
            let _ = tx.send(Err(SpeechError::cancelled(reason)));
        }
        if let Some(session) = inner.session.take() {
            debug!(
                backend = session.kind.as_str(),
                elapsed = ?session.started_at.elapsed(),
                "Force-stopping previous session"
            );
            session.backend.stop().await;
        }
        if inner.phase != SessionPhase::Idle {
            self.set_phase(inner, SessionPhase::Idle);
        }
    }

    async fn release_session(&self, inner: &mut Inner) {
        if let Some(session) = inner.session.take() {
            session.backend.stop().await;
        }
        self.set_phase(inner, SessionPhase::Idle);
    }

    fn set_phase(&self, inner: &mut Inner, phase: SessionPhase) {
        if inner.phase != phase {
            trace!(
                from = inner.phase.as_str(),
                to = phase.as_str(),
                "Session phase change"
            );
            inner.phase = phase;
            self.listening
                .store(phase == SessionPhase::Listening, Ordering::SeqCst);
        }
    }
}
