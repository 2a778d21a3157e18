use async_trait::async_trait;

use crate::error::{RecognitionError, StartError};
use crate::session::SessionLink;

mod activity;
mod offline;
mod streaming;

pub use activity::ActivityBackend;
pub use offline::OfflineBackend;
pub use streaming::StreamingBackend;

/// Identifies a backend in logs and selection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Delegates to a companion capture UI that returns final results.
    Activity,
    /// Streams through an always-on platform recognizer service.
    Streaming,
    /// Runs a local acoustic model over captured audio.
    Offline,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Activity => "activity",
            BackendKind::Streaming => "streaming",
            BackendKind::Offline => "offline",
        }
    }
}

/// What a running recognition attempt reports back to its session.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// Interim hypotheses, best first.
    Partial(Vec<String>),
    /// Final hypotheses, best first. Completes the attempt.
    Final(Vec<String>),
    /// The user stopped talking; a final result or error follows.
    EndOfSpeech,
    /// The attempt failed. Completes the attempt.
    Error(RecognitionError),
    /// The user abandoned the attempt (capture UI dismissed).
    Cancelled,
}

/// One capture strategy behind a uniform contract; the session
/// controller neither knows nor cares which strategy it is driving.
///
/// `start` either begins an attempt and returns `Ok`, after which the
/// backend drives the session exclusively through `link.post`, or fails
/// fast with a [`StartError`] and posts nothing. `stop` ends audio
/// capture for the current attempt; implementations that can still
/// produce a result from audio already captured flush it through the
/// link afterwards. Both `stop` and `destroy` are idempotent.
#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Answers whether this backend could start right now. Probed fresh
    /// on every selection pass.
    async fn probe(&self) -> bool;

    async fn start(&self, locale: &str, link: SessionLink) -> Result<(), StartError>;

    async fn stop(&self);

    async fn destroy(&self);
}
