use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// A session notification. Serializes to the wire shape event consumers
/// expect: `{"event": "<name>", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum SpeechEvent {
    /// Capture began.
    #[serde(rename = "onSpeechStart")]
    Start {},
    /// Interim transcript hypotheses, best first. May fire repeatedly.
    #[serde(rename = "onSpeechPartialResults")]
    PartialResults { value: Vec<String> },
    /// Final transcript hypotheses, best first. At most one per session.
    #[serde(rename = "onSpeechResults")]
    Results { value: Vec<String> },
    /// Capture ended.
    #[serde(rename = "onSpeechEnd")]
    End {},
    /// The session failed. `code` is the recognizer-native error code
    /// when the failure came from a recognizer.
    #[serde(rename = "onSpeechError")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        message: String,
    },
}

impl SpeechEvent {
    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            SpeechEvent::Start {} => "onSpeechStart",
            SpeechEvent::PartialResults { .. } => "onSpeechPartialResults",
            SpeechEvent::Results { .. } => "onSpeechResults",
            SpeechEvent::End {} => "onSpeechEnd",
            SpeechEvent::Error { .. } => "onSpeechError",
        }
    }
}

/// Broadcast fan-out for [`SpeechEvent`]s, decoupled from request
/// completion.
///
/// Emission is fire-and-forget and best-effort: a send with no live
/// subscribers is logged at debug level and dropped, never escalating
/// into the session. Per-session ordering (start before results, at
/// most one of results/error) comes from every emission happening
/// inside the controller's serialized transition section.
#[derive(Debug)]
pub struct EventSink {
    tx: broadcast::Sender<SpeechEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeechEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: SpeechEvent) {
        trace!(event = event.name(), "Emitting speech event");
        if self.tx.send(event).is_err() {
            debug!("No speech event subscribers");
        }
    }
}
