use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable string codes carried by caller-facing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No backend can run on this device right now.
    NotAvailable,
    /// The offline model has not been provisioned yet.
    NotReady,
    /// A backend failed while beginning a session.
    StartError,
    /// The recognizer failed mid-session.
    RecognitionError,
    /// Model provisioning failed.
    InitError,
    /// The session was cancelled (explicitly or by a superseding start).
    Cancelled,
    /// The host environment cannot present a capture UI.
    NoActivity,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotAvailable => "not_available",
            ErrorCode::NotReady => "not_ready",
            ErrorCode::StartError => "start_error",
            ErrorCode::RecognitionError => "recognition_error",
            ErrorCode::InitError => "init_error",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::NoActivity => "no_activity",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller-facing failure: stable code plus human-readable message.
///
/// The typed internal errors ([`StartError`], [`RecognitionError`],
/// [`ProvisionError`]) normalize into this at the session boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct SpeechError {
    pub code: ErrorCode,
    pub message: String,
}

impl SpeechError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message)
    }
}

/// Fixed taxonomy for recognizer-native failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionErrorKind {
    Audio,
    Client,
    Permission,
    Network,
    NetworkTimeout,
    NoMatch,
    Busy,
    Server,
    SpeechTimeout,
    Unknown,
}

impl RecognitionErrorKind {
    /// Maps a recognizer-native error code onto the taxonomy. Total:
    /// every code maps to exactly one member, anything unrecognized
    /// lands on `Unknown`.
    pub fn from_native(code: i32) -> Self {
        match code {
            1 => RecognitionErrorKind::NetworkTimeout,
            2 => RecognitionErrorKind::Network,
            3 => RecognitionErrorKind::Audio,
            4 => RecognitionErrorKind::Server,
            5 => RecognitionErrorKind::Client,
            6 => RecognitionErrorKind::SpeechTimeout,
            7 => RecognitionErrorKind::NoMatch,
            8 => RecognitionErrorKind::Busy,
            9 => RecognitionErrorKind::Permission,
            _ => RecognitionErrorKind::Unknown,
        }
    }

    /// Human-readable message for event consumers.
    pub fn message(&self) -> &'static str {
        match self {
            RecognitionErrorKind::Audio => "Audio recording error",
            RecognitionErrorKind::Client => "Client side error",
            RecognitionErrorKind::Permission => "Insufficient permissions",
            RecognitionErrorKind::Network => "Network error",
            RecognitionErrorKind::NetworkTimeout => "Network timeout",
            RecognitionErrorKind::NoMatch => "No recognition result matched",
            RecognitionErrorKind::Busy => "Recognition service busy",
            RecognitionErrorKind::Server => "Server error",
            RecognitionErrorKind::SpeechTimeout => "No speech input",
            RecognitionErrorKind::Unknown => "Unknown error",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecognitionErrorKind::Audio => "audio",
            RecognitionErrorKind::Client => "client",
            RecognitionErrorKind::Permission => "permission",
            RecognitionErrorKind::Network => "network",
            RecognitionErrorKind::NetworkTimeout => "network_timeout",
            RecognitionErrorKind::NoMatch => "no_match",
            RecognitionErrorKind::Busy => "busy",
            RecognitionErrorKind::Server => "server",
            RecognitionErrorKind::SpeechTimeout => "speech_timeout",
            RecognitionErrorKind::Unknown => "unknown",
        }
    }
}

/// A normalized recognizer failure: the taxonomy member plus the native
/// code it was mapped from, when one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{}", .kind.message())]
pub struct RecognitionError {
    pub kind: RecognitionErrorKind,
    pub native_code: Option<i32>,
}

impl RecognitionError {
    pub fn new(kind: RecognitionErrorKind) -> Self {
        Self {
            kind,
            native_code: None,
        }
    }

    pub fn from_native(code: i32) -> Self {
        Self {
            kind: RecognitionErrorKind::from_native(code),
            native_code: Some(code),
        }
    }

    pub fn message(&self) -> &'static str {
        self.kind.message()
    }
}

impl From<RecognitionError> for SpeechError {
    fn from(err: RecognitionError) -> Self {
        SpeechError::new(ErrorCode::RecognitionError, err.message())
    }
}

/// Why a backend could not begin a session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StartError {
    /// No backend passed its capability probe. `companion_missing` is
    /// true when the configured companion package is absent, so the
    /// caller can suggest installing it.
    #[error("no speech recognition backend is available")]
    NoBackendAvailable { companion_missing: bool },
    /// The host cannot present the external capture UI.
    #[error("No activity available")]
    NoActivity,
    /// The offline model is not provisioned; `init_model` has to run
    /// first.
    #[error("Speech recognition model is not ready")]
    ModelNotReady,
    /// Opening the microphone failed.
    #[error("Failed to open audio capture: {0}")]
    Audio(String),
    /// The underlying recognizer refused to start.
    #[error("Failed to start listening: {0}")]
    Service(String),
}

impl StartError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StartError::NoBackendAvailable { .. } => ErrorCode::NotAvailable,
            StartError::NoActivity => ErrorCode::NoActivity,
            StartError::ModelNotReady => ErrorCode::NotReady,
            StartError::Audio(_) | StartError::Service(_) => ErrorCode::StartError,
        }
    }
}

/// Why the offline model could not be provisioned.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProvisionError {
    #[error("model extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("model load failed: {0}")]
    LoadFailed(String),
}

impl From<ProvisionError> for SpeechError {
    fn from(err: ProvisionError) -> Self {
        SpeechError::new(ErrorCode::InitError, err.to_string())
    }
}
