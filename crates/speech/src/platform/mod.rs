use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

#[cfg(feature = "cpal")]
pub mod cpal;
#[cfg(feature = "cpal")]
pub use self::cpal::CpalAudioSource;

/// Request handed to the external capture UI.
#[derive(Debug, Clone)]
pub struct CaptureUiRequest {
    /// Locale tag for recognition (e.g. "en-US").
    pub locale: String,
    /// Prompt shown to the user while the UI listens.
    pub prompt: String,
    /// Maximum number of transcript hypotheses to return.
    pub max_results: usize,
}

/// What the external capture UI came back with.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureUiOutcome {
    /// Ranked transcript hypotheses, best first.
    Results(Vec<String>),
    /// The user dismissed the UI without a result.
    Cancelled,
}

/// Launch-time failures of the external capture UI.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LaunchError {
    /// There is no foreground host to launch the UI from.
    #[error("no host available to present the capture UI")]
    NoHost,
    #[error("failed to launch the capture UI: {0}")]
    Failed(String),
}

/// Host environment able to present an external recognition UI.
///
/// `launch` validates and fires the UI synchronously; the outcome
/// arrives later through the returned receiver. A dropped sender counts
/// as a cancellation.
pub trait CaptureUiHost: Send + Sync {
    /// Whether any installed component can handle the capture intent.
    fn resolves_capture_intent(&self) -> bool;

    fn launch(
        &self,
        request: CaptureUiRequest,
    ) -> Result<oneshot::Receiver<CaptureUiOutcome>, LaunchError>;
}

/// Request opening a streaming recognition session.
#[derive(Debug, Clone)]
pub struct RecognizeRequest {
    pub locale: String,
    pub max_results: usize,
    /// Whether the service should stream interim hypotheses.
    pub partial_results: bool,
}

/// Callbacks a streaming recognizer produces. Per session, in order:
/// ready-for-speech, beginning-of-speech, zero or more partials,
/// end-of-speech, then exactly one final or one error.
#[derive(Debug, Clone)]
pub enum RecognizerSignal {
    ReadyForSpeech,
    BeginningOfSpeech,
    Partial(Vec<String>),
    EndOfSpeech,
    Final(Vec<String>),
    /// Recognizer-native error code.
    Error(i32),
}

/// Control side of an open streaming session.
pub trait RecognizerHandle: Send {
    /// Stops capture. The service still flushes its terminal signal
    /// (final or error) before closing the stream. Idempotent.
    fn stop(&mut self);
}

/// A live streaming recognition session.
pub struct RecognizerSession {
    pub signals: mpsc::Receiver<RecognizerSignal>,
    pub handle: Box<dyn RecognizerHandle>,
}

/// Device-local streaming recognizer service.
#[async_trait]
pub trait RecognizerService: Send + Sync {
    /// Whether the device reports a direct recognizer right now.
    fn is_recognition_available(&self) -> bool;

    async fn begin(&self, request: RecognizeRequest) -> anyhow::Result<RecognizerSession>;
}

/// Capture format requested from the microphone (mono PCM16).
#[derive(Debug, Clone, Copy)]
pub struct AudioSpec {
    pub sample_rate: u32,
}

/// Owner of an open microphone. Closing it releases the device and ends
/// the frame stream.
pub trait CaptureHandle: Send {
    /// Releases the microphone. Idempotent.
    fn close(&mut self);
}

/// An open microphone stream.
pub struct AudioCapture {
    /// The rate frames are actually delivered at. Sources that cannot
    /// capture at the requested rate report the device-native one here.
    pub sample_rate: u32,
    pub frames: mpsc::Receiver<Vec<i16>>,
    pub handle: Box<dyn CaptureHandle>,
}

/// Exclusive microphone access. At most one capture may be open at a
/// time; the orchestrator releases the old handle before opening a new
/// one.
#[async_trait]
pub trait AudioSource: Send + Sync {
    async fn open(&self, spec: AudioSpec) -> anyhow::Result<AudioCapture>;
}

/// Package-presence lookup. Used only to sharpen the "not available"
/// error message when no backend can run.
pub trait PackageRegistry: Send + Sync {
    fn is_package_installed(&self, name: &str) -> bool;
}

/// Read-only bundled asset tree.
///
/// Mirrors asset-manager semantics: an entry is a directory exactly
/// when listing it yields child entries; leaves are opened for reading.
pub trait AssetBundle: Send + Sync {
    /// Child entry names under `path` (`""` is the bundle root). A leaf
    /// entry lists as empty.
    fn entries(&self, path: &str) -> io::Result<Vec<String>>;

    /// Opens a leaf entry for reading.
    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send>>;
}

/// Filesystem-backed [`AssetBundle`] rooted at a directory, for hosts
/// that ship assets as plain files.
#[derive(Debug, Clone)]
pub struct DirAssetBundle {
    root: PathBuf,
}

impl DirAssetBundle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetBundle for DirAssetBundle {
    fn entries(&self, path: &str) -> io::Result<Vec<String>> {
        let full = if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        };
        if full.is_file() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&full)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(self.root.join(path))?))
    }
}
