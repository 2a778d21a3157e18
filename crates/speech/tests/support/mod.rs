#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};

use hearsay_speech::backend::{BackendKind, RecognitionBackend};
use hearsay_speech::error::StartError;
use hearsay_speech::events::SpeechEvent;
use hearsay_speech::model::{AcousticModel, DecodeStep, ModelLoader, UtteranceDecoder};
use hearsay_speech::platform::{
    AssetBundle, AudioCapture, AudioSource, AudioSpec, CaptureHandle, CaptureUiHost,
    CaptureUiOutcome, CaptureUiRequest, DirAssetBundle, LaunchError, PackageRegistry,
    RecognizeRequest, RecognizerHandle, RecognizerService, RecognizerSession, RecognizerSignal,
};
use hearsay_speech::session::SessionLink;

/// Receives the next speech event or fails the test after five seconds.
pub async fn next_event(rx: &mut broadcast::Receiver<SpeechEvent>) -> SpeechEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a speech event")
        .expect("event stream closed")
}

/// Everything already buffered on the subscription, without waiting.
pub fn drained_events(rx: &mut broadcast::Receiver<SpeechEvent>) -> Vec<SpeechEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Routes library tracing into the test harness. `RUST_LOG` picks the
/// verbosity; repeat calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

enum UiScript {
    Respond(CaptureUiOutcome),
    /// Drop the outcome sender so the UI looks like it died.
    Vanish,
    /// Hold the outcome sender so the attempt never settles on its own.
    Hang,
}

/// Capture UI host that replays scripted outcomes in launch order.
pub struct ScriptedCaptureUi {
    available: AtomicBool,
    scripts: Mutex<VecDeque<UiScript>>,
    held: Mutex<Vec<oneshot::Sender<CaptureUiOutcome>>>,
    pub requests: Mutex<Vec<CaptureUiRequest>>,
}

impl ScriptedCaptureUi {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            scripts: Mutex::new(VecDeque::new()),
            held: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        let ui = Self::new();
        ui.available.store(false, Ordering::SeqCst);
        ui
    }

    pub fn push_results(&self, values: &[&str]) {
        let values = values.iter().map(|v| v.to_string()).collect();
        self.scripts
            .lock()
            .push_back(UiScript::Respond(CaptureUiOutcome::Results(values)));
    }

    pub fn push_cancelled(&self) {
        self.scripts
            .lock()
            .push_back(UiScript::Respond(CaptureUiOutcome::Cancelled));
    }

    pub fn push_vanish(&self) {
        self.scripts.lock().push_back(UiScript::Vanish);
    }

    pub fn push_hang(&self) {
        self.scripts.lock().push_back(UiScript::Hang);
    }
}

impl CaptureUiHost for ScriptedCaptureUi {
    fn resolves_capture_intent(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn launch(
        &self,
        request: CaptureUiRequest,
    ) -> Result<oneshot::Receiver<CaptureUiOutcome>, LaunchError> {
        self.requests.lock().push(request);
        let (tx, rx) = oneshot::channel();
        match self.scripts.lock().pop_front() {
            Some(UiScript::Respond(outcome)) => {
                let _ = tx.send(outcome);
            }
            Some(UiScript::Hang) => self.held.lock().push(tx),
            Some(UiScript::Vanish) | None => drop(tx),
        }
        Ok(rx)
    }
}

/// One scripted streaming session: signals delivered on open, and
/// signals the service flushes when the caller stops it.
pub struct RecognizerScript {
    pub immediate: Vec<RecognizerSignal>,
    pub on_stop: Vec<RecognizerSignal>,
    /// Close the signal channel right after the immediate signals, as a
    /// service that dies mid-session would.
    pub close_after_immediate: bool,
}

impl RecognizerScript {
    /// A session whose whole story is known up front.
    pub fn flow(immediate: Vec<RecognizerSignal>) -> Self {
        Self {
            immediate,
            on_stop: Vec::new(),
            close_after_immediate: false,
        }
    }

    /// A session that only produces its terminal signals once stopped.
    pub fn stop_flush(immediate: Vec<RecognizerSignal>, on_stop: Vec<RecognizerSignal>) -> Self {
        Self {
            immediate,
            on_stop,
            close_after_immediate: false,
        }
    }

    /// A session whose signal stream dies after the given signals.
    pub fn dying(immediate: Vec<RecognizerSignal>) -> Self {
        Self {
            immediate,
            on_stop: Vec::new(),
            close_after_immediate: true,
        }
    }
}

/// Streaming recognizer service that replays scripted sessions. An
/// unscripted `begin` is rejected.
pub struct ScriptedRecognizer {
    available: AtomicBool,
    scripts: Mutex<VecDeque<RecognizerScript>>,
    pub requests: Mutex<Vec<RecognizeRequest>>,
    pub stops: Arc<AtomicUsize>,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn push(&self, script: RecognizerScript) {
        self.scripts.lock().push_back(script);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecognizerService for ScriptedRecognizer {
    fn is_recognition_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn begin(&self, request: RecognizeRequest) -> anyhow::Result<RecognizerSession> {
        self.requests.lock().push(request);
        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("recognizer service rejected the session"))?;
        let (tx, rx) = mpsc::channel(64);
        for signal in script.immediate {
            let _ = tx.try_send(signal);
        }
        let tx = (!script.close_after_immediate).then_some(tx);
        Ok(RecognizerSession {
            signals: rx,
            handle: Box::new(ScriptedRecognizerHandle {
                tx,
                flush: script.on_stop,
                stops: self.stops.clone(),
            }),
        })
    }
}

struct ScriptedRecognizerHandle {
    tx: Option<mpsc::Sender<RecognizerSignal>>,
    flush: Vec<RecognizerSignal>,
    stops: Arc<AtomicUsize>,
}

impl RecognizerHandle for ScriptedRecognizerHandle {
    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.tx.take() {
            for signal in self.flush.drain(..) {
                let _ = tx.try_send(signal);
            }
        }
    }
}

/// Frames delivered to one opened capture.
pub struct AudioScript {
    pub frames: Vec<Vec<i16>>,
    /// Keep the stream open after the scripted frames, so only an
    /// explicit close (or the utterance cap) ends it.
    pub hold_open: bool,
}

/// Microphone source that replays scripted frame sequences.
pub struct ScriptedAudioSource {
    scripts: Mutex<VecDeque<AudioScript>>,
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

impl ScriptedAudioSource {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn push(&self, script: AudioScript) {
        self.scripts.lock().push_back(script);
    }
}

#[async_trait]
impl AudioSource for ScriptedAudioSource {
    async fn open(&self, spec: AudioSpec) -> anyhow::Result<AudioCapture> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no microphone scripted for this open"))?;
        let (tx, rx) = mpsc::channel(64);
        for frame in script.frames {
            let _ = tx.try_send(frame);
        }
        let tx = script.hold_open.then_some(tx);
        Ok(AudioCapture {
            sample_rate: spec.sample_rate,
            frames: rx,
            handle: Box::new(ScriptedCaptureHandle {
                tx,
                closed: false,
                closes: self.closes.clone(),
            }),
        })
    }
}

struct ScriptedCaptureHandle {
    tx: Option<mpsc::Sender<Vec<i16>>>,
    closed: bool,
    closes: Arc<AtomicUsize>,
}

impl CaptureHandle for ScriptedCaptureHandle {
    fn close(&mut self) {
        self.tx = None;
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// How one stubbed decoder reacts: one step per accepted frame (extra
/// frames buffer), plus what `finalize` flushes.
pub struct DecoderScript {
    pub steps: Vec<DecodeStep>,
    pub flush: Option<String>,
}

/// Model loader returning stub models whose decoders replay
/// [`DecoderScript`]s in creation order.
pub struct StubLoader {
    scripts: Arc<Mutex<VecDeque<DecoderScript>>>,
    pub loads: Arc<AtomicUsize>,
    pub fail: Arc<AtomicBool>,
}

impl StubLoader {
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(Mutex::new(VecDeque::new())),
            loads: Arc::new(AtomicUsize::new(0)),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn push_decoder(&self, script: DecoderScript) {
        self.scripts.lock().push_back(script);
    }
}

impl ModelLoader for StubLoader {
    fn load(&self, dir: &Path) -> anyhow::Result<Arc<dyn AcousticModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("model directory {} is unreadable", dir.display());
        }
        Ok(Arc::new(StubModel {
            scripts: self.scripts.clone(),
        }))
    }
}

struct StubModel {
    scripts: Arc<Mutex<VecDeque<DecoderScript>>>,
}

impl AcousticModel for StubModel {
    fn create_decoder(&self, _sample_rate: u32) -> anyhow::Result<Box<dyn UtteranceDecoder>> {
        let script = self.scripts.lock().pop_front().unwrap_or(DecoderScript {
            steps: Vec::new(),
            flush: None,
        });
        Ok(Box::new(StubDecoder {
            steps: script.steps.into(),
            flush: script.flush,
        }))
    }
}

struct StubDecoder {
    steps: VecDeque<DecodeStep>,
    flush: Option<String>,
}

impl UtteranceDecoder for StubDecoder {
    fn accept_frame(&mut self, _frame: &[i16]) -> anyhow::Result<DecodeStep> {
        Ok(self.steps.pop_front().unwrap_or(DecodeStep::Buffering))
    }

    fn finalize(&mut self) -> anyhow::Result<Option<String>> {
        Ok(self.flush.take())
    }
}

/// Backend double that records calls and hands its session links to the
/// test, which then plays the backend's part by posting through them.
pub struct MockBackend {
    kind: BackendKind,
    available: AtomicBool,
    start_error: Mutex<Option<StartError>>,
    pub links: Mutex<Vec<SessionLink>>,
    pub locales: Mutex<Vec<String>>,
    pub stops: Arc<AtomicUsize>,
    pub destroys: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new(kind: BackendKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            available: AtomicBool::new(true),
            start_error: Mutex::new(None),
            links: Mutex::new(Vec::new()),
            locales: Mutex::new(Vec::new()),
            stops: Arc::new(AtomicUsize::new(0)),
            destroys: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn failing(kind: BackendKind, err: StartError) -> Arc<Self> {
        let backend = Self::new(kind);
        *backend.start_error.lock() = Some(err);
        backend
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// The link the n-th started session was given.
    pub fn link(&self, index: usize) -> SessionLink {
        self.links.lock()[index].clone()
    }
}

#[async_trait]
impl RecognitionBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn probe(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn start(&self, locale: &str, link: SessionLink) -> Result<(), StartError> {
        if let Some(err) = self.start_error.lock().clone() {
            return Err(err);
        }
        self.locales.lock().push(locale.to_owned());
        self.links.lock().push(link);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    async fn destroy(&self) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
    }
}

/// Package registry answering the same for every package.
pub struct StaticPackages(pub bool);

impl PackageRegistry for StaticPackages {
    fn is_package_installed(&self, _name: &str) -> bool {
        self.0
    }
}

/// Writes a small model tree under `<root>/<name>` and returns a bundle
/// rooted at `root`, so `name` is the bundle path of the model.
pub fn write_model_assets(root: &Path, name: &str) -> DirAssetBundle {
    let model = root.join(name);
    fs::create_dir_all(model.join("am")).expect("create model dirs");
    fs::create_dir_all(model.join("conf")).expect("create model dirs");
    fs::write(model.join("README"), b"small test model").expect("write asset");
    fs::write(model.join("am/final.mdl"), b"acoustic weights").expect("write asset");
    fs::write(model.join("conf/model.conf"), b"--sample-frequency=16000").expect("write asset");
    DirAssetBundle::new(root)
}

/// Bundle wrapper counting leaf opens, to prove extraction did not run
/// again.
pub struct CountingBundle {
    inner: DirAssetBundle,
    pub opens: Arc<AtomicUsize>,
}

impl CountingBundle {
    pub fn new(inner: DirAssetBundle) -> Self {
        Self {
            inner,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl AssetBundle for CountingBundle {
    fn entries(&self, path: &str) -> io::Result<Vec<String>> {
        self.inner.entries(path)
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open(path)
    }
}

/// Bundle wrapper that fails opening one leaf while armed, simulating a
/// copy torn off halfway.
pub struct FailingBundle {
    inner: DirAssetBundle,
    fail_path: String,
    pub armed: Arc<AtomicBool>,
}

impl FailingBundle {
    pub fn new(inner: DirAssetBundle, fail_path: impl Into<String>) -> Self {
        Self {
            inner,
            fail_path: fail_path.into(),
            armed: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl AssetBundle for FailingBundle {
    fn entries(&self, path: &str) -> io::Result<Vec<String>> {
        self.inner.entries(path)
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        if self.armed.load(Ordering::SeqCst) && path == self.fail_path {
            return Err(io::Error::new(io::ErrorKind::Other, "asset read failed"));
        }
        self.inner.open(path)
    }
}
