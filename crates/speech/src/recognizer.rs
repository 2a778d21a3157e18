use std::sync::Arc;
use std::time::Duration;

use hearsay_config::SpeechSettings;
use tokio::sync::broadcast;
use tracing::info;

use crate::backend::{ActivityBackend, OfflineBackend, RecognitionBackend, StreamingBackend};
use crate::error::SpeechError;
use crate::events::SpeechEvent;
use crate::model::ModelLoader;
use crate::platform::{AssetBundle, AudioSource, CaptureUiHost, PackageRegistry, RecognizerService};
use crate::provision::{ModelProvisioner, ReadyState};
use crate::selector::BackendSelector;
use crate::session::SessionController;

/// Hosts with no package lookup treat the companion app as present, so
/// an unavailability error never blames a missing app it cannot see.
struct AllPackagesPresent;

impl PackageRegistry for AllPackagesPresent {
    fn is_package_installed(&self, _name: &str) -> bool {
        true
    }
}

/// One speech recognizer over whatever backends the host wired in.
///
/// Cheap to clone; clones share the same session, so a `stop_listening`
/// on one clone stops a session started on another.
#[derive(Clone)]
pub struct SpeechRecognizer {
    controller: Arc<SessionController>,
    provisioner: Option<Arc<ModelProvisioner>>,
}

impl SpeechRecognizer {
    pub fn builder(settings: SpeechSettings) -> SpeechRecognizerBuilder {
        SpeechRecognizerBuilder::new(settings)
    }

    /// Assembles a recognizer from an explicit backend list, bypassing
    /// the platform wiring. Selection tries the backends in order.
    pub fn with_backends(
        settings: &SpeechSettings,
        backends: Vec<Arc<dyn RecognitionBackend>>,
        packages: Arc<dyn PackageRegistry>,
        provisioner: Option<Arc<ModelProvisioner>>,
    ) -> Self {
        let selector = BackendSelector::new(backends, packages, settings.companion_package.clone());
        let controller = SessionController::new(
            selector,
            provisioner.clone(),
            settings.default_locale.clone(),
            settings.event_capacity,
        );
        Self {
            controller,
            provisioner,
        }
    }

    /// Whether any backend could start a session right now.
    pub async fn is_available(&self) -> bool {
        self.controller.is_available().await
    }

    /// Starts listening and resolves once the session settles:
    /// `Ok(true)` after a delivered final result, otherwise the error
    /// that ended the session. A live session is superseded first.
    pub async fn start_listening(&self, locale: Option<&str>) -> Result<bool, SpeechError> {
        self.controller.start_listening(locale).await
    }

    /// Releases capture for the live session. Always `Ok(true)`; the
    /// session's own outcome still arrives through `start_listening` /
    /// the event stream.
    pub async fn stop_listening(&self) -> Result<bool, SpeechError> {
        self.controller.stop_listening().await
    }

    pub fn is_listening(&self) -> bool {
        self.controller.is_listening()
    }

    /// Extracts and loads the offline model. Resolves `true` once
    /// Ready; repeat calls are cheap.
    pub async fn init_model(&self) -> Result<bool, SpeechError> {
        self.controller.init_model().await
    }

    /// Offline model readiness, if an offline engine is configured.
    pub fn model_state(&self) -> Option<ReadyState> {
        self.provisioner.as_ref().map(|p| p.ready_state())
    }

    /// Tears down sessions, backends, and the loaded model.
    pub async fn destroy(&self) -> Result<bool, SpeechError> {
        self.controller.destroy().await
    }

    /// Subscribes to the session event stream. Slow subscribers lag and
    /// lose the oldest events rather than blocking the session.
    pub fn subscribe(&self) -> broadcast::Receiver<SpeechEvent> {
        self.controller.subscribe()
    }
}

/// Wires platform collaborators into backends.
///
/// Every collaborator is optional; a backend whose collaborators are
/// missing is simply not registered. Selection order is fixed: capture
/// UI first, then the streaming recognizer, then the offline model.
pub struct SpeechRecognizerBuilder {
    settings: SpeechSettings,
    capture_ui: Option<Arc<dyn CaptureUiHost>>,
    recognizer: Option<Arc<dyn RecognizerService>>,
    audio: Option<Arc<dyn AudioSource>>,
    assets: Option<Arc<dyn AssetBundle>>,
    loader: Option<Arc<dyn ModelLoader>>,
    packages: Option<Arc<dyn PackageRegistry>>,
}

impl SpeechRecognizerBuilder {
    pub fn new(settings: SpeechSettings) -> Self {
        Self {
            settings,
            capture_ui: None,
            recognizer: None,
            audio: None,
            assets: None,
            loader: None,
            packages: None,
        }
    }

    /// Host environment that can launch an external capture UI.
    pub fn capture_ui(mut self, host: Arc<dyn CaptureUiHost>) -> Self {
        self.capture_ui = Some(host);
        self
    }

    /// Platform streaming recognizer service.
    pub fn recognizer_service(mut self, service: Arc<dyn RecognizerService>) -> Self {
        self.recognizer = Some(service);
        self
    }

    /// Microphone source for the offline backend.
    pub fn audio_source(mut self, audio: Arc<dyn AudioSource>) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Read-only asset tree holding the bundled model.
    pub fn asset_bundle(mut self, assets: Arc<dyn AssetBundle>) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Engine that loads the extracted model directory.
    pub fn model_loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Package lookup used to explain unavailability.
    pub fn package_registry(mut self, packages: Arc<dyn PackageRegistry>) -> Self {
        self.packages = Some(packages);
        self
    }

    pub fn build(self) -> SpeechRecognizer {
        let settings = self.settings;
        let mut backends: Vec<Arc<dyn RecognitionBackend>> = Vec::new();

        if let Some(host) = self.capture_ui {
            backends.push(Arc::new(ActivityBackend::new(
                host,
                settings.prompt.clone(),
                settings.max_results,
            )));
        }
        if let Some(service) = self.recognizer {
            backends.push(Arc::new(StreamingBackend::new(
                service,
                settings.max_results,
                settings.partial_results,
            )));
        }

        let provisioner = match (self.assets, self.loader) {
            (Some(assets), Some(loader)) => Some(Arc::new(ModelProvisioner::new(
                assets,
                loader,
                settings.storage_dir(),
                settings.model_name.clone(),
            ))),
            _ => None,
        };
        if let (Some(provisioner), Some(audio)) = (&provisioner, self.audio) {
            backends.push(Arc::new(OfflineBackend::new(
                provisioner.clone(),
                audio,
                settings.sample_rate,
                Duration::from_secs(settings.max_speech_secs),
            )));
        }

        let packages = self
            .packages
            .unwrap_or_else(|| Arc::new(AllPackagesPresent));
        info!(
            backends = backends.len(),
            offline = provisioner.is_some(),
            "Speech recognizer assembled"
        );
        SpeechRecognizer::with_backends(&settings, backends, packages, provisioner)
    }
}
