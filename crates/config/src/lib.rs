use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Runtime settings for the speech recognition orchestrator.
///
/// Loading is layered: built-in defaults, overridden by an optional
/// `hearsay.toml`, overridden by `HEARSAY_*` environment variables
/// (e.g. `HEARSAY_MAX_RESULTS=3`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    /// Locale tag used when the caller passes none (e.g. "en-US").
    pub default_locale: String,
    /// Prompt the external capture UI shows while listening.
    pub prompt: String,
    /// Maximum number of transcript hypotheses requested per session.
    pub max_results: usize,
    /// Whether backends should stream interim hypotheses.
    pub partial_results: bool,
    /// Capture sample rate in Hz (mono PCM16).
    pub sample_rate: u32,
    /// Hard cap on a single offline utterance, in seconds. Captures that
    /// run longer end with a speech-timeout error. 0 disables the cap.
    pub max_speech_secs: u64,
    /// Logical name of the bundled offline model; also the directory name
    /// the model is extracted under.
    pub model_name: String,
    /// Writable root for extracted models. `None` resolves to the
    /// per-user data directory.
    pub storage_root: Option<PathBuf>,
    /// Package providing the system recognizer on intent-based hosts.
    /// Only used to produce a more helpful "not available" message.
    pub companion_package: String,
    /// Capacity of the speech event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            default_locale: "en-US".to_string(),
            prompt: "Speak now...".to_string(),
            max_results: 5,
            partial_results: true,
            sample_rate: 16_000,
            max_speech_secs: 60,
            model_name: "vosk-model-small-en-us-0.15".to_string(),
            storage_root: None,
            companion_package: "com.google.android.googlequicksearchbox".to_string(),
            event_capacity: 64,
        }
    }
}

impl SpeechSettings {
    /// Loads settings from `hearsay.toml` (if present) and `HEARSAY_*`
    /// environment variables, on top of the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(File::with_name("hearsay").required(false))
    }

    /// Loads settings from an explicit file path plus `HEARSAY_*`
    /// environment variables.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::build(File::from(path))
    }

    fn build(file: File<config::FileSourceFile, config::FileFormat>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("HEARSAY"))
            .build()?
            .try_deserialize()
    }

    /// The directory extracted models live under: the configured
    /// `storage_root`, or the per-user data directory, or (last resort)
    /// a subdirectory of the system temp dir.
    pub fn storage_dir(&self) -> PathBuf {
        if let Some(root) = &self.storage_root {
            return root.clone();
        }
        match ProjectDirs::from("", "", "hearsay") {
            Some(dirs) => dirs.data_dir().to_path_buf(),
            None => std::env::temp_dir().join("hearsay"),
        }
    }
}
