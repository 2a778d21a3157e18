use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::ProvisionError;
use crate::model::{AcousticModel, ModelLoader};
use crate::platform::AssetBundle;

/// Fixed-size transfer buffer for asset extraction.
const COPY_BUFFER_BYTES: usize = 8 * 1024;
/// Suffix of the staging directory extraction writes into before the
/// atomic publish rename.
const STAGING_SUFFIX: &str = ".extracting";

/// Readiness of the offline model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    NotExtracted,
    Extracting,
    Ready,
    Failed,
}

impl ReadyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyState::NotExtracted => "not_extracted",
            ReadyState::Extracting => "extracting",
            ReadyState::Ready => "ready",
            ReadyState::Failed => "failed",
        }
    }
}

enum ProvisionState {
    NotExtracted,
    Extracting,
    Ready(Arc<dyn AcousticModel>),
    Failed(String),
}

/// Extracts the bundled model into writable storage once and loads it.
///
/// Extraction is atomic from the caller's perspective: files are copied
/// into a staging directory next to the destination and published with
/// a single `fs::rename`, and a failure removes the staging tree. The
/// destination directory therefore only ever holds a complete
/// extraction, which is what makes "directory exists" a trustworthy
/// skip signal on later calls.
///
/// The loaded model is the long-lived shared resource behind the offline
/// backend; it outlives sessions and is only released by [`release`]
/// (orchestrator destroy).
///
/// [`release`]: ModelProvisioner::release
pub struct ModelProvisioner {
    assets: Arc<dyn AssetBundle>,
    loader: Arc<dyn ModelLoader>,
    storage_root: PathBuf,
    model_name: String,
    /// Serializes `ensure_ready` callers so two extractions never race
    /// toward the same destination.
    work: Mutex<()>,
    /// Snapshot for non-blocking probes.
    state: RwLock<ProvisionState>,
}

impl ModelProvisioner {
    pub fn new(
        assets: Arc<dyn AssetBundle>,
        loader: Arc<dyn ModelLoader>,
        storage_root: impl Into<PathBuf>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            assets,
            loader,
            storage_root: storage_root.into(),
            model_name: model_name.into(),
            work: Mutex::new(()),
            state: RwLock::new(ProvisionState::NotExtracted),
        }
    }

    /// Destination directory of the extracted model.
    pub fn model_dir(&self) -> PathBuf {
        self.storage_root.join(&self.model_name)
    }

    pub fn ready_state(&self) -> ReadyState {
        match &*self.state.read() {
            ProvisionState::NotExtracted => ReadyState::NotExtracted,
            ProvisionState::Extracting => ReadyState::Extracting,
            ProvisionState::Ready(_) => ReadyState::Ready,
            ProvisionState::Failed(_) => ReadyState::Failed,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.state.read(), ProvisionState::Ready(_))
    }

    /// Handle to the loaded model, if Ready.
    pub fn model(&self) -> Option<Arc<dyn AcousticModel>> {
        match &*self.state.read() {
            ProvisionState::Ready(model) => Some(model.clone()),
            _ => None,
        }
    }

    /// Ensures the model is extracted and loaded, returning its handle.
    ///
    /// Idempotent and re-entrant: concurrent callers serialize, repeat
    /// callers get the already-loaded handle, and a destination left by
    /// an earlier run is loaded without re-copying anything. The file
    /// I/O and the load run on a blocking task.
    pub async fn ensure_ready(&self) -> Result<Arc<dyn AcousticModel>, ProvisionError> {
        let _work = self.work.lock().await;
        if let Some(model) = self.model() {
            return Ok(model);
        }
        *self.state.write() = ProvisionState::Extracting;

        let assets = self.assets.clone();
        let loader = self.loader.clone();
        let model_name = self.model_name.clone();
        let dest = self.model_dir();
        let outcome = tokio::task::spawn_blocking(move || {
            extract_and_load(assets.as_ref(), loader.as_ref(), &model_name, &dest)
        })
        .await
        .unwrap_or_else(|e| {
            Err(ProvisionError::ExtractionFailed(format!(
                "provisioning task failed: {e}"
            )))
        });

        match outcome {
            Ok(model) => {
                *self.state.write() = ProvisionState::Ready(model.clone());
                info!(model = %self.model_name, dir = %self.model_dir().display(), "Offline model ready");
                Ok(model)
            }
            Err(err) => {
                warn!(model = %self.model_name, error = %err, "Model provisioning failed");
                *self.state.write() = ProvisionState::Failed(err.to_string());
                Err(err)
            }
        }
    }

    /// Drops the loaded model. The extracted files stay on disk, so a
    /// later `ensure_ready` goes straight to load.
    pub(crate) fn release(&self) {
        let mut state = self.state.write();
        if matches!(&*state, ProvisionState::Ready(_)) {
            debug!(model = %self.model_name, "Releasing loaded model");
        }
        *state = ProvisionState::NotExtracted;
    }
}

fn extract_and_load(
    assets: &dyn AssetBundle,
    loader: &dyn ModelLoader,
    model_name: &str,
    dest: &Path,
) -> Result<Arc<dyn AcousticModel>, ProvisionError> {
    if dest.exists() {
        debug!(dir = %dest.display(), "Model already extracted, skipping copy");
    } else {
        extract(assets, model_name, dest)?;
    }
    loader
        .load(dest)
        .map_err(|e| ProvisionError::LoadFailed(format!("{e:#}")))
}

fn extract(assets: &dyn AssetBundle, model_name: &str, dest: &Path) -> Result<(), ProvisionError> {
    let root_entries = list_entries(assets, model_name)?;
    if root_entries.is_empty() {
        return Err(ProvisionError::ExtractionFailed(format!(
            "no model files found under asset path {model_name}"
        )));
    }

    let staging = dest.with_file_name(format!("{model_name}{STAGING_SUFFIX}"));
    if staging.exists() {
        // Leftover from an interrupted run; it was never published.
        fs::remove_dir_all(&staging)
            .map_err(|e| ProvisionError::ExtractionFailed(format!("clearing staging dir: {e}")))?;
    }

    info!(model = %model_name, dir = %dest.display(), "Extracting bundled model");
    match copy_tree(assets, model_name, &staging) {
        Ok(()) => fs::rename(&staging, dest).map_err(|e| {
            let _ = fs::remove_dir_all(&staging);
            ProvisionError::ExtractionFailed(format!("publishing extracted model: {e}"))
        }),
        Err(err) => {
            let _ = fs::remove_dir_all(&staging);
            Err(err)
        }
    }
}

/// Depth-first copy of the asset tree: an entry with children is a
/// directory to recurse into, a childless entry is a file to copy.
fn copy_tree(assets: &dyn AssetBundle, src: &str, dst: &Path) -> Result<(), ProvisionError> {
    fs::create_dir_all(dst)
        .map_err(|e| ProvisionError::ExtractionFailed(format!("creating {}: {e}", dst.display())))?;
    for name in list_entries(assets, src)? {
        let child_src = format!("{src}/{name}");
        let child_dst = dst.join(&name);
        if list_entries(assets, &child_src)?.is_empty() {
            copy_file(assets, &child_src, &child_dst)?;
        } else {
            copy_tree(assets, &child_src, &child_dst)?;
        }
    }
    Ok(())
}

fn list_entries(assets: &dyn AssetBundle, path: &str) -> Result<Vec<String>, ProvisionError> {
    assets
        .entries(path)
        .map_err(|e| ProvisionError::ExtractionFailed(format!("listing {path}: {e}")))
}

fn copy_file(assets: &dyn AssetBundle, src: &str, dst: &Path) -> Result<(), ProvisionError> {
    let fail = |e: std::io::Error| ProvisionError::ExtractionFailed(format!("copying {src}: {e}"));
    let mut reader = assets.open(src).map_err(fail)?;
    let mut file = fs::File::create(dst).map_err(fail)?;
    let mut buf = [0u8; COPY_BUFFER_BYTES];
    loop {
        let n = reader.read(&mut buf).map_err(fail)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(fail)?;
    }
    Ok(())
}
