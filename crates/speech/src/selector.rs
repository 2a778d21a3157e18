use std::sync::Arc;

use tracing::debug;

use crate::backend::RecognitionBackend;
use crate::error::StartError;
use crate::platform::PackageRegistry;

/// Picks the first backend whose capability probe passes, in
/// registration order.
///
/// Probes run fresh on every call; capability is never cached, so a
/// model that finished provisioning or a recognizer that appeared since
/// the last attempt is picked up immediately. When nothing is available
/// the error reports whether the configured companion package is
/// missing, which is the usual reason on stripped-down devices.
pub struct BackendSelector {
    backends: Vec<Arc<dyn RecognitionBackend>>,
    packages: Arc<dyn PackageRegistry>,
    companion_package: String,
}

impl BackendSelector {
    pub fn new(
        backends: Vec<Arc<dyn RecognitionBackend>>,
        packages: Arc<dyn PackageRegistry>,
        companion_package: impl Into<String>,
    ) -> Self {
        Self {
            backends,
            packages,
            companion_package: companion_package.into(),
        }
    }

    /// First backend that can start right now.
    pub async fn select(&self) -> Result<Arc<dyn RecognitionBackend>, StartError> {
        for backend in &self.backends {
            if backend.probe().await {
                debug!(backend = backend.kind().as_str(), "Backend selected");
                return Ok(backend.clone());
            }
        }
        let companion_missing = !self.packages.is_package_installed(&self.companion_package);
        debug!(companion_missing, "No backend available");
        Err(StartError::NoBackendAvailable { companion_missing })
    }

    pub async fn any_available(&self) -> bool {
        for backend in &self.backends {
            if backend.probe().await {
                return true;
            }
        }
        false
    }

    pub fn backends(&self) -> &[Arc<dyn RecognitionBackend>] {
        &self.backends
    }

    pub fn companion_package(&self) -> &str {
        &self.companion_package
    }
}
