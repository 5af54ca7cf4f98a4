//! Per-task credential bundles.

use std::io::Write;
use std::path::{Path, PathBuf};

use kubefan_core::{ClusterTarget, Kubeconfig};
use tempfile::{Builder, TempPath};
use tracing::{debug, warn};

use crate::error::CredentialError;

/// A transient credential file scoped to one task.
///
/// The file is deleted when the bundle is dropped, so it never outlives the
/// task whatever path the task exits through.
#[derive(Debug)]
pub struct CredentialBundle {
    path: TempPath,
}

impl CredentialBundle {
    pub fn new(path: TempPath) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now, logging rather than failing if that does not work.
    pub fn release(self) {
        let path = self.path.to_path_buf();
        match self.path.close() {
            Ok(()) => debug!(path = %path.display(), "Removed credential bundle"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove credential bundle"),
        }
    }
}

/// Turns a target into a credential bundle a command can consume.
pub trait CredentialMaterializer: Send + Sync {
    fn materialize(&self, target: &ClusterTarget) -> Result<CredentialBundle, CredentialError>;
}

/// Writes a single-context kubeconfig for the target into a temp file.
#[derive(Debug, Clone, Default)]
pub struct KubeconfigMaterializer {
    dir: Option<PathBuf>,
}

impl KubeconfigMaterializer {
    /// Materialize into the system temp directory.
    pub fn new() -> Self {
        Self { dir: None }
    }

    /// Materialize into `dir` instead of the system temp directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }
}

impl CredentialMaterializer for KubeconfigMaterializer {
    fn materialize(&self, target: &ClusterTarget) -> Result<CredentialBundle, CredentialError> {
        let yaml = Kubeconfig::for_target(target).to_yaml()?;

        let mut builder = Builder::new();
        builder.prefix("kubefan-");
        let mut file = match &self.dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(CredentialError::Create)?;

        file.write_all(yaml.as_bytes())
            .and_then(|()| file.flush())
            .map_err(CredentialError::Write)?;

        let path = file.into_temp_path();
        debug!(target = %target.name(), path = %path.display(), "Materialized kubeconfig");
        Ok(CredentialBundle::new(path))
    }
}
