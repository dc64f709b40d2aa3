//! Artifact resolution and per-worker copies

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::error::{ArtifactError, Result};

/// Configuration for ArtifactStore
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactConfig {
    /// Directory holding the built worker artifacts
    pub artifact_dir: PathBuf,
    /// Directory where per-worker copies are materialized
    ///
    /// Stores created with [`ArtifactStore::instance`] use a private
    /// subdirectory of this.
    pub temp_dir: PathBuf,
    /// File extension of built artifacts, including the dot
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_extension() -> String {
    std::env::consts::EXE_SUFFIX.to_string()
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("server").join("workers-dist"),
            temp_dir: std::env::temp_dir().join("longday-workers"),
            extension: default_extension(),
        }
    }
}

/// A per-worker copy of an artifact
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializedArtifact {
    /// The built artifact the copy was made from
    pub source: PathBuf,
    /// The isolated copy the worker executes
    pub path: PathBuf,
}

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

/// Resolves worker artifacts and manages their temporary copies
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    config: ArtifactConfig,
}

impl ArtifactStore {
    /// Create a store that uses `config.temp_dir` as is
    pub fn new(config: ArtifactConfig) -> Self {
        Self { config }
    }

    /// Create a store with its own subdirectory of `config.temp_dir`
    ///
    /// Several stores sharing one configured temp dir (for example two
    /// shells on the same machine) never purge each other's copies.
    pub fn instance(mut config: ArtifactConfig) -> Self {
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        config.temp_dir = config
            .temp_dir
            .join(format!("{}-{}", std::process::id(), instance));
        Self { config }
    }

    /// Get the configuration
    pub fn config(&self) -> &ArtifactConfig {
        &self.config
    }

    /// Get the temporary copy directory
    pub fn temp_dir(&self) -> &Path {
        &self.config.temp_dir
    }

    /// Map a script reference to its artifact name
    ///
    /// `server/workers/heavy-task.js` and `heavy-task` both map to `heavy-task`.
    pub fn artifact_name(script_reference: &str) -> Result<String> {
        let trimmed = script_reference.trim();
        if trimmed.is_empty() {
            return Err(ArtifactError::invalid_reference(script_reference));
        }

        let path = Path::new(trimmed);
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(ArtifactError::invalid_reference(script_reference));
        }

        path.file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ArtifactError::invalid_reference(script_reference))
    }

    /// Path where the built artifact for a script is expected
    pub fn artifact_path(&self, script_reference: &str) -> Result<PathBuf> {
        let name = Self::artifact_name(script_reference)?;
        Ok(self
            .config
            .artifact_dir
            .join(format!("{}{}", name, self.config.extension)))
    }

    /// Resolve the built artifact, failing if it hasn't been built
    pub async fn resolve(&self, script_reference: &str) -> Result<PathBuf> {
        let path = self.artifact_path(script_reference)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(ArtifactError::ArtifactMissing {
                script: script_reference.to_string(),
                path,
            }),
        }
    }

    /// Copy the artifact to an isolated file for one worker
    ///
    /// # Arguments
    /// * `script_reference` - Logical script identity
    /// * `worker_id` - Unique worker identifier, used in the copy's name
    pub async fn materialize(
        &self,
        script_reference: &str,
        worker_id: &str,
    ) -> Result<MaterializedArtifact> {
        let source = self.resolve(script_reference).await?;
        let name = Self::artifact_name(script_reference)?;

        tokio::fs::create_dir_all(&self.config.temp_dir).await?;
        let path = self
            .config
            .temp_dir
            .join(format!("{}-{}{}", worker_id, name, self.config.extension));

        tokio::fs::copy(&source, &path)
            .await
            .map_err(|e| ArtifactError::CopyFailed {
                from: source.clone(),
                to: path.clone(),
                source: e,
            })?;

        debug!("Materialized artifact {:?} -> {:?}", source, path);
        Ok(MaterializedArtifact { source, path })
    }

    /// Delete a worker's copy
    ///
    /// A copy that is already gone counts as released.
    pub async fn release(&self, path: &Path) -> Result<()> {
        if !path.starts_with(&self.config.temp_dir) {
            return Err(ArtifactError::OutsideTempDir {
                path: path.to_path_buf(),
            });
        }

        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!("Released artifact copy {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every materialized copy and the copy directory itself
    ///
    /// # Returns
    /// Number of files removed
    pub async fn purge(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.config.temp_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to purge artifact copy {:?}: {}", path, e),
            }
        }

        if let Err(e) = tokio::fs::remove_dir(&self.config.temp_dir).await {
            debug!("Kept artifact directory {:?}: {}", self.config.temp_dir, e);
        }

        info!(
            "Purged {} artifact copies from {:?}",
            removed, self.config.temp_dir
        );
        Ok(removed)
    }
}
