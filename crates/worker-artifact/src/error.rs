//! Error types for worker-artifact operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for artifact operations
pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Errors that can occur while resolving or copying artifacts
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// No built artifact for the script
    #[error("Worker artifact for \"{script}\" not found at {path}. Run the worker build step first.")]
    ArtifactMissing { script: String, path: PathBuf },

    /// Script reference can't be mapped to an artifact name
    #[error("Invalid script reference: {reference}")]
    InvalidReference { reference: String },

    /// Copying the artifact failed
    #[error("Failed to copy artifact {from} to {to}: {source}")]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Path is not inside the temporary artifact directory
    #[error("Refusing to remove path outside the artifact temp dir: {path}")]
    OutsideTempDir { path: PathBuf },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArtifactError {
    /// Create an InvalidReference error
    pub fn invalid_reference(reference: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
        }
    }
}
