//! Error types for the core library

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(
        "Worker artifact for \"{script}\" not found at {path}. Run the worker build step first."
    )]
    ArtifactMissing { script: String, path: PathBuf },

    #[error("Worker not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error is the expected "no such worker" outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
