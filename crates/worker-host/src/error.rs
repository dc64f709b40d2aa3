//! Error types for worker-host

use thiserror::Error;

use longday_core::worker::WorkerId;
use worker_artifact::ArtifactError;

/// Result type alias for host operations
pub type Result<T> = std::result::Result<T, HostError>;

/// Errors that can occur while hosting workers
#[derive(Debug, Error)]
pub enum HostError {
    /// Artifact resolution or copy failed
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// Failed to spawn worker process
    #[error("Failed to spawn worker process: {message}")]
    SpawnFailed {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// No live worker with this id
    #[error("Worker not found: {worker_id}")]
    WorkerNotFound { worker_id: WorkerId },

    /// The worker's message channel is gone
    #[error("Message channel closed for worker {worker_id}")]
    ChannelClosed { worker_id: WorkerId },

    /// Malformed channel traffic
    #[error("Channel protocol error: {message}")]
    Protocol { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// Create a SpawnFailed error
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a SpawnFailed error with source
    pub fn spawn_failed_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a Protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

impl From<HostError> for longday_core::Error {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Artifact(ArtifactError::ArtifactMissing { script, path }) => {
                Self::ArtifactMissing { script, path }
            }
            HostError::Artifact(ArtifactError::InvalidReference { reference }) => {
                Self::InvalidInput(format!("Invalid script reference: {}", reference))
            }
            HostError::WorkerNotFound { worker_id } | HostError::ChannelClosed { worker_id } => {
                Self::NotFound(worker_id.to_string())
            }
            HostError::Io(e) => Self::Io(e),
            other => Self::Spawn(other.to_string()),
        }
    }
}
