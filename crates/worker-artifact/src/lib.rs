//! Worker artifact management library
//!
//! This crate resolves the pre-built, self-contained artifact for a worker
//! script and materializes an isolated copy per worker, so the same script
//! can run several times without sharing a file.

mod artifact;
mod error;

pub use artifact::{ArtifactConfig, ArtifactStore, MaterializedArtifact};
pub use error::{ArtifactError, Result};
