//! Core library for Longday
//!
//! This crate contains the shared worker model:
//! - Worker identifiers, bridge events and worker reports
//! - The `WorkerControl` seam used to reach a worker host
//! - The `WorkerManager` that reconciles worker events into UI state

pub mod error;
pub mod worker;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
