//! Worker module
//!
//! This module contains worker-related types and the UI-side state manager.

mod control;
mod manager;
mod message;
mod model;

pub use control::WorkerControl;
pub use manager::{Subscription, WorkerManager, WorkerSnapshot};
pub use message::*;
pub use model::*;
