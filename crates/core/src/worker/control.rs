//! Worker control trait
//!
//! Defines the interface the manager uses to reach a worker host,
//! whether in-process or across a bridge.

use async_trait::async_trait;
use serde_json::Value;

use super::model::WorkerId;
use crate::Result;

/// Interface for the worker-control operations
#[async_trait]
pub trait WorkerControl: Send + Sync {
    /// Launch a worker for the given script and return its id once spawned
    async fn create(&self, script_reference: &str) -> Result<WorkerId>;

    /// Enqueue a payload on the worker's message channel
    async fn post_message(&self, worker_id: WorkerId, payload: Value) -> Result<()>;

    /// Forcibly end the worker process
    async fn terminate(&self, worker_id: WorkerId) -> Result<()>;

    /// Ids of the workers that have not exited yet
    async fn live_workers(&self) -> Result<Vec<WorkerId>>;
}
