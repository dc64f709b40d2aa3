//! Registry of live workers

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use longday_core::worker::WorkerId;

use crate::error::{HostError, Result};

/// Host-side record of a live worker
#[derive(Debug)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub script_reference: String,
    pub pid: Option<u32>,
    pub artifact_path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Payloads waiting to be written to the worker's channel
    pub outbound: mpsc::UnboundedSender<Value>,
    /// Kill requests for the worker's supervisor
    pub kill: mpsc::Sender<()>,
}

impl WorkerRecord {
    pub fn summary(&self) -> WorkerSummary {
        WorkerSummary {
            id: self.id,
            script_reference: self.script_reference.clone(),
            pid: self.pid,
            artifact_path: self.artifact_path.clone(),
            created_at: self.created_at,
        }
    }
}

/// Serializable view of a live worker
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSummary {
    pub id: WorkerId,
    pub script_reference: String,
    pub pid: Option<u32>,
    pub artifact_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Live workers by id
///
/// A worker is present from successful spawn until its process exits.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, WorkerRecord>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: WorkerRecord) {
        self.workers.write().await.insert(record.id, record);
    }

    pub async fn remove(&self, worker_id: WorkerId) -> Option<WorkerRecord> {
        self.workers.write().await.remove(&worker_id)
    }

    pub async fn contains(&self, worker_id: WorkerId) -> bool {
        self.workers.read().await.contains_key(&worker_id)
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<WorkerId> {
        self.workers.read().await.keys().copied().collect()
    }

    /// Summaries of all live workers, oldest first
    pub async fn summaries(&self) -> Vec<WorkerSummary> {
        let workers = self.workers.read().await;
        let mut summaries: Vec<_> = workers.values().map(WorkerRecord::summary).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        summaries
    }

    /// Queue a payload for the worker's channel
    pub async fn send(&self, worker_id: WorkerId, payload: Value) -> Result<()> {
        let workers = self.workers.read().await;
        let record = workers
            .get(&worker_id)
            .ok_or(HostError::WorkerNotFound { worker_id })?;
        record
            .outbound
            .send(payload)
            .map_err(|_| HostError::ChannelClosed { worker_id })
    }

    /// Ask the worker's supervisor to kill the process
    ///
    /// A kill already pending counts as requested.
    pub async fn request_kill(&self, worker_id: WorkerId) -> Result<()> {
        let workers = self.workers.read().await;
        let record = workers
            .get(&worker_id)
            .ok_or(HostError::WorkerNotFound { worker_id })?;
        match record.kill.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(())) => {
                Err(HostError::WorkerNotFound { worker_id })
            }
        }
    }
}
