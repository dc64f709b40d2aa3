//! Worker model definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::message::{clamp_progress, WorkerReport};
use crate::Error;

/// Status shown between `create` and the worker's ready signal
pub const STATUS_CREATED: &str = "Worker created, waiting for ready signal...";
/// Status after an exit with code 0 and no reported result
pub const STATUS_COMPLETED: &str = "Task completed successfully.";
/// Status after a requested stop
pub const STATUS_STOPPED: &str = "Task was stopped.";
/// Prefix for worker-reported errors
pub const ERROR_PREFIX: &str = "Error: ";
/// Exit code recorded when a worker's exit event was lost
pub const LOST_EXIT_CODE: i32 = -1;

/// Opaque worker identifier, generated by the host at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(Uuid);

impl WorkerId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for WorkerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for WorkerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| Error::InvalidInput(format!("Invalid worker id: {}", s)))
    }
}

/// What applying a report asks the manager to do next
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// Nothing beyond the state update
    Updated,
    /// The report changed nothing
    Ignored,
    /// The worker is ready; deliver this start payload
    Deliver(Value),
}

/// UI-side view of a single worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerState {
    pub id: WorkerId,
    pub script_reference: String,
    pub status: String,
    pub progress: u8,
    pub is_running: bool,
    pub exit_code: Option<i32>,
    /// Start command held until the worker reports ready
    #[serde(skip)]
    pub pending_start_payload: Option<Value>,
    pub error: Option<String>,
    pub result: Option<String>,
    pub stop_requested: bool,
    /// Creation order, monotonic per manager
    pub sequence: u64,
    /// Order in which the worker stopped running
    pub finished_sequence: Option<u64>,
    /// Exit was inferred after its event was lost
    #[serde(skip)]
    pub exit_inferred: bool,
}

impl WorkerState {
    /// Create the state for a freshly created worker
    pub fn new(
        id: WorkerId,
        script_reference: impl Into<String>,
        start_payload: Option<Value>,
        sequence: u64,
    ) -> Self {
        Self {
            id,
            script_reference: script_reference.into(),
            status: STATUS_CREATED.to_string(),
            progress: 0,
            is_running: true,
            exit_code: None,
            pending_start_payload: start_payload,
            error: None,
            result: None,
            stop_requested: false,
            sequence,
            finished_sequence: None,
            exit_inferred: false,
        }
    }

    /// Whether the exit event has been applied
    pub fn has_exited(&self) -> bool {
        self.exit_code.is_some()
    }

    /// Apply a report sent by the worker
    pub fn apply_report(&mut self, report: WorkerReport) -> ReportOutcome {
        if self.has_exited() {
            return ReportOutcome::Ignored;
        }

        match report {
            WorkerReport::Ready => {
                if !self.is_running {
                    return ReportOutcome::Ignored;
                }
                match self.pending_start_payload.take() {
                    Some(payload) => {
                        self.status = "Worker ready. Sending initial command...".to_string();
                        ReportOutcome::Deliver(payload)
                    }
                    None => {
                        self.status = "Worker ready.".to_string();
                        ReportOutcome::Updated
                    }
                }
            }
            WorkerReport::Progress { value } => match clamp_progress(value) {
                Some(progress) => {
                    self.progress = progress;
                    ReportOutcome::Updated
                }
                None => ReportOutcome::Ignored,
            },
            WorkerReport::Status { value } => {
                self.status = value;
                ReportOutcome::Updated
            }
            WorkerReport::Result { value } => {
                self.status = value.clone();
                self.result = Some(value);
                ReportOutcome::Updated
            }
            WorkerReport::Error { message } => {
                self.status = format!("{}{}", ERROR_PREFIX, message);
                self.error = Some(message);
                self.is_running = false;
                ReportOutcome::Updated
            }
        }
    }

    /// Apply the terminal exit event
    ///
    /// Only the first exit counts, unless that one was inferred.
    pub fn apply_exit(&mut self, exit_code: i32) {
        if self.has_exited() && !self.exit_inferred {
            return;
        }
        self.is_running = false;
        self.exit_code = Some(exit_code);
        self.exit_inferred = false;
        self.pending_start_payload = None;

        if self.error.is_some() {
            return;
        }

        if exit_code == 0 {
            self.status = match &self.result {
                Some(result) => result.clone(),
                None => STATUS_COMPLETED.to_string(),
            };
        } else if self.stop_requested {
            self.status = STATUS_STOPPED.to_string();
        } else {
            self.status = format!("Task stopped unexpectedly (exit code {}).", exit_code);
        }
    }

    /// Mark the worker exited when its exit event was lost
    pub fn apply_lost_exit(&mut self) {
        self.apply_exit(LOST_EXIT_CODE);
        self.exit_inferred = true;
    }

    /// Record a failed termination request locally
    ///
    /// A later exit event still overrides this.
    pub fn mark_stop_failed(&mut self, message: &str) {
        if self.has_exited() {
            return;
        }
        self.status = format!("Error during termination: {}", message);
        self.is_running = false;
    }
}
