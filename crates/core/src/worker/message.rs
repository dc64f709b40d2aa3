//! Worker message types
//!
//! Two layers travel over the bridge: `WorkerEvent` is the envelope the
//! host emits for every worker, and `WorkerReport` is the typed view of
//! the payload a task script sends (`{"type": "progress", "value": 40}`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::WorkerId;

/// Asynchronous event pushed from the host for a single worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum WorkerEvent {
    /// The worker sent a message over its channel
    #[serde(rename = "worker-message")]
    Message {
        #[serde(rename = "workerId")]
        worker_id: WorkerId,
        data: Value,
    },

    /// The worker process exited; always the last event for its id
    #[serde(rename = "worker-exit")]
    Exit {
        #[serde(rename = "workerId")]
        worker_id: WorkerId,
        #[serde(rename = "exitCode")]
        exit_code: i32,
    },
}

impl WorkerEvent {
    /// Create a message event
    pub fn message(worker_id: WorkerId, data: Value) -> Self {
        Self::Message { worker_id, data }
    }

    /// Create an exit event
    pub fn exit(worker_id: WorkerId, exit_code: i32) -> Self {
        Self::Exit {
            worker_id,
            exit_code,
        }
    }

    /// The worker this event belongs to
    pub fn worker_id(&self) -> WorkerId {
        match self {
            Self::Message { worker_id, .. } | Self::Exit { worker_id, .. } => *worker_id,
        }
    }

    /// Whether this is the terminal exit event
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Exit { .. })
    }
}

/// Message kinds a task script reports to the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReport {
    /// Setup finished; the worker waits for its start command
    Ready,
    /// Progress percentage
    Progress { value: f64 },
    /// Free-text phase description
    Status { value: String },
    /// Final free-text result
    Result { value: String },
    /// The task failed inside the worker
    Error { message: String },
}

impl WorkerReport {
    /// Create a progress report
    pub fn progress(value: u8) -> Self {
        Self::Progress {
            value: f64::from(value),
        }
    }

    /// Create a status report
    pub fn status(value: impl Into<String>) -> Self {
        Self::Status {
            value: value.into(),
        }
    }

    /// Create a result report
    pub fn result(value: impl Into<String>) -> Self {
        Self::Result {
            value: value.into(),
        }
    }

    /// Create an error report
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Interpret a raw payload; `None` for kinds this protocol doesn't know
    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }

    /// Serialize into the payload shape sent over the channel
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Round and clamp a reported progress value into `0..=100`
///
/// Returns `None` for NaN or infinite values.
pub fn clamp_progress(value: f64) -> Option<u8> {
    if !value.is_finite() {
        return None;
    }
    Some(value.round().clamp(0.0, 100.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_report_from_value() {
        assert_eq!(
            WorkerReport::from_value(&json!({"type": "ready"})),
            Some(WorkerReport::Ready)
        );
        assert_eq!(
            WorkerReport::from_value(&json!({"type": "progress", "value": 40})),
            Some(WorkerReport::Progress { value: 40.0 })
        );
        assert_eq!(
            WorkerReport::from_value(&json!({"type": "error", "message": "boom"})),
            Some(WorkerReport::error("boom"))
        );
        assert_eq!(WorkerReport::from_value(&json!({"type": "telemetry"})), None);
        assert_eq!(WorkerReport::from_value(&json!("ready")), None);
    }

    #[test]
    fn test_report_to_value() {
        let value = WorkerReport::status("Task started...").to_value();
        assert_eq!(value, json!({"type": "status", "value": "Task started..."}));
    }

    #[test]
    fn test_clamp_progress() {
        assert_eq!(clamp_progress(42.4), Some(42));
        assert_eq!(clamp_progress(-3.0), Some(0));
        assert_eq!(clamp_progress(250.0), Some(100));
        assert_eq!(clamp_progress(f64::NAN), None);
    }

    #[test]
    fn test_event_serialization() {
        let worker_id = WorkerId::from(Uuid::nil());
        let event = WorkerEvent::exit(worker_id, 0);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"worker-exit\""));
        assert!(json.contains("\"exitCode\":0"));

        let parsed: WorkerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
        assert!(parsed.is_exit());
        assert_eq!(parsed.worker_id(), worker_id);
    }
}
