//! Bridge between UI clients and the worker subsystem
//!
//! Invocations arrive as `{method, args}`. Worker control (`core.*`) and the
//! task manager (`tasks.*`) are closed sets of methods; everything else is
//! looked up in the API registry.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use longday_core::worker::{WorkerControl, WorkerEvent, WorkerId, WorkerManager};
use longday_core::{Error, Result};
use worker_host::WorkerHost;

use crate::api::ApiRegistry;

/// An invoke request from a client
#[derive(Debug, Clone, Deserialize)]
pub struct CallRequest {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Reply to an invoke request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CallReply {
    Ok { ok: bool, value: Value },
    Err { ok: bool, error: String },
}

impl CallReply {
    pub fn from_result(result: Result<Value>) -> Self {
        match result {
            Ok(value) => Self::Ok { ok: true, value },
            Err(e) => Self::Err {
                ok: false,
                error: e.to_string(),
            },
        }
    }
}

/// Worker-control methods
#[derive(Debug, Clone, PartialEq)]
pub enum CoreCall {
    Create { script_reference: String },
    PostMessage { worker_id: WorkerId, payload: Value },
    Terminate { worker_id: WorkerId },
}

/// Task manager methods
#[derive(Debug, Clone, PartialEq)]
pub enum TaskCall {
    Start {
        script_reference: String,
        payload: Option<Value>,
    },
    Stop { worker_id: WorkerId },
    List,
}

/// A parsed invoke request
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Core(CoreCall),
    Task(TaskCall),
    Api { key: String, args: Vec<Value> },
}

impl Invocation {
    pub fn parse(method: &str, args: Vec<Value>) -> Result<Self> {
        if let Some(name) = method.strip_prefix("core.") {
            let call = match name {
                "create" => CoreCall::Create {
                    script_reference: script_arg(&args)?,
                },
                "postMessage" => CoreCall::PostMessage {
                    worker_id: worker_id_arg(&args)?,
                    payload: args.get(1).cloned().unwrap_or(Value::Null),
                },
                "terminate" => CoreCall::Terminate {
                    worker_id: worker_id_arg(&args)?,
                },
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "Unknown core method: {}",
                        name
                    )))
                }
            };
            return Ok(Self::Core(call));
        }

        if let Some(name) = method.strip_prefix("tasks.") {
            let call = match name {
                "start" => TaskCall::Start {
                    script_reference: script_arg(&args)?,
                    payload: args.get(1).cloned().filter(|v| !v.is_null()),
                },
                "stop" => TaskCall::Stop {
                    worker_id: worker_id_arg(&args)?,
                },
                "list" => TaskCall::List,
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "Unknown tasks method: {}",
                        name
                    )))
                }
            };
            return Ok(Self::Task(call));
        }

        Ok(Self::Api {
            key: method.to_string(),
            args,
        })
    }
}

fn script_arg(args: &[Value]) -> Result<String> {
    args.first()
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidInput("Expected a script reference".to_string()))
}

fn worker_id_arg(args: &[Value]) -> Result<WorkerId> {
    args.first()
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput("Expected a worker id".to_string()))?
        .parse()
}

/// In-process bridge value shared by every transport
#[derive(Clone)]
pub struct Bridge {
    host: WorkerHost,
    api: Arc<ApiRegistry>,
    tasks: Option<Arc<WorkerManager>>,
}

impl Bridge {
    pub fn new(host: WorkerHost, api: Arc<ApiRegistry>) -> Self {
        Self {
            host,
            api,
            tasks: None,
        }
    }

    /// Route `tasks.*` calls to `manager`
    pub fn with_tasks(mut self, manager: Arc<WorkerManager>) -> Self {
        self.tasks = Some(manager);
        self
    }

    pub fn host(&self) -> &WorkerHost {
        &self.host
    }

    pub fn tasks(&self) -> Option<&Arc<WorkerManager>> {
        self.tasks.as_ref()
    }

    /// Worker message and exit events, in per-worker order
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.host.subscribe()
    }

    /// Parse and dispatch one invoke request
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        debug!("Invoke {}", method);
        match Invocation::parse(method, args)? {
            Invocation::Core(call) => self.core(call).await,
            Invocation::Task(call) => self.task(call).await,
            Invocation::Api { key, args } => self.api.call(&key, args).await,
        }
    }

    async fn core(&self, call: CoreCall) -> Result<Value> {
        match call {
            CoreCall::Create { script_reference } => {
                let worker_id = self.create(&script_reference).await?;
                Ok(serde_json::to_value(worker_id)?)
            }
            CoreCall::PostMessage { worker_id, payload } => {
                self.post_message(worker_id, payload).await?;
                Ok(Value::Null)
            }
            CoreCall::Terminate { worker_id } => {
                self.terminate(worker_id).await?;
                Ok(Value::Null)
            }
        }
    }

    async fn task(&self, call: TaskCall) -> Result<Value> {
        let manager = self
            .tasks
            .as_ref()
            .ok_or_else(|| Error::TransportUnavailable("Task manager is not attached".to_string()))?;

        match call {
            TaskCall::Start {
                script_reference,
                payload,
            } => {
                let worker_id = manager.start_task(&script_reference, payload).await?;
                Ok(serde_json::to_value(worker_id)?)
            }
            TaskCall::Stop { worker_id } => {
                manager.stop_task(worker_id).await?;
                Ok(Value::Null)
            }
            TaskCall::List => Ok(serde_json::to_value(manager.states())?),
        }
    }
}

#[async_trait]
impl WorkerControl for Bridge {
    async fn create(&self, script_reference: &str) -> Result<WorkerId> {
        self.host.create(script_reference).await.map_err(Into::into)
    }

    async fn post_message(&self, worker_id: WorkerId, payload: Value) -> Result<()> {
        self.host
            .post_message(worker_id, payload)
            .await
            .map_err(Into::into)
    }

    async fn terminate(&self, worker_id: WorkerId) -> Result<()> {
        self.host.terminate(worker_id).await.map_err(Into::into)
    }

    async fn live_workers(&self) -> Result<Vec<WorkerId>> {
        Ok(self.host.live_ids().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use worker_artifact::ArtifactConfig;
    use worker_host::HostConfig;

    fn create_test_bridge() -> (Bridge, TempDir) {
        let dir = TempDir::new().unwrap();
        let host = WorkerHost::new(HostConfig {
            artifacts: ArtifactConfig {
                artifact_dir: dir.path().join("dist"),
                temp_dir: dir.path().join("tmp"),
                extension: String::new(),
            },
            app_root: dir.path().to_path_buf(),
            ..HostConfig::default()
        });

        let mut api = ApiRegistry::new();
        api.register("echo", "first", |args: Vec<Value>| async move {
            Ok(args.into_iter().next().unwrap_or(Value::Null))
        });
        (Bridge::new(host, Arc::new(api)), dir)
    }

    #[test]
    fn test_parse_invocations() {
        let id = WorkerId::new();
        assert_eq!(
            Invocation::parse("core.create", vec![json!("heavy-task")]).unwrap(),
            Invocation::Core(CoreCall::Create {
                script_reference: "heavy-task".to_string()
            })
        );
        assert_eq!(
            Invocation::parse(
                "core.postMessage",
                vec![json!(id.to_string()), json!({"command": "start"})]
            )
            .unwrap(),
            Invocation::Core(CoreCall::PostMessage {
                worker_id: id,
                payload: json!({"command": "start"}),
            })
        );
        assert_eq!(
            Invocation::parse("tasks.start", vec![json!("heavy-task"), Value::Null]).unwrap(),
            Invocation::Task(TaskCall::Start {
                script_reference: "heavy-task".to_string(),
                payload: None,
            })
        );
        assert_eq!(
            Invocation::parse("system.greet", vec![json!("Ada")]).unwrap(),
            Invocation::Api {
                key: "system.greet".to_string(),
                args: vec![json!("Ada")],
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_core_calls() {
        let err = Invocation::parse("core.explode", vec![]).unwrap_err();
        assert!(err.to_string().contains("Unknown core method"));

        assert!(Invocation::parse("core.terminate", vec![json!("not-an-id")]).is_err());
        assert!(Invocation::parse("core.create", vec![]).is_err());
    }

    #[tokio::test]
    async fn test_invoke_routes_api_calls() {
        let (bridge, _dir) = create_test_bridge();
        let value = bridge.invoke("echo.first", vec![json!("hi")]).await.unwrap();
        assert_eq!(value, json!("hi"));

        let err = bridge.invoke("echo.second", vec![]).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("API function \"echo.second\" is not registered."));
    }

    #[tokio::test]
    async fn test_invoke_core_on_unknown_worker() {
        let (bridge, _dir) = create_test_bridge();
        let id = WorkerId::new().to_string();

        let err = bridge.invoke("core.terminate", vec![json!(id)]).await.unwrap_err();
        assert!(err.is_not_found());

        let err = bridge
            .invoke("core.postMessage", vec![json!(id), json!({})])
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = bridge
            .invoke("core.create", vec![json!("heavy-task")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ArtifactMissing { .. }));
    }

    #[tokio::test]
    async fn test_tasks_need_a_manager() {
        let (bridge, _dir) = create_test_bridge();
        assert!(matches!(
            bridge.invoke("tasks.list", vec![]).await,
            Err(Error::TransportUnavailable(_))
        ));

        let manager = Arc::new(WorkerManager::new(Arc::new(bridge.clone())));
        let bridge = bridge.with_tasks(manager);
        assert_eq!(bridge.invoke("tasks.list", vec![]).await.unwrap(), json!([]));
    }

    #[test]
    fn test_call_reply_shape() {
        let ok = serde_json::to_value(CallReply::from_result(Ok(json!(1)))).unwrap();
        assert_eq!(ok, json!({"ok": true, "value": 1}));

        let err = serde_json::to_value(CallReply::from_result(Err(Error::NotFound(
            "w".to_string(),
        ))))
        .unwrap();
        assert_eq!(err["ok"], false);
        assert!(err["error"].as_str().unwrap().contains("w"));
    }
}
