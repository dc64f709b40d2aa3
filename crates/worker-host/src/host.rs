//! Worker process host
//!
//! `WorkerHost` turns a script reference into a running, isolated worker
//! process and is the only owner of the worker registry. Each worker gets a
//! supervisor task that waits on the process, drains its output and message
//! channel, cleans up, and only then emits the exit event.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use longday_core::worker::{WorkerControl, WorkerEvent, WorkerId};
use worker_artifact::{ArtifactConfig, ArtifactStore};

use crate::channel::ChannelListener;
use crate::error::Result;
use crate::process::{RunnerConfig, WorkerLaunch, WorkerProcess};
use crate::registry::{WorkerRecord, WorkerRegistry, WorkerSummary};

/// Upper bound on waiting for a dead worker's output and channel readers
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Poll interval while waiting for workers to exit during shutdown
const SHUTDOWN_POLL: Duration = Duration::from_millis(25);

/// Configuration for WorkerHost
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub artifacts: ArtifactConfig,
    /// Interpreter for artifacts that aren't native executables
    pub runner: Option<RunnerConfig>,
    /// Working directory handed to every worker
    pub app_root: PathBuf,
    /// Buffered events per subscriber before it starts lagging
    pub event_capacity: usize,
    /// How long `shutdown` waits for killed workers to exit
    pub shutdown_grace: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            artifacts: ArtifactConfig::default(),
            runner: None,
            app_root: PathBuf::from("."),
            event_capacity: 1024,
            shutdown_grace: Duration::from_millis(2000),
        }
    }
}

struct HostInner {
    config: HostConfig,
    artifacts: ArtifactStore,
    registry: WorkerRegistry,
    events: broadcast::Sender<WorkerEvent>,
}

/// Spawns and supervises worker processes
#[derive(Clone)]
pub struct WorkerHost {
    inner: Arc<HostInner>,
}

impl WorkerHost {
    pub fn new(config: HostConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(HostInner {
                artifacts: ArtifactStore::instance(config.artifacts.clone()),
                config,
                registry: WorkerRegistry::new(),
                events,
            }),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    /// Directory holding this host's per-worker artifact copies
    pub fn temp_dir(&self) -> &Path {
        self.inner.artifacts.temp_dir()
    }

    /// Receive every message and exit event from now on
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.inner.events.subscribe()
    }

    /// Summaries of the live workers
    pub async fn list(&self) -> Vec<WorkerSummary> {
        self.inner.registry.summaries().await
    }

    /// Ids of the live workers
    pub async fn live_ids(&self) -> Vec<WorkerId> {
        self.inner.registry.ids().await
    }

    /// Number of live workers
    pub async fn live_count(&self) -> usize {
        self.inner.registry.len().await
    }

    /// Start a worker for the given script
    ///
    /// Returns once the process is launched, not once it is ready.
    pub async fn create(&self, script_reference: &str) -> Result<WorkerId> {
        let worker_id = WorkerId::new();
        let artifact = self
            .inner
            .artifacts
            .materialize(script_reference, &worker_id.to_string())
            .await?;

        let listener = match ChannelListener::bind().await {
            Ok(listener) => listener,
            Err(e) => {
                self.inner.release_artifact(worker_id, &artifact.path).await;
                return Err(e);
            }
        };

        let launch = WorkerLaunch {
            worker_id,
            program: artifact.path.clone(),
            runner: self.inner.config.runner.clone(),
            app_root: self.inner.config.app_root.clone(),
            channel_addr: listener.addr(),
            channel_token: listener.token().to_string(),
        };

        let process = match WorkerProcess::spawn(&launch) {
            Ok(process) => process,
            Err(e) => {
                warn!(worker_id = %worker_id, "Spawn failed: {}", e);
                self.inner.release_artifact(worker_id, &artifact.path).await;
                return Err(e);
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = mpsc::channel(1);
        let (exited_tx, exited_rx) = oneshot::channel();

        self.inner
            .registry
            .insert(WorkerRecord {
                id: worker_id,
                script_reference: script_reference.to_string(),
                pid: process.pid(),
                artifact_path: artifact.path.clone(),
                created_at: Utc::now(),
                outbound: outbound_tx,
                kill: kill_tx,
            })
            .await;

        let channel_task = tokio::spawn(listener.run(
            worker_id,
            outbound_rx,
            self.inner.events.clone(),
            exited_rx,
        ));

        info!(
            worker_id = %worker_id,
            pid = ?process.pid(),
            "Created worker for {}",
            script_reference
        );

        tokio::spawn(supervise(
            self.inner.clone(),
            Supervised {
                worker_id,
                process,
                kill_rx,
                exited_tx,
                channel_task,
                artifact_path: artifact.path,
            },
        ));

        Ok(worker_id)
    }

    /// Queue a payload for the worker's message channel
    pub async fn post_message(&self, worker_id: WorkerId, payload: Value) -> Result<()> {
        match self.inner.registry.send(worker_id, payload).await {
            Ok(()) => {
                debug!(worker_id = %worker_id, "Queued message for worker");
                Ok(())
            }
            Err(e) => {
                debug!(worker_id = %worker_id, "postMessage rejected: {}", e);
                Err(e)
            }
        }
    }

    /// Forcibly kill a worker without waiting for it to exit
    pub async fn terminate(&self, worker_id: WorkerId) -> Result<()> {
        match self.inner.registry.request_kill(worker_id).await {
            Ok(()) => {
                info!(worker_id = %worker_id, "Terminating worker");
                Ok(())
            }
            Err(e) => {
                warn!(worker_id = %worker_id, "terminate rejected: {}", e);
                Err(e)
            }
        }
    }

    /// Kill every live worker and purge all artifact copies
    pub async fn shutdown(&self) {
        let ids = self.inner.registry.ids().await;
        info!("Shutting down {} worker(s)", ids.len());

        for worker_id in ids {
            // Already gone counts as done
            let _ = self.inner.registry.request_kill(worker_id).await;
        }

        let deadline = tokio::time::Instant::now() + self.inner.config.shutdown_grace;
        while !self.inner.registry.is_empty().await {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "{} worker(s) still live after shutdown grace period",
                    self.inner.registry.len().await
                );
                break;
            }
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }

        match self.inner.artifacts.purge().await {
            Ok(removed) => debug!("Removed {} artifact copies on shutdown", removed),
            Err(e) => warn!("Failed to purge artifact copies: {}", e),
        }
    }
}

impl HostInner {
    async fn release_artifact(&self, worker_id: WorkerId, path: &Path) {
        if let Err(e) = self.artifacts.release(path).await {
            warn!(worker_id = %worker_id, "Failed to remove artifact copy {:?}: {}", path, e);
        }
    }
}

/// Everything a supervisor task owns for one worker
struct Supervised {
    worker_id: WorkerId,
    process: WorkerProcess,
    kill_rx: mpsc::Receiver<()>,
    exited_tx: oneshot::Sender<()>,
    channel_task: JoinHandle<()>,
    artifact_path: PathBuf,
}

async fn supervise(inner: Arc<HostInner>, supervised: Supervised) {
    let Supervised {
        worker_id,
        mut process,
        mut kill_rx,
        exited_tx,
        mut channel_task,
        artifact_path,
    } = supervised;

    let mut kill_open = true;
    let status = loop {
        let kill_requested = tokio::select! {
            status = process.wait() => break status,
            request = kill_rx.recv(), if kill_open => request.is_some(),
        };
        if kill_requested {
            process.start_kill();
        } else {
            kill_open = false;
        }
    };

    let exit_code = match status {
        Ok(code) => code,
        Err(e) => {
            warn!(worker_id = %worker_id, "Failed to wait for worker: {}", e);
            -1
        }
    };

    // Stops a channel that is still waiting for its worker to connect
    let _ = exited_tx.send(());

    if tokio::time::timeout(DRAIN_TIMEOUT, process.finish_output())
        .await
        .is_err()
    {
        warn!(worker_id = %worker_id, "Timed out draining worker output");
    }
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut channel_task)
        .await
        .is_err()
    {
        warn!(worker_id = %worker_id, "Timed out draining worker channel");
        channel_task.abort();
    }

    inner.registry.remove(worker_id).await;
    inner.release_artifact(worker_id, &artifact_path).await;

    info!(worker_id = %worker_id, exit_code, "Worker exited");
    if inner.events.send(WorkerEvent::exit(worker_id, exit_code)).is_err() {
        debug!(worker_id = %worker_id, "No subscribers for exit event");
    }
}

#[async_trait]
impl WorkerControl for WorkerHost {
    async fn create(&self, script_reference: &str) -> longday_core::Result<WorkerId> {
        WorkerHost::create(self, script_reference)
            .await
            .map_err(Into::into)
    }

    async fn post_message(&self, worker_id: WorkerId, payload: Value) -> longday_core::Result<()> {
        WorkerHost::post_message(self, worker_id, payload)
            .await
            .map_err(Into::into)
    }

    async fn terminate(&self, worker_id: WorkerId) -> longday_core::Result<()> {
        WorkerHost::terminate(self, worker_id)
            .await
            .map_err(Into::into)
    }

    async fn live_workers(&self) -> longday_core::Result<Vec<WorkerId>> {
        Ok(self.live_ids().await)
    }
}
