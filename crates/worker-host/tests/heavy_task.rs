//! End-to-end tests against the real heavy-task worker binary

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::broadcast;

use longday_core::worker::{WorkerControl, WorkerEvent, WorkerId, WorkerManager, WorkerReport};
use worker_artifact::ArtifactConfig;
use worker_host::{HostConfig, HostError, WorkerHost};

const EVENT_TIMEOUT: Duration = Duration::from_secs(30);

fn heavy_task_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_heavy-task"))
}

fn create_test_host() -> (WorkerHost, TempDir) {
    let dir = TempDir::new().unwrap();
    let binary = heavy_task_binary();
    let artifact_dir = binary.parent().map(Path::to_path_buf).unwrap();

    let config = HostConfig {
        artifacts: ArtifactConfig {
            artifact_dir,
            temp_dir: dir.path().join("workers"),
            extension: std::env::consts::EXE_SUFFIX.to_string(),
        },
        app_root: dir.path().to_path_buf(),
        shutdown_grace: Duration::from_secs(5),
        ..HostConfig::default()
    };
    (WorkerHost::new(config), dir)
}

async fn next_event(events: &mut broadcast::Receiver<WorkerEvent>) -> WorkerEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for worker event")
        .expect("event stream closed")
}

/// Collect events for one worker up to and including its exit
async fn collect_until_exit(
    events: &mut broadcast::Receiver<WorkerEvent>,
    worker_id: WorkerId,
) -> (Vec<Value>, i32) {
    let mut messages = Vec::new();
    loop {
        match next_event(events).await {
            WorkerEvent::Message { worker_id: id, data } if id == worker_id => messages.push(data),
            WorkerEvent::Exit {
                worker_id: id,
                exit_code,
            } if id == worker_id => return (messages, exit_code),
            _ => {}
        }
    }
}

async fn wait_for_ready(events: &mut broadcast::Receiver<WorkerEvent>, worker_id: WorkerId) {
    loop {
        if let WorkerEvent::Message { worker_id: id, data } = next_event(events).await {
            if id == worker_id && WorkerReport::from_value(&data) == Some(WorkerReport::Ready) {
                return;
            }
        }
    }
}

#[tokio::test]
async fn test_heavy_task_runs_to_completion() {
    let (host, dir) = create_test_host();
    let mut events = host.subscribe();

    let worker_id = host.create("server/workers/heavy-task.js").await.unwrap();
    wait_for_ready(&mut events, worker_id).await;

    host.post_message(worker_id, json!({"command": "start", "iterations": 1000}))
        .await
        .unwrap();

    let (messages, exit_code) = collect_until_exit(&mut events, worker_id).await;
    assert_eq!(exit_code, 0);

    let reports: Vec<WorkerReport> = messages
        .iter()
        .filter_map(WorkerReport::from_value)
        .collect();

    let progress: Vec<f64> = reports
        .iter()
        .filter_map(|r| match r {
            WorkerReport::Progress { value } => Some(*value),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last().copied(), Some(100.0));

    assert_eq!(reports.first(), Some(&WorkerReport::status("Task started...")));
    match reports.last() {
        Some(WorkerReport::Result { value }) => {
            assert!(value.starts_with("Calculation result is"))
        }
        other => panic!("Expected a result report last, got: {:?}", other),
    }

    // The id is gone once exit has been observed
    assert_eq!(host.live_count().await, 0);
    assert!(matches!(
        host.post_message(worker_id, json!({"command": "start"})).await,
        Err(HostError::WorkerNotFound { .. })
    ));
    assert!(host.temp_dir().starts_with(dir.path().join("workers")));
    let copies = std::fs::read_dir(host.temp_dir()).unwrap().count();
    assert_eq!(copies, 0);
}

#[tokio::test]
async fn test_terminate_mid_run() {
    let (host, _dir) = create_test_host();
    let mut events = host.subscribe();

    let worker_id = host.create("heavy-task").await.unwrap();
    wait_for_ready(&mut events, worker_id).await;

    host.post_message(
        worker_id,
        json!({"command": "start", "iterations": 50_000_000_000u64}),
    )
    .await
    .unwrap();
    host.terminate(worker_id).await.unwrap();

    let (_, exit_code) = collect_until_exit(&mut events, worker_id).await;
    assert_ne!(exit_code, 0);
    assert!(events.try_recv().is_err());
    assert!(host.terminate(worker_id).await.is_err());
}

#[tokio::test]
async fn test_two_workers_for_same_script() {
    let (host, _dir) = create_test_host();
    let mut events = host.subscribe();

    let first = host.create("heavy-task").await.unwrap();
    let second = host.create("heavy-task").await.unwrap();
    assert_ne!(first, second);

    let listed = host.list().await;
    assert_eq!(listed.len(), 2);
    assert_ne!(listed[0].artifact_path, listed[1].artifact_path);

    host.terminate(first).await.unwrap();
    host.terminate(second).await.unwrap();

    let mut exited = Vec::new();
    while exited.len() < 2 {
        if let WorkerEvent::Exit { worker_id, .. } = next_event(&mut events).await {
            exited.push(worker_id);
        }
    }
    assert!(exited.contains(&first));
    assert!(exited.contains(&second));
}

#[tokio::test]
async fn test_missing_artifact_names_the_build_step() {
    let (host, _dir) = create_test_host();
    let err: longday_core::Error = WorkerControl::create(&host, "no-such-task")
        .await
        .unwrap_err();
    assert!(matches!(err, longday_core::Error::ArtifactMissing { .. }));
}

#[tokio::test]
async fn test_manager_drives_heavy_task() {
    let (host, _dir) = create_test_host();
    let manager = Arc::new(WorkerManager::new(Arc::new(host.clone())));
    let pump = tokio::spawn(Arc::clone(&manager).run(host.subscribe()));

    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    let _subscription = manager.subscribe(move |snapshot| {
        if snapshot.values().any(|s| s.exit_code.is_some()) {
            let _ = done_tx.send(());
        }
    });

    let worker_id = manager
        .start_task(
            "heavy-task",
            Some(json!({"command": "start", "iterations": 1000})),
        )
        .await
        .unwrap();

    tokio::time::timeout(EVENT_TIMEOUT, done_rx.recv())
        .await
        .expect("worker never exited")
        .unwrap();

    let state = manager.get(worker_id).unwrap();
    assert!(!state.is_running);
    assert_eq!(state.exit_code, Some(0));
    assert_eq!(state.progress, 100);
    assert!(state.status.starts_with("Calculation result is"));

    host.shutdown().await;
    pump.abort();
}

#[tokio::test]
async fn test_worker_failure_is_reported_before_exit() {
    let (host, _dir) = create_test_host();
    let mut events = host.subscribe();

    let worker_id = host.create("heavy-task").await.unwrap();
    wait_for_ready(&mut events, worker_id).await;

    host.post_message(worker_id, json!({"command": "start", "iterations": -5}))
        .await
        .unwrap();

    let (messages, exit_code) = collect_until_exit(&mut events, worker_id).await;
    assert_eq!(exit_code, 1);
    match messages.last().and_then(WorkerReport::from_value) {
        Some(WorkerReport::Error { message }) => {
            assert!(message.contains("Invalid iteration count"))
        }
        other => panic!("Expected an error report last, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_manager_records_worker_error() {
    let (host, _dir) = create_test_host();
    let manager = Arc::new(WorkerManager::new(Arc::new(host.clone())));
    let pump = tokio::spawn(Arc::clone(&manager).run(host.subscribe()));

    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    let _subscription = manager.subscribe(move |snapshot| {
        if snapshot.values().any(|s| s.exit_code.is_some()) {
            let _ = done_tx.send(());
        }
    });

    let worker_id = manager
        .start_task(
            "heavy-task",
            Some(json!({"command": "start", "iterations": "lots"})),
        )
        .await
        .unwrap();

    tokio::time::timeout(EVENT_TIMEOUT, done_rx.recv())
        .await
        .expect("worker never exited")
        .unwrap();

    let state = manager.get(worker_id).unwrap();
    assert!(!state.is_running);
    assert_eq!(state.exit_code, Some(1));
    assert!(state.status.starts_with("Error: "));
    assert!(state.status.contains("Invalid iteration count"));
    assert!(state.error.is_some());

    host.shutdown().await;
    pump.abort();
}
