//! Route handlers

pub mod health;
pub mod workers;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use longday_core::worker::WorkerManager;
    use worker_artifact::ArtifactConfig;
    use worker_host::{HostConfig, WorkerHost};

    use crate::api::ApiRegistry;
    use crate::bridge::Bridge;
    use crate::config::ShellConfig;
    use crate::state::AppState;

    pub fn create_test_state() -> (AppState, TempDir) {
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
        let bridge = Bridge::new(host, Arc::new(ApiRegistry::new()));
        let manager = Arc::new(WorkerManager::new(Arc::new(bridge.clone())));
        let bridge = bridge.with_tasks(Arc::clone(&manager));
        (AppState::new(ShellConfig::default(), bridge, manager), dir)
    }

    pub async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }
}
