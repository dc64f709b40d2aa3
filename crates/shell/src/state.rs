//! Application state

use std::sync::Arc;

use longday_core::worker::WorkerManager;
use worker_host::WorkerHost;

use crate::bridge::Bridge;
use crate::config::ShellConfig;

/// Shared application state for REST handlers
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ShellConfig,
    bridge: Bridge,
    manager: Arc<WorkerManager>,
}

impl AppState {
    pub fn new(config: ShellConfig, bridge: Bridge, manager: Arc<WorkerManager>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                bridge,
                manager,
            }),
        }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.inner.config
    }

    pub fn host(&self) -> &WorkerHost {
        self.inner.bridge.host()
    }

    pub fn manager(&self) -> &Arc<WorkerManager> {
        &self.inner.manager
    }
}
