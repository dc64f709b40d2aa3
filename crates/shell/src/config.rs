//! Shell configuration
//!
//! `longday.config.json` in the app root is merged over the defaults field
//! by field, then environment variables override individual settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use worker_artifact::ArtifactConfig;
use worker_host::{HostConfig, RunnerConfig};

/// Config file looked up in the app root
pub const CONFIG_FILE_NAME: &str = "longday.config.json";

pub const ENV_APP_ROOT: &str = "LONGDAY_APP_ROOT";
pub const ENV_CONFIG: &str = "LONGDAY_CONFIG";
pub const ENV_PORT: &str = "LONGDAY_PORT";
pub const ENV_ARTIFACT_DIR: &str = "LONGDAY_ARTIFACT_DIR";
pub const ENV_WORKER_RUNNER: &str = "LONGDAY_WORKER_RUNNER";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppIdentity {
    pub app_id: String,
    pub product_name: String,
}

impl Default for AppIdentity {
    fn default() -> Self {
        Self {
            app_id: "com.electron.alldaylongapp".to_string(),
            product_name: "All Day Long App".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "All Day Long App".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Loopback port serving Socket.IO and REST
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerSettings {
    /// Built artifacts; relative paths are resolved against the app root
    pub artifact_dir: PathBuf,
    /// Per-worker copies; defaults to a directory under the system temp dir
    pub temp_dir: Option<PathBuf>,
    pub runner: Option<RunnerConfig>,
    pub shutdown_grace_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("server").join("workers-dist"),
            temp_dir: None,
            runner: None,
            shutdown_grace_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShellConfig {
    pub app: AppIdentity,
    pub window: WindowConfig,
    pub server: ServerConfig,
    /// Built-in API modules to register
    pub api_modules: Vec<String>,
    pub workers: WorkerSettings,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            app: AppIdentity::default(),
            window: WindowConfig::default(),
            server: ServerConfig::default(),
            api_modules: vec![
                "system".to_string(),
                "settings".to_string(),
                "app".to_string(),
            ],
            workers: WorkerSettings::default(),
        }
    }
}

impl ShellConfig {
    /// Load the config for `app_root`, honoring environment overrides
    pub fn load(app_root: &Path) -> Result<Self, ConfigError> {
        let path = std::env::var(ENV_CONFIG)
            .map(PathBuf::from)
            .unwrap_or_else(|_| app_root.join(CONFIG_FILE_NAME));

        let mut config = Self::load_file(&path)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Read a config file; a missing file yields the defaults
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{:?} not found. Using default settings.", path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded app configuration from {:?}", path);
        Ok(config)
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_PORT) {
            self.server.port = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_PORT,
                value: value.clone(),
            })?;
        }

        if let Some(value) = lookup(ENV_ARTIFACT_DIR).filter(|v| !v.trim().is_empty()) {
            self.workers.artifact_dir = PathBuf::from(value);
        }

        if let Some(value) = lookup(ENV_WORKER_RUNNER) {
            // An empty runner means executing artifacts directly
            self.workers.runner = RunnerConfig::parse(&value);
        }

        Ok(())
    }

    /// Host settings with paths resolved against `app_root`
    pub fn host_config(&self, app_root: &Path) -> HostConfig {
        let artifact_dir = if self.workers.artifact_dir.is_absolute() {
            self.workers.artifact_dir.clone()
        } else {
            app_root.join(&self.workers.artifact_dir)
        };

        let defaults = ArtifactConfig::default();
        HostConfig {
            artifacts: ArtifactConfig {
                artifact_dir,
                temp_dir: self.workers.temp_dir.clone().unwrap_or(defaults.temp_dir),
                extension: defaults.extension,
            },
            runner: self.workers.runner.clone(),
            app_root: app_root.to_path_buf(),
            shutdown_grace: Duration::from_millis(self.workers.shutdown_grace_ms),
            ..HostConfig::default()
        }
    }
}

/// App root from the environment, or the current directory
pub fn resolve_app_root() -> PathBuf {
    std::env::var(ENV_APP_ROOT)
        .map(PathBuf::from)
        .or_else(|_| std::env::current_dir())
        .unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ShellConfig::load_file(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config, ShellConfig::default());
        assert_eq!(config.workers.shutdown_grace_ms, 2000);
    }

    #[test]
    fn test_file_merges_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"window": {"title": "My first app"}, "workers": {"runner": {"command": "node"}}}"#,
        )
        .unwrap();

        let config = ShellConfig::load_file(&path).unwrap();
        assert_eq!(config.window.title, "My first app");
        assert_eq!(config.window.width, 800);
        assert_eq!(config.app, AppIdentity::default());
        assert_eq!(config.workers.runner.unwrap().command, "node");
        assert_eq!(config.api_modules.len(), 3);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ window: ").unwrap();
        assert!(matches!(
            ShellConfig::load_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ShellConfig::default();
        config
            .apply_env(env(&[
                (ENV_PORT, "9123"),
                (ENV_ARTIFACT_DIR, "/opt/workers"),
                (ENV_WORKER_RUNNER, "node --no-warnings"),
            ]))
            .unwrap();
        assert_eq!(config.server.port, 9123);
        assert_eq!(config.workers.artifact_dir, PathBuf::from("/opt/workers"));
        assert_eq!(config.workers.runner.unwrap().args, vec!["--no-warnings"]);

        let mut config = ShellConfig::default();
        assert!(matches!(
            config.apply_env(env(&[(ENV_PORT, "not-a-port")])),
            Err(ConfigError::InvalidEnv { .. })
        ));
    }

    #[test]
    fn test_host_config_resolves_paths() {
        let config = ShellConfig::default();
        let host = config.host_config(Path::new("/srv/app"));
        assert_eq!(
            host.artifacts.artifact_dir,
            PathBuf::from("/srv/app/server/workers-dist")
        );
        assert_eq!(host.app_root, PathBuf::from("/srv/app"));
        assert_eq!(host.shutdown_grace, Duration::from_millis(2000));
    }
}
