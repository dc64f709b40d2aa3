//! `settings.*` functions backed by in-memory settings

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::info;

use longday_core::{Error, Result};

use super::{string_arg, ApiRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub theme: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
        }
    }
}

pub fn register(registry: &mut ApiRegistry) {
    let settings = Arc::new(RwLock::new(AppSettings::default()));

    let store = Arc::clone(&settings);
    registry.register("settings", "getSettings", move |_args| {
        let store = Arc::clone(&store);
        async move {
            let current = store.read().await.clone();
            serde_json::to_value(current).map_err(Error::from)
        }
    });

    let store = settings;
    registry.register("settings", "setTheme", move |args: Vec<Value>| {
        let store = Arc::clone(&store);
        async move {
            let theme = match string_arg(&args, 0) {
                Some(theme @ ("light" | "dark")) => theme.to_string(),
                _ => {
                    return Err(Error::InvalidInput(
                        "Invalid theme name. Must be \"light\" or \"dark\".".to_string(),
                    ))
                }
            };

            store.write().await.theme = theme.clone();
            info!("Theme changed to: {}", theme);
            Ok(json!({ "success": true, "theme": theme }))
        }
    });
}
