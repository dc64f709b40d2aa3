//! API registry: server-side functions callable by name over the bridge
//!
//! Functions are keyed `<module>.<function>` and take the invoke's
//! positional arguments.

pub mod app;
pub mod settings;
pub mod system;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use longday_core::{Error, Result};

use crate::config::ShellConfig;

/// A registered API function
pub type ApiFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

#[derive(Default)]
pub struct ApiRegistry {
    functions: HashMap<String, ApiFn>,
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry with the built-in modules named in the config
    pub fn from_config(config: &ShellConfig) -> Self {
        let mut registry = Self::new();
        for module in &config.api_modules {
            match module.as_str() {
                "system" => system::register(&mut registry),
                "settings" => settings::register(&mut registry),
                "app" => app::register(&mut registry, config),
                other => warn!("Unknown API module {:?}, skipping", other),
            }
        }
        info!("Successfully registered {} API functions.", registry.len());
        registry
    }

    /// Register `module.function`, replacing any earlier registration
    pub fn register<F, Fut>(&mut self, module: &str, function: &str, handler: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let key = format!("{}.{}", module, function);
        debug!("Registering API function {}", key);
        self.functions
            .insert(key, Arc::new(move |args| handler(args).boxed()));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.functions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.functions.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Call a function by key
    pub async fn call(&self, key: &str, args: Vec<Value>) -> Result<Value> {
        let function = self
            .functions
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Api(format!("API function \"{}\" is not registered.", key)))?;

        function(args)
            .await
            .inspect_err(|e| error!("Error during execution of API \"{}\": {}", key, e))
    }
}

/// Positional string argument, if present and a string
pub(crate) fn string_arg(args: &[Value], index: usize) -> Option<&str> {
    args.get(index).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_call() {
        let mut registry = ApiRegistry::new();
        registry.register("math", "double", |args: Vec<Value>| async move {
            let n = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(n * 2))
        });

        assert!(registry.contains("math.double"));
        assert_eq!(registry.call("math.double", vec![json!(21)]).await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_unregistered_function() {
        let registry = ApiRegistry::new();
        let err = registry.call("nope.missing", vec![]).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "API error: API function \"nope.missing\" is not registered."
        );
    }

    #[test]
    fn test_from_config_registers_builtins() {
        let registry = ApiRegistry::from_config(&ShellConfig::default());
        assert_eq!(
            registry.keys(),
            vec![
                "app.getPublicConfig",
                "settings.getSettings",
                "settings.setTheme",
                "system.getSystemInfo",
                "system.greet",
            ]
        );

        let config = ShellConfig {
            api_modules: vec!["system".to_string(), "weather".to_string()],
            ..ShellConfig::default()
        };
        assert_eq!(ApiRegistry::from_config(&config).len(), 2);
    }
}
