//! `app.*` functions

use serde_json::json;

use crate::config::ShellConfig;

use super::ApiRegistry;

/// Expose the client-safe part of the config
pub fn register(registry: &mut ApiRegistry, config: &ShellConfig) {
    let public = json!({
        "window": { "title": config.window.title },
    });
    registry.register("app", "getPublicConfig", move |_args| {
        let public = public.clone();
        async move { Ok(public) }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_public_config_only_has_title() {
        let mut config = ShellConfig::default();
        config.window.title = "Longday".to_string();
        let mut registry = ApiRegistry::new();
        register(&mut registry, &config);

        let public = registry.call("app.getPublicConfig", vec![]).await.unwrap();
        assert_eq!(public, json!({"window": {"title": "Longday"}}));
    }
}
