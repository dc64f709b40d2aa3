//! Longday shell
//!
//! Composition root: loads the app configuration, builds the API registry,
//! worker host and task manager, and serves the bridge over Socket.IO with
//! a small REST surface beside it.

mod api;
mod bridge;
mod config;
mod routes;
mod socket;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use longday_core::worker::WorkerManager;
use worker_host::WorkerHost;

use crate::api::ApiRegistry;
use crate::bridge::Bridge;
use crate::config::ShellConfig;
use crate::socket::{create_socket_layer, forward_manager_state, spawn_event_forwarder, SocketState};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "longday_shell=debug,worker_host=debug,tower_http=debug,socketioxide=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app_root = config::resolve_app_root();
    tracing::info!("Using app root: {:?}", app_root);

    let config = ShellConfig::load(&app_root).context("Failed to load configuration")?;
    tracing::info!("Starting {} ({})", config.app.product_name, config.app.app_id);

    let host = WorkerHost::new(config.host_config(&app_root));
    let api = Arc::new(ApiRegistry::from_config(&config));

    // The manager reaches workers through the bridge; the bridge routes
    // `tasks.*` back to the manager
    let bridge = Bridge::new(host.clone(), api);
    let manager = Arc::new(WorkerManager::new(Arc::new(bridge.clone())));
    let bridge = bridge.with_tasks(Arc::clone(&manager));
    let manager_task = tokio::spawn(Arc::clone(&manager).run(bridge.subscribe()));

    let (socket_layer, io) = create_socket_layer(SocketState {
        bridge: bridge.clone(),
    });
    let forwarder = spawn_event_forwarder(io.clone(), bridge.subscribe());
    let _state_subscription = forward_manager_state(io, &manager);

    let app_state = AppState::new(config.clone(), bridge, manager);

    // Layers are applied bottom-to-top, so CorsLayer is added last to be applied first
    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::workers::router())
        .with_state(app_state)
        .layer(socket_layer)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        );

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Socket.IO and REST listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutting down workers");
    host.shutdown().await;
    forwarder.abort();
    manager_task.abort();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
