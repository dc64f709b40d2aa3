//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
    app_name: String,
    live_workers: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        app_name: state.config().app.product_name.clone(),
        live_workers: state.host().live_count().await,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{create_test_state, get_json};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_health() {
        let (state, _dir) = create_test_state();
        let app = router().with_state(state);

        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["liveWorkers"], 0);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
