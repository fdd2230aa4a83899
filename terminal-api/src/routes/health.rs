//! Health check endpoints

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::Serialize;
use terminal_services::PipelineHealth;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    pipeline: PipelineHealth,
    subscribed_symbols: Vec<String>,
    clients: usize,
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let pipeline_health = state.pipeline.health();

    let status = if pipeline_health.healthy {
        "healthy"
    } else {
        "degraded"
    };

    let response = HealthResponse {
        status: status.to_string(),
        pipeline: pipeline_health,
        subscribed_symbols: state.ws_state.subscriptions.active_symbols(),
        clients: state.ws_state.subscriptions.total_clients(),
    };

    let code = if status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(response))
}

/// Simple liveness check (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Create health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::app_state;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use terminal_core::SessionState;
    use terminal_ibkr::FeedEvent;
    use tower::ServiceExt;

    async fn get(state: AppState, uri: &str) -> (StatusCode, String) {
        let response = routes()
            .with_state(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_disconnected_feed_is_degraded() {
        let (status, body) = get(app_state(), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("\"degraded\""));
    }

    #[tokio::test]
    async fn test_connected_feed_is_healthy() {
        let state = app_state();
        state
            .pipeline
            .apply_event(FeedEvent::State(SessionState::Connected));

        let (status, _) = get(state, "/health").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_liveness() {
        assert_eq!(get(app_state(), "/health/live").await, (StatusCode::OK, "OK".to_string()));
    }
}
