//! HTTP endpoints for the relay.
//!
//! # Example
//!
//! ```ignore
//! use loadlink_relay::{AppState, Config, api};
//!
//! let app = api::app(AppState::new(Config::default(), None));
//! ```

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use time::OffsetDateTime;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::ws;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/health", get(health))
}

/// The full application: API and WebSocket routes with tracing and CORS.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(router())
        .merge(ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub uptime_seconds: i64,
    pub esp_clients: usize,
    pub browser_clients: usize,
    pub sink_enabled: bool,
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let now = OffsetDateTime::now_utc();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now,
        uptime_seconds: (now - state.started_at).whole_seconds().max(0),
        esp_clients: state.hub.esp_count().await,
        browser_clients: state.hub.browser_count().await,
        sink_enabled: state.sink.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::messages::ClientRole;

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = AppState::new(Config::default(), None);
        let _esp = state.hub.register(ClientRole::Esp).await;
        let _a = state.hub.register(ClientRole::Browser).await;
        let _b = state.hub.register(ClientRole::Browser).await;

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["timestamp"].is_string());
        assert_eq!(json["esp_clients"], 1);
        assert_eq!(json["browser_clients"], 2);
        assert_eq!(json["sink_enabled"], false);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let state = AppState::new(Config::default(), None);
        let response = app(state)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let state = AppState::new(Config::default(), None);
        let response = app(state)
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
