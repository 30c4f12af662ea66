//! `GET /health` for process supervisors.

use crate::{GatewaySnapshot, GatewayStats};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

pub struct HealthState {
    pub platform: String,
    pub stats: Arc<GatewayStats>,
}

type SharedState = Arc<HealthState>;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    platform: String,
    #[serde(flatten)]
    stats: GatewaySnapshot,
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the health endpoint on `addr` until the process stops.
pub async fn serve(state: HealthState, addr: &str) -> std::io::Result<()> {
    let app = build_router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Gateway health endpoint listening");
    axum::serve(listener, app).await
}

/// 200 while the platform connection is up, 503 while reconnecting.
async fn health_handler(State(state): State<SharedState>) -> (StatusCode, Json<HealthResponse>) {
    let stats = state.stats.snapshot();
    let (code, status) = if stats.connected {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "reconnecting")
    };
    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            platform: state.platform.clone(),
            stats,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get_health(stats: Arc<GatewayStats>) -> (StatusCode, serde_json::Value) {
        let app = build_router(Arc::new(HealthState {
            platform: "console".into(),
            stats,
        }));
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn unavailable_until_connected() {
        let stats = Arc::new(GatewayStats::new());
        let (status, body) = get_health(stats.clone()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "reconnecting");

        stats.record_connect();
        let (status, body) = get_health(stats).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["platform"], "console");
        assert_eq!(body["connects"], 1);
    }
}
