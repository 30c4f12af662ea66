//! HTTP broker service.
//!
//! Exposes a [`Broker`] to other processes. Every route except `/health`
//! requires `Authorization: Bearer <token>` when a token is configured.
//! Subscriptions are streamed as server-sent events, one event per payload.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use futures::Stream;
use seedkeeper_core::error::BrokerError;
use seedkeeper_core::{Broker, WorkItem};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

/// Longest a single claim request may hold the connection.
const MAX_CLAIM_WAIT: Duration = Duration::from_secs(30);

/// Shared state of the broker service.
pub struct BrokerService {
    pub broker: Arc<dyn Broker>,
    pub token: Option<String>,
}

type SharedService = Arc<BrokerService>;

// ── Wire types (shared with the client) ────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ClaimRequest {
    pub wait_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ClaimBody {
    pub item: WorkItem,
    pub receipt: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AckRequest {
    pub receipt: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SetRequest {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ValueBody {
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PublishRequest {
    pub payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CountBody {
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FlagBody {
    pub ok: bool,
}

// ── Router ─────────────────────────────────────────────────────

/// Build the broker service router.
pub fn build_router(service: SharedService) -> Router {
    let protected = Router::new()
        .route("/queues/{name}/push", post(push_handler))
        .route("/queues/{name}/claim", post(claim_handler))
        .route("/queues/{name}/ack", post(ack_handler))
        .route("/queues/{name}/len", get(len_handler))
        .route(
            "/kv/{key}",
            get(get_handler).put(set_handler).delete(delete_handler),
        )
        .route("/kv/{key}/nx", post(set_nx_handler))
        .route("/kv-prefix/{prefix}", delete(delete_prefix_handler))
        .route("/channels/{name}/publish", post(publish_handler))
        .route("/channels/{name}/subscribe", get(subscribe_handler))
        .layer(middleware::from_fn_with_state(
            service.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(service)
}

/// Serve `broker` on `addr` until the process stops.
pub async fn serve(
    broker: Arc<dyn Broker>,
    token: Option<String>,
    addr: &str,
) -> std::io::Result<()> {
    if token.is_none() {
        warn!("Broker service running without a token; any client can connect");
    }
    let app = build_router(Arc::new(BrokerService { broker, token }));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Broker service listening");
    axum::serve(listener, app).await
}

/// Bearer-token check for everything except `/health`.
async fn auth_middleware(
    State(service): State<SharedService>,
    req: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = service.token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if provided == Some(expected) {
        Ok(next.run(req).await)
    } else {
        warn!(path = %req.uri().path(), "Unauthorized broker request");
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// Map a broker failure onto an HTTP status.
struct ApiError(BrokerError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            BrokerError::Unauthorized => StatusCode::UNAUTHORIZED,
            BrokerError::Serialization(_) | BrokerError::Protocol(_) => StatusCode::BAD_REQUEST,
            BrokerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.0.to_string()).into_response()
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        Self(e)
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Handlers ───────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    broker: String,
    version: &'static str,
}

async fn health_handler(State(service): State<SharedService>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        broker: service.broker.name().to_string(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn push_handler(
    State(service): State<SharedService>,
    Path(name): Path<String>,
    Json(item): Json<WorkItem>,
) -> ApiResult<StatusCode> {
    service.broker.push(&name, &item).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn claim_handler(
    State(service): State<SharedService>,
    Path(name): Path<String>,
    Json(req): Json<ClaimRequest>,
) -> ApiResult<Json<Option<ClaimBody>>> {
    let wait = Duration::from_millis(req.wait_ms).min(MAX_CLAIM_WAIT);
    let claim = service.broker.claim(&name, wait).await?;
    Ok(Json(claim.map(|c| ClaimBody {
        item: c.item,
        receipt: c.receipt,
    })))
}

async fn ack_handler(
    State(service): State<SharedService>,
    Path(name): Path<String>,
    Json(req): Json<AckRequest>,
) -> ApiResult<Json<FlagBody>> {
    let ok = service.broker.ack(&name, &req.receipt).await?;
    Ok(Json(FlagBody { ok }))
}

async fn len_handler(
    State(service): State<SharedService>,
    Path(name): Path<String>,
) -> ApiResult<Json<CountBody>> {
    let count = service.broker.queue_len(&name).await?;
    Ok(Json(CountBody { count }))
}

async fn get_handler(
    State(service): State<SharedService>,
    Path(key): Path<String>,
) -> ApiResult<Response> {
    Ok(match service.broker.get(&key).await? {
        Some(value) => Json(ValueBody { value }).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    })
}

async fn set_handler(
    State(service): State<SharedService>,
    Path(key): Path<String>,
    Json(req): Json<SetRequest>,
) -> ApiResult<StatusCode> {
    let ttl = req.ttl_ms.map(Duration::from_millis);
    service.broker.set(&key, &req.value, ttl).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_nx_handler(
    State(service): State<SharedService>,
    Path(key): Path<String>,
    Json(req): Json<SetRequest>,
) -> ApiResult<Json<FlagBody>> {
    let ttl = req.ttl_ms.map(Duration::from_millis);
    let ok = service.broker.set_if_absent(&key, &req.value, ttl).await?;
    Ok(Json(FlagBody { ok }))
}

async fn delete_handler(
    State(service): State<SharedService>,
    Path(key): Path<String>,
) -> ApiResult<Json<FlagBody>> {
    let ok = service.broker.delete(&key).await?;
    Ok(Json(FlagBody { ok }))
}

async fn delete_prefix_handler(
    State(service): State<SharedService>,
    Path(prefix): Path<String>,
) -> ApiResult<Json<CountBody>> {
    let count = service.broker.delete_prefix(&prefix).await?;
    Ok(Json(CountBody { count }))
}

async fn publish_handler(
    State(service): State<SharedService>,
    Path(name): Path<String>,
    Json(req): Json<PublishRequest>,
) -> ApiResult<Json<CountBody>> {
    let count = service.broker.publish(&name, &req.payload).await?;
    Ok(Json(CountBody { count }))
}

async fn subscribe_handler(
    State(service): State<SharedService>,
    Path(name): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let subscription = service.broker.subscribe(&name).await?;
    info!(channel = %name, "Remote subscriber attached");

    let stream = ReceiverStream::new(subscription)
        .map(|payload| Ok::<_, Infallible>(Event::default().data(payload)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBroker;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(token: Option<&str>) -> Router {
        build_router(Arc::new(BrokerService {
            broker: Arc::new(MemoryBroker::default()),
            token: token.map(String::from),
        }))
    }

    fn put(uri: &str, body: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("PUT")
            .uri(uri)
            .header("Content-Type", "application/json");
        if let Some(t) = token {
            builder = builder.header("Authorization", format!("Bearer {t}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn health_is_open() {
        let response = app(Some("secret"))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_routes_require_token() {
        let response = app(Some("secret"))
            .oneshot(put("/kv/a", r#"{"value":"1"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(Some("secret"))
            .oneshot(put("/kv/a", r#"{"value":"1"}"#, Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn kv_set_then_get() {
        let app = app(Some("secret"));
        let response = app
            .clone()
            .oneshot(put("/kv/greeting", r#"{"value":"hello"}"#, Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/kv/greeting")
                    .header("Authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ValueBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.value, "hello");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/kv/missing")
                    .header("Authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_claim_returns_null() {
        let response = app(None)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/queues/q/claim")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"wait_ms":0}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"null");
    }
}
