use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use workstream_log::StreamLog;
use workstream_sdk::Publisher;

use crate::controller::Controller;

/// Shared state of the HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub publisher: Publisher,
    pub log: Arc<dyn StreamLog>,
    pub group: String,
}

/// Body returned by every page that reports status
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub liveness: bool,
    pub readiness: bool,
    pub stream_connected: bool,
    pub pending_messages: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Query of the publish trigger
///
/// `count` is parsed leniently: missing, malformed or below one means one.
/// At most `limit`, the stream's retention length, are published.
#[derive(Debug, Deserialize)]
pub struct PublishQuery {
    pub count: Option<String>,
}

impl PublishQuery {
    fn count(&self, limit: usize) -> usize {
        let requested = self
            .count
            .as_deref()
            .and_then(|c| c.trim().parse::<u64>().ok())
            .filter(|n| *n >= 1)
            .unwrap_or(1);
        usize::try_from(requested)
            .unwrap_or(usize::MAX)
            .min(limit.max(1))
    }
}

impl AppState {
    async fn status(&self, error: Option<String>) -> StatusResponse {
        let pending_messages = match self.publisher.pending_messages_count(&self.group).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(group = %self.group, error = %e, "Failed to count pending messages");
                0
            }
        };

        StatusResponse {
            liveness: self.controller.is_live(),
            readiness: self.controller.is_ready(),
            stream_connected: self.log.ping().await.is_ok(),
            pending_messages,
            error,
        }
    }
}

async fn index(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.status(None).await)
}

async fn liveness(State(state): State<AppState>) -> impl IntoResponse {
    if state.controller.is_live() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not live")
    }
}

async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if state.controller.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready yet")
    }
}

async fn update_liveness(State(state): State<AppState>) -> impl IntoResponse {
    let live = state.controller.toggle_liveness();
    tracing::info!(liveness = live, "Liveness toggled");
    Json(state.status(None).await)
}

async fn update_readiness(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.controller.toggle_readiness();
    tracing::info!(readiness = ready, "Readiness toggled");
    Json(state.status(None).await)
}

/// Publish the current time `count` times; a failure is reported in the body
async fn publish_time(
    State(state): State<AppState>,
    Query(query): Query<PublishQuery>,
) -> impl IntoResponse {
    let count = query.count(state.publisher.config().max_stream_length);
    let mut error = None;
    for _ in 0..count {
        let now = chrono::Utc::now().to_rfc3339();
        if let Err(e) = state.publisher.publish(&now).await {
            tracing::error!(error = %e, "Failed to publish time");
            error = Some(e.to_string());
            break;
        }
    }
    Json(state.status(error).await)
}

/// Create the router for the status and publish endpoints
pub fn create_router(state: AppState) -> Router<()> {
    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/liveness", get(liveness))
        .route("/readiness", get(readiness))
        .route("/update-liveness", get(update_liveness))
        .route("/update-readiness", get(update_readiness))
        .route("/publish-time", post(publish_time))
        .with_state(state)
        .layer(cors_layer)
}

/// Serve on the specified port until `shutdown` fires
pub async fn start_server(
    state: AppState,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Starting Workstream server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request},
    };
    use tower::ServiceExt;
    use workstream_log::{MemoryStreamLog, StreamId};
    use workstream_sdk::PublisherConfig;

    use super::*;

    const STREAM: &str = "jobs";
    const GROUP: &str = "workers";

    async fn state() -> (AppState, Arc<MemoryStreamLog>) {
        let log = MemoryStreamLog::new();
        log.create_group(STREAM, GROUP, StreamId::ZERO).await.unwrap();
        let state = AppState {
            controller: Arc::new(Controller::new()),
            publisher: Publisher::new(
                log.clone(),
                PublisherConfig::new(STREAM).with_max_stream_length(3),
            ),
            log: log.clone(),
            group: GROUP.to_string(),
        };
        (state, log)
    }

    async fn send(app: Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn status_of(app: Router, method: Method, uri: &str) -> StatusResponse {
        let (code, body) = send(app, method, uri).await;
        assert_eq!(code, StatusCode::OK);
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_index_reports_status() {
        let (state, _log) = state().await;

        let status = status_of(create_router(state), Method::GET, "/").await;

        assert_eq!(
            status,
            StatusResponse {
                liveness: true,
                readiness: true,
                stream_connected: true,
                pending_messages: 0,
                error: None,
            }
        );
    }

    #[tokio::test]
    async fn test_health_checks_follow_toggles() {
        let (state, _log) = state().await;
        let app = create_router(state);

        let (code, body) = send(app.clone(), Method::GET, "/liveness").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, b"ok");

        let status = status_of(app.clone(), Method::GET, "/update-liveness").await;
        assert!(!status.liveness);
        assert!(status.readiness);

        let (code, body) = send(app.clone(), Method::GET, "/liveness").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, b"not live");

        status_of(app.clone(), Method::GET, "/update-readiness").await;
        let (code, body) = send(app, Method::GET, "/readiness").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, b"not ready yet");
    }

    #[tokio::test]
    async fn test_publish_time_count() {
        let (state, log) = state().await;
        let app = create_router(state);

        let status = status_of(app.clone(), Method::POST, "/publish-time?count=2").await;
        assert_eq!(status.pending_messages, 2);
        assert_eq!(status.error, None);

        // Retention caps the backlog at the max stream length
        let status = status_of(app, Method::POST, "/publish-time?count=5").await;
        assert_eq!(status.pending_messages, 3);

        let entries = log.entries(STREAM);
        assert!(chrono::DateTime::parse_from_rfc3339(entries[0].field("msg").unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_publish_time_count_below_one() {
        for uri in ["/publish-time", "/publish-time?count=0", "/publish-time?count=abc"] {
            let (state, log) = state().await;

            status_of(create_router(state), Method::POST, uri).await;

            assert_eq!(log.entries(STREAM).len(), 1, "{}", uri);
        }
    }

    #[test]
    fn test_publish_count_capped_at_retention() {
        let query = |count: &str| PublishQuery {
            count: Some(count.to_string()),
        };

        assert_eq!(query("2").count(3), 2);
        assert_eq!(query("1000000000").count(3), 3);
        assert_eq!(query("99999999999999999999999").count(3), 1);
        assert_eq!(query("-4").count(3), 1);
        assert_eq!(query("5").count(0), 1);
    }

    #[tokio::test]
    async fn test_publish_time_huge_count_returns() {
        let (state, log) = state().await;

        let status = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            status_of(create_router(state), Method::POST, "/publish-time?count=4000000000"),
        )
        .await
        .unwrap();

        assert_eq!(status.pending_messages, 3);
        assert_eq!(log.entries(STREAM).len(), 3);
    }

    #[tokio::test]
    async fn test_publish_time_rejects_get() {
        let (state, _log) = state().await;
        let (code, _) = send(create_router(state), Method::GET, "/publish-time").await;
        assert_eq!(code, StatusCode::METHOD_NOT_ALLOWED);
    }
}
