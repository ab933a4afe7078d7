//! REST API for the portfolio chat agent
//!
//! The account id is taken from the `x-account-id` header set by the
//! upstream auth gateway. Request bodies never carry it.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::agent::{apology, AgentService};
use crate::backend::BackendHandles;
use crate::models::ChatRequest;
use crate::threads::DEFAULT_ACTIVE_THREAD_LIMIT;

pub const ACCOUNT_HEADER: &str = "x-account-id";
pub const THREAD_HEADER: &str = "x-thread-id";

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub voice_mode: bool,
}

#[derive(Debug, Deserialize)]
pub struct ThreadListQuery {
    pub limit: Option<usize>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiError = (StatusCode, Json<ApiResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ApiResponse::error(message.into())))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<AgentService>,
    pub handles: BackendHandles,
    pub metrics: Option<PrometheusHandle>,
    pub llm_configured: bool,
}

/// =============================
/// Authenticated Account
/// =============================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedAccount(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedAccount
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACCOUNT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(AuthenticatedAccount)
            .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Missing or invalid account context"))
    }
}

fn chat_request(account_id: i64, body: ChatBody) -> Result<ChatRequest, ApiError> {
    if body.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Message must not be empty"));
    }

    let mut request = ChatRequest::new(account_id, body.message);
    request.thread_id = body.thread_id;
    request.voice_mode = body.voice_mode;
    Ok(request)
}

/// One SSE event; multi-line payloads become several `data:` lines.
pub fn sse_frame(data: &str) -> String {
    let mut frame = String::with_capacity(data.len() + 8);
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "model": state.service.model_name(),
        "llm_configured": state.llm_configured,
        "market_data_configured": state.handles.market.is_some(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoints
/// =============================

async fn chat(
    State(state): State<ApiState>,
    AuthenticatedAccount(account_id): AuthenticatedAccount,
    Json(body): Json<ChatBody>,
) -> Result<Json<ApiResponse>, ApiError> {
    let request = chat_request(account_id, body)?;
    info!(account_id, thread_id = ?request.thread_id, "Received chat request");

    let reply = state.service.run_chat(request, &state.handles).await;
    Ok(Json(ApiResponse::success(reply)))
}

async fn chat_stream(
    State(state): State<ApiState>,
    AuthenticatedAccount(account_id): AuthenticatedAccount,
    Json(body): Json<ChatBody>,
) -> Result<Response, ApiError> {
    let request = chat_request(account_id, body)?;
    info!(account_id, thread_id = ?request.thread_id, "Received streaming chat request");

    let stream = state
        .service
        .stream_chat(request, &state.handles)
        .await
        .map_err(|e| {
            warn!(account_id, error = %e, "Could not start chat stream");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, apology(&e))
        })?;

    let body = stream
        .chunks
        .map(|chunk| Ok::<String, Infallible>(sse_frame(&chunk.sse_data())));

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(THREAD_HEADER, HeaderValue::from(stream.thread_id));

    Ok((headers, Body::from_stream(body)).into_response())
}

/// =============================
/// Thread Endpoints
/// =============================

async fn list_threads(
    State(state): State<ApiState>,
    AuthenticatedAccount(account_id): AuthenticatedAccount,
    Query(query): Query<ThreadListQuery>,
) -> Result<Json<ApiResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_ACTIVE_THREAD_LIMIT).clamp(1, 100);

    let threads = state
        .service
        .threads()
        .list_active(account_id, limit)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(ApiResponse::success(threads)))
}

async fn close_thread(
    State(state): State<ApiState>,
    AuthenticatedAccount(account_id): AuthenticatedAccount,
    Path(thread_id): Path<i64>,
) -> Result<Json<ApiResponse>, ApiError> {
    let closed = state
        .service
        .threads()
        .close(thread_id, account_id)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    if !closed {
        return Err(api_error(StatusCode::NOT_FOUND, "Thread not found"));
    }

    info!(account_id, thread_id, "Closed conversation thread");
    Ok(Json(ApiResponse::success(serde_json::json!({
        "thread_id": thread_id,
        "closed": true,
    }))))
}

/// =============================
/// Metrics Endpoint
/// =============================

async fn metrics(State(state): State<ApiState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/ai/chat/health", get(health))
        .route("/api/ai/chat", post(chat))
        .route("/api/ai/chat/stream", post(chat_stream))
        .route("/api/ai/chat/threads", get(list_threads))
        .route("/api/ai/chat/threads/:thread_id", delete(close_thread))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryHoldings;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::config::AgentSettings;
    use crate::llm::{ModelReply, ScriptedModel};
    use crate::prompts::PromptBuilder;
    use crate::threads::{InMemoryThreadStore, ThreadManager};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(replies: Vec<ModelReply>) -> ApiState {
        let threads = Arc::new(ThreadManager::new(Arc::new(InMemoryThreadStore::new()), 30));
        let service = AgentService::new(
            Arc::new(ScriptedModel::replies(replies)),
            threads,
            Arc::new(InMemoryCheckpointStore::new()),
            PromptBuilder::default(),
            AgentSettings::default(),
        );
        ApiState {
            service: Arc::new(service),
            handles: BackendHandles::new(Arc::new(InMemoryHoldings::new())),
            metrics: None,
            llm_configured: false,
        }
    }

    fn post_json(uri: &str, account: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(account) = account {
            builder = builder.header(ACCOUNT_HEADER, account);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_sse_frame_splits_lines() {
        assert_eq!(sse_frame("[DONE]"), "data: [DONE]\n\n");
        assert_eq!(sse_frame("a\nb"), "data: a\ndata: b\n\n");
    }

    #[tokio::test]
    async fn test_health() {
        let router = create_router(state(vec![]));
        let response = router
            .oneshot(Request::get("/api/ai/chat/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model"], "scripted");
    }

    #[tokio::test]
    async fn test_chat_requires_account_header() {
        let router = create_router(state(vec![ModelReply::text("hi")]));
        let response = router
            .oneshot(post_json("/api/ai/chat", None, serde_json::json!({"message": "hi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_message() {
        let router = create_router(state(vec![]));
        let response = router
            .oneshot(post_json("/api/ai/chat", Some("7"), serde_json::json!({"message": "  "})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_chat_returns_collected_reply() {
        let router = create_router(state(vec![ModelReply::text("Hello there!")]));
        let response = router
            .oneshot(post_json("/api/ai/chat", Some("7"), serde_json::json!({"message": "hi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: ApiResponse = serde_json::from_str(&body_string(response).await).unwrap();
        assert!(body.success);
        let data = body.data.unwrap();
        assert_eq!(data["text"], "Hello there!");
        assert!(data["thread_id"].is_i64());
    }

    #[tokio::test]
    async fn test_stream_emits_sse_frames() {
        let router = create_router(state(vec![ModelReply::text("Hi you")]));
        let response = router
            .oneshot(post_json("/api/ai/chat/stream", Some("7"), serde_json::json!({"message": "hi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        assert!(response.headers().get(THREAD_HEADER).is_some());
        assert_eq!(
            body_string(response).await,
            "data: Hi \n\ndata: you\n\ndata: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn test_thread_listing_and_close() {
        let state = state(vec![ModelReply::text("ok")]);
        let router = create_router(state.clone());

        router
            .clone()
            .oneshot(post_json("/api/ai/chat", Some("9"), serde_json::json!({"message": "hi"})))
            .await
            .unwrap();

        let response = router
            .clone()
            .oneshot(
                Request::get("/api/ai/chat/threads")
                    .header(ACCOUNT_HEADER, "9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body: ApiResponse = serde_json::from_str(&body_string(response).await).unwrap();
        let threads = body.data.unwrap();
        assert_eq!(threads.as_array().unwrap().len(), 1);
        let thread_id = threads[0]["id"].as_i64().unwrap();

        let delete = |account: &str| {
            Request::delete(format!("/api/ai/chat/threads/{}", thread_id))
                .header(ACCOUNT_HEADER, account)
                .body(Body::empty())
                .unwrap()
        };

        let other_account = router.clone().oneshot(delete("10")).await.unwrap();
        assert_eq!(other_account.status(), StatusCode::NOT_FOUND);

        let owner = router.oneshot(delete("9")).await.unwrap();
        assert_eq!(owner.status(), StatusCode::OK);
        assert!(state.service.threads().list_active(9, 20).await.unwrap().is_empty());
    }
}
