//! MCP Transport: JSON-RPC over Server-Sent Events, with a companion HTTP
//! POST endpoint for client-to-server messages.

use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::{Any, CorsLayer};

use crate::registry::ToolRegistry;
use crate::rpc::{handle_request, RpcRequest};
use crate::state::AppState;

#[derive(Clone)]
struct ServerState {
    app: Arc<AppState>,
    registry: Arc<ToolRegistry>,
}

/// tower-http's `CorsLayer` answers preflight with `200 OK` and has no knob
/// to change that, so the `OPTIONS -> 204` contract is handled here instead,
/// ahead of the `CorsLayer` in the stack.
async fn preflight_no_content(req: Request, next: Next) -> Response {
    if req.method() != Method::OPTIONS {
        return next.run(req).await;
    }
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = StatusCode::NO_CONTENT;
    let headers = resp.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET, POST, OPTIONS, DELETE"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type, Authorization"));
    resp
}

pub fn router(app: Arc<AppState>, registry: Arc<ToolRegistry>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/mcp", get(open_sse).delete(close_session))
        .route("/messages", post(post_message))
        .route("/health", get(health))
        .layer(cors)
        .layer(middleware::from_fn(preflight_no_content))
        .with_state(ServerState { app, registry })
}

async fn open_sse(State(state): State<ServerState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (session_id, rx) = state.app.sessions.open().await;
    let endpoint = Event::default().event("endpoint").data(format!("/messages?sessionId={session_id}"));
    let stream = tokio_stream::once(Ok(endpoint)).chain(UnboundedReceiverStream::new(rx).map(Ok));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(5)).text("keepalive"))
}

async fn close_session(State(state): State<ServerState>) -> StatusCode {
    if state.app.sessions.close().await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Deserialize)]
struct MessagesQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn post_message(
    State(state): State<ServerState>,
    Query(query): Query<MessagesQuery>,
    Json(req): Json<RpcRequest>,
) -> StatusCode {
    if !state.app.sessions.wait_for_session().await {
        return StatusCode::GONE;
    }

    if let Some(requested) = &query.session_id {
        if state.app.sessions.active_id().await.as_deref() != Some(requested.as_str()) {
            eprintln!("webpipe: POST /messages sessionId mismatch (requested {requested}); routing to active session anyway");
        }
    }

    let response = handle_request(&state.registry, state.app.clone(), req).await;
    let payload = serde_json::to_value(&response).unwrap_or_else(|_| json!({"jsonrpc": "2.0", "error": {"code": -32000, "message": "encode failure"}}));
    let event = Event::default().data(payload.to_string());
    if state.app.sessions.send(event).await {
        StatusCode::ACCEPTED
    } else {
        StatusCode::GONE
    }
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    let active_session_id = state.app.sessions.active_id().await;
    let has_active_transport = active_session_id.is_some();
    let sse_connection_alive = state.app.sessions.sse_alive().await;
    Json(json!({
        "ok": true,
        "activeSessionId": active_session_id,
        "hasActiveTransport": has_active_transport,
        "sseConnectionAlive": sse_connection_alive,
    }))
}
