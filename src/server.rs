// ABOUTME: HTTP surface of the gateway: session creation, SSE chat turns, health and metrics
// ABOUTME: Every turn is one text/event-stream response closed after its terminal frame

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use switchboard_agent::ToolRegistry;
use switchboard_core::{Frame, FrameStream, Gateway, GatewayError};
use tower_http::{services::ServeDir, trace::TraceLayer};

const MISSING_SESSION_MESSAGE: &str = "Missing sessionId — call POST /api/sessions first";

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    /// Served to the agent over MCP at `/mcp`
    pub tools: ToolRegistry,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfoResponse {
    session_id: String,
    created_at: chrono::DateTime<chrono::Utc>,
    busy: bool,
    turns: u64,
}

/// Install the global Prometheus recorder and return the handle `/metrics` renders
pub fn install_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus metrics recorder")?;
    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

pub fn router(state: AppState, static_dir: Option<&std::path::Path>) -> Router {
    let app = Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(session_info))
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/mcp", post(crate::mcp::mcp_handler))
        .with_state(state);

    let app = match static_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app,
    };
    app.layer(TraceLayer::new_for_http())
}

/// Bind and serve until SIGINT or SIGTERM
pub async fn serve(addr: &str, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "Switchboard listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining connections");
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn create_session(State(state): State<AppState>, body: Bytes) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        match serde_json::from_slice::<CreateSessionRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(error = %e, "Rejected session request body");
                return json_error(StatusCode::BAD_REQUEST, "Invalid request body");
            }
        }
    };

    match state.gateway.open_conversation(request.session_id).await {
        Ok(session_id) => Json(json!({ "sessionId": session_id })).into_response(),
        Err(GatewayError::InvalidRequest(message)) => {
            json_error(StatusCode::BAD_REQUEST, &message)
        }
        Err(e) => {
            tracing::error!(error = %e, "Session creation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to create session",
                    "details": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

async fn chat(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let non_empty = |key: &str| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let Some(message) = non_empty("message") else {
        return json_error(StatusCode::BAD_REQUEST, "Invalid message");
    };
    let Some(session_id) = non_empty("sessionId") else {
        return json_error(StatusCode::BAD_REQUEST, MISSING_SESSION_MESSAGE);
    };

    match state.gateway.submit_turn(&session_id, &message).await {
        Ok(stream) => event_stream(stream),
        Err(GatewayError::InvalidRequest(reason)) => json_error(StatusCode::BAD_REQUEST, &reason),
        // Already failed before streaming: one error frame, then close
        Err(e) => event_stream(FrameStream::single(Frame::error(e.client_message()))),
    }
}

fn event_stream(frames: FrameStream) -> Response {
    let events = frames.map(|frame| Event::default().json_data(frame));
    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();
    response.headers_mut().insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

async fn session_info(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.gateway.conversation_info(&id) {
        Some(info) => Json(SessionInfoResponse {
            session_id: info.id,
            created_at: info.created_at,
            busy: info.busy,
            turns: info.turns,
        })
        .into_response(),
        None => json_error(StatusCode::NOT_FOUND, "Unknown session"),
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let stats = state.gateway.stats();
    Json(json!({
        "status": "ok",
        "conversations": stats.conversations,
        "activeTurns": stats.active_turns,
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(ref handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed").into_response(),
    }
}
