//! HTTP intake: queue submissions, host command bridge and health.

use crate::plugin::{HandleOutcome, HostPlugin};
use crate::request::MessageRequest;
use crate::service::{RelayService, WatchState};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state for the intake routes
pub struct IntakeState {
    pub service: Arc<RelayService>,
    pub plugin: Arc<dyn HostPlugin>,
    pub started_at: DateTime<Utc>,
}

impl IntakeState {
    pub fn new(service: Arc<RelayService>, plugin: Arc<dyn HostPlugin>) -> Arc<Self> {
        Arc::new(Self {
            service,
            plugin,
            started_at: Utc::now(),
        })
    }
}

/// Successful submission
#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub status: String,
    pub message: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Chat text forwarded by the host
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub content: String,
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub watch: WatchState,
    pub channel_type: String,
    pub started_at: DateTime<Utc>,
}

/// Create the intake routes
pub fn routes(state: Arc<IntakeState>) -> Router {
    Router::new()
        .route("/send_message", post(send_message_handler))
        .route("/command", post(command_handler))
        .route("/help", get(help_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already-bound listener until `shutdown` resolves
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<IntakeState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "intake listening");
    }
    axum::serve(listener, routes(state))
        .with_graceful_shutdown(shutdown)
        .await
}

fn bad_request(message: impl Into<String>) -> Response {
    let message = message.into();
    tracing::error!(%message, "rejected submission");
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "invalid_request".to_string(),
            message,
        }),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal_error".to_string(),
            message: "服务器内部错误".to_string(),
        }),
    )
        .into_response()
}

/// Validate the raw submission into requests
fn parse_submission(body: Value) -> Result<Vec<MessageRequest>, String> {
    let items = match body.get("data_list") {
        Some(Value::Array(items)) => items,
        Some(_) => return Err("data_list必须为列表".to_string()),
        None => return Err("缺少data_list".to_string()),
    };
    if items.is_empty() {
        return Err("data_list不能为空".to_string());
    }

    let mut requests = Vec::with_capacity(items.len());
    for item in items {
        let Some(object) = item.as_object() else {
            return Err("data_list的每个元素必须为字典类型".to_string());
        };
        if !matches!(object.get("message"), Some(Value::String(_))) {
            return Err("每个消息必须包含message".to_string());
        }

        let mut request: MessageRequest =
            serde_json::from_value(item.clone()).map_err(|e| e.to_string())?;
        request.message = decode_message(&request.message);
        request.validate().map_err(|e| e.to_string())?;
        requests.push(request);
    }
    Ok(requests)
}

/// Percent-decode a message, keeping the raw value if decoding fails
fn decode_message(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(e) => {
            tracing::warn!(error = %e, raw = %raw, "failed to decode message, using raw value");
            raw.to_string()
        }
    }
}

/// POST /send_message - Replace the queue with a new batch
async fn send_message_handler(
    State(state): State<Arc<IntakeState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let requests = match parse_submission(body) {
        Ok(requests) => requests,
        Err(message) => return bad_request(message),
    };

    let count = requests.len();
    match state.service.queue().write_batch(requests).await {
        Ok(()) => {
            tracing::info!(count, "submission queued");
            Json(SendResponse {
                status: "success".to_string(),
                message: "发送成功".to_string(),
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to write queue file");
            internal_error()
        }
    }
}

/// POST /command - Run chat text through the plugin
async fn command_handler(
    State(state): State<Arc<IntakeState>>,
    Json(request): Json<CommandRequest>,
) -> Json<HandleOutcome> {
    Json(state.plugin.on_handle_context(&request.content).await)
}

/// GET /help - Plugin usage
async fn help_handler(State(state): State<Arc<IntakeState>>) -> String {
    state.plugin.help_text()
}

/// GET /health - Liveness and watch state
async fn health_handler(State(state): State<Arc<IntakeState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        watch: state.service.watch_state().await,
        channel_type: state.service.channel_type().to_string(),
        started_at: state.started_at,
    })
}
