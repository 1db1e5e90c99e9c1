//! REST API Server for the relay
//!
//! Backs the Telegram Web App: chat, file upload, history reset and a
//! liveness probe.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{Request, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::conversational::ConversationService;
use crate::gemini::GatewayError;
use crate::models::{Attachment, Turn};

pub const DEFAULT_UPLOAD_PROMPT: &str = "Describe this file";

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default, deserialize_with = "user_id_from_any")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    #[serde(default, deserialize_with = "user_id_from_any")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub file_data: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    #[serde(default, deserialize_with = "user_id_from_any")]
    pub user_id: Option<String>,
}

/// Web App clients send Telegram ids as numbers, other clients as strings
fn user_id_from_any<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(id)) => Some(id),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// =============================
/// Response Models
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub user_id: String,
    pub turns: Vec<Turn>,
}

fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

fn answer_body(result: Result<String, GatewayError>) -> (StatusCode, Json<Value>) {
    let response = match result {
        Ok(answer) => answer,
        Err(e) => {
            warn!("Model call failed, returning error text: {}", e);
            e.user_message()
        }
    };
    (StatusCode::OK, Json(json!({ "response": response })))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub conversations: ConversationService,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "conversations": state.conversations.conversation_count().await,
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let Json(req) = match payload {
        Ok(req) => req,
        Err(rejection) => {
            return error_body(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let (Some(user_id), Some(message)) = (non_empty(req.user_id), non_empty(req.message)) else {
        return error_body(StatusCode::BAD_REQUEST, "Missing user_id or message");
    };

    info!(user_id = %user_id, "Received chat message");

    answer_body(state.conversations.chat(&user_id, &message).await)
}

/// =============================
/// Upload Endpoint
/// =============================

async fn upload_handler(
    State(state): State<ApiState>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let Json(req) = match payload {
        Ok(req) => req,
        Err(rejection) => {
            error!("Upload request could not be read: {}", rejection.body_text());
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, rejection.body_text());
        }
    };

    let (Some(user_id), Some(file_data), Some(mime_type)) = (
        non_empty(req.user_id),
        non_empty(req.file_data),
        non_empty(req.mime_type),
    ) else {
        return error_body(StatusCode::BAD_REQUEST, "Missing required fields");
    };

    let prompt = non_empty(req.prompt).unwrap_or_else(|| DEFAULT_UPLOAD_PROMPT.to_string());

    info!(user_id = %user_id, mime_type = %mime_type, "Received file upload");

    let attachment = Attachment::new(mime_type, file_data);
    answer_body(state.conversations.analyze_file(&prompt, &attachment).await)
}

/// =============================
/// Reset & History Endpoints
/// =============================

async fn reset_handler(
    State(state): State<ApiState>,
    payload: Result<Json<ResetRequest>, JsonRejection>,
) -> Json<Value> {
    if let Some(user_id) = payload.ok().and_then(|Json(req)| non_empty(req.user_id)) {
        state.conversations.reset(&user_id).await;
    }

    Json(json!({ "success": true }))
}

async fn history_handler(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Json<HistoryResponse> {
    let turns = state.conversations.history(&user_id).await;
    Json(HistoryResponse { user_id, turns })
}

/// =============================
/// Router
/// =============================

pub fn create_router(conversations: ConversationService) -> Router {
    let state = ApiState { conversations };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/upload", post(upload_handler))
        .route("/api/reset", post(reset_handler))
        .route("/api/history/:user_id", get(history_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "http_request",
                    request_id = %Uuid::new_v4(),
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    conversations: ConversationService,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(conversations);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
