//! v1 REST + SSE API.
//!
//! - `POST /v1/conversations/{id}/messages`: send a message, receive the turn as SSE
//! - `GET  /v1/conversations/{id}/messages`: persisted history
//! - `GET  /v1/tools`: registered tool catalog

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chatloom_core::message::{ChatMessage, ConversationId};
use chatloom_engine::CompletionRequest;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::SharedState;
use crate::sse;

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/conversations/{id}/messages",
            get(list_messages_handler).post(post_message_handler),
        )
        .route("/tools", get(list_tools_handler))
        .with_state(state)
}

// ── Types ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageListResponse {
    pub conversation_id: ConversationId,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolDto>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolDto {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `POST /v1/conversations/{id}/messages`: run one turn, stream it as SSE.
///
/// The turn runs in its own task so a client disconnect only cancels it;
/// persistence of a finished turn still completes.
async fn post_message_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<PostMessageRequest>,
) -> Result<Response, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message must not be empty"));
    }
    info!(conversation = %id, message_len = payload.message.len(), "Turn requested");

    let (transport, response) = sse::channel(sse::FRAME_BUFFER);
    let cancel = CancellationToken::new();
    let turn_cancel = cancel.clone();
    let orchestrator = state.orchestrator.clone();
    let request = CompletionRequest::new(id, payload.message);

    tokio::spawn(async move {
        let report = orchestrator.run_turn(request, transport, turn_cancel).await;
        if let Err(e) = &report.outcome {
            warn!(message_id = %report.message_id, error_type = e.error_type(), "Turn did not complete");
        }
    });

    Ok(response.into_response(cancel).await)
}

/// `GET /v1/conversations/{id}/messages`: persisted history, oldest first.
async fn list_messages_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let conversation_id = ConversationId::from(id);
    let messages = state
        .orchestrator
        .store()
        .list(&conversation_id)
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    Ok(Json(MessageListResponse {
        conversation_id,
        messages,
    }))
}

/// `GET /v1/tools`: the catalog the model sees.
async fn list_tools_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let tools: Vec<ToolDto> = state
        .orchestrator
        .tools()
        .definitions()
        .into_iter()
        .map(|def| ToolDto {
            parameters: def.json_schema(),
            name: def.name,
            description: def.description,
        })
        .collect();
    let count = tools.len();
    Json(ToolListResponse { tools, count })
}
