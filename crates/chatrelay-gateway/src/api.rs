use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chatrelay_common::{ConversationId, Error, Turn};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::state::SharedState;
use crate::ui_stream::{DONE_MARKER, UI_STREAM_HEADER, UI_STREAM_VERSION, UiStreamEncoder};

const MISSING_CONVERSATION: &str = "Conversation ID is required";

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub message: Option<Turn>,
}

/// HTTP status for a failed chat operation.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Agent(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn conversation_id(raw: Option<String>) -> Option<ConversationId> {
    raw.map(ConversationId::from).filter(|id| !id.is_blank())
}

/// GET /api/chat?id= — stored turns of a conversation.
pub async fn get_chat(
    State(state): State<SharedState>,
    Query(query): Query<ChatQuery>,
) -> Response {
    let Some(id) = conversation_id(query.id) else {
        return error_response(StatusCode::BAD_REQUEST, MISSING_CONVERSATION);
    };

    match state.store().load(&id).await {
        Ok(messages) => Json(json!({ "messages": messages })).into_response(),
        Err(e) => {
            warn!("failed to load conversation {id}: {e}");
            error_response(status_for(&e), e.to_string())
        }
    }
}

/// POST /api/chat — submit a turn and stream the reply as UI message chunks.
pub async fn post_chat(State(state): State<SharedState>, Json(body): Json<ChatRequest>) -> Response {
    let Some(id) = conversation_id(body.id) else {
        return error_response(StatusCode::BAD_REQUEST, MISSING_CONVERSATION);
    };
    let Some(message) = body.message else {
        return error_response(StatusCode::BAD_REQUEST, "Message is required");
    };

    let chat = match state.runtime.handle_turn(id.clone(), message).await {
        Ok(chat) => chat,
        Err(e) => {
            warn!("chat request for conversation {id} failed: {e}");
            return error_response(status_for(&e), e.to_string());
        }
    };

    let mut encoder = UiStreamEncoder::new();
    let events = chat
        .flat_map(move |event| stream::iter(encoder.encode(event)))
        .map(|chunk| Event::default().json_data(chunk))
        .chain(stream::once(async {
            Ok::<_, axum::Error>(Event::default().data(DONE_MARKER))
        }));

    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();
    let headers = response.headers_mut();
    headers.insert(UI_STREAM_HEADER, HeaderValue::from_static(UI_STREAM_VERSION));
    headers.insert("cache-control", HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

/// GET /api/status — active provider, model and store backend.
pub async fn status(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let provider = state.runtime.default_provider().map(|p| p.provider_id());
    Json(json!({
        "status": "running",
        "provider": provider,
        "model": state.runtime.effective_model(),
        "store": state.store().backend(),
    }))
}

/// GET /health: liveness check.
pub async fn health() -> &'static str {
    "ok"
}
