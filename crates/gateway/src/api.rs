//! Chat and session endpoints.
//!
//! - `POST /chat`: run one turn, reply streamed as SSE `data:` events
//! - `POST /session`: resolve the caller's session (`x-user-id` header)
//! - `POST /session/end`: close a session

use crate::SharedState;
use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::Json,
    response::sse::{Event as SseEvent, Sse},
    routing::post,
};
use chrono::{DateTime, Utc};
use kindred_companion::ChatRequest;
use kindred_core::error::TurnError;
use kindred_core::session::SessionType;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, trace, warn};

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/session", post(session_start_handler))
        .route("/session/end", post(session_end_handler))
}

// ── DTOs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default, rename = "type")]
    session_type: Option<SessionType>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionStartBody {
    #[serde(default, rename = "type")]
    session_type: Option<SessionType>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    id: String,
    user_id: String,
    #[serde(rename = "type")]
    session_type: SessionType,
    started_at: DateTime<Utc>,
    is_active: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionEndBody {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionEndResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, rejection.body_text())
}

impl From<TurnError> for ErrorResponse {
    fn from(e: TurnError) -> Self {
        Self {
            error: e.to_string(),
        }
    }
}

fn turn_error(e: TurnError) -> ApiError {
    let status = match e {
        TurnError::Validation(_) => StatusCode::BAD_REQUEST,
        TurnError::QuotaExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
    };
    (status, Json(e.into()))
}

/// The user id from the body, else from the `x-user-id` header.
fn user_id_from(body_user: Option<String>, headers: &HeaderMap) -> Option<String> {
    body_user
        .filter(|id| !id.trim().is_empty())
        .or_else(|| {
            headers
                .get(USER_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .filter(|id| !id.trim().is_empty())
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `POST /chat`: run one turn and stream the reply.
async fn chat_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let Json(body) = body.map_err(bad_body)?;

    let user_id = user_id_from(body.user_id, &headers)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "userId is required"))?;
    let content = body
        .content
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "content is required"))?;

    info!(user_id = %user_id, content_len = content.len(), "chat request");

    let request = ChatRequest {
        user_id,
        content,
        session_id: body.session_id,
        session_type: body.session_type.unwrap_or_default(),
    };
    let handle = state.pipeline.run_turn(request).await.map_err(turn_error)?;

    tokio::spawn(async move {
        if let Err(e) = handle.outcome.await {
            warn!(error = %e, "Chat turn task failed");
        }
    });

    let stream = ReceiverStream::new(handle.events).map(|event| {
        trace!(event = event.event_type(), "SSE event");
        Ok(SseEvent::default().data(event.to_json()))
    });

    Ok(Sse::new(stream))
}

/// `POST /session`: resume or start the caller's session.
async fn session_start_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Result<Json<SessionStartBody>, JsonRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let Json(body) = body.map_err(bad_body)?;
    let user_id = user_id_from(None, &headers).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("{USER_ID_HEADER} header is required"),
        )
    })?;

    let session = state
        .pipeline
        .sessions()
        .get_or_create_session(&user_id, body.session_type.unwrap_or_default())
        .await;

    Ok(Json(SessionResponse {
        is_active: session.is_active(),
        id: session.id,
        user_id: session.user_id,
        session_type: session.session_type,
        started_at: session.started_at,
    }))
}

/// `POST /session/end`: close a session and report its duration.
async fn session_end_handler(
    State(state): State<SharedState>,
    body: Result<Json<SessionEndBody>, JsonRejection>,
) -> Result<Json<SessionEndResponse>, ApiError> {
    let Json(body) = body.map_err(bad_body)?;
    let session_id = body
        .session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "sessionId is required"))?;

    match state.pipeline.sessions().end_session(&session_id).await {
        Ok(Some(ended)) => Ok(Json(SessionEndResponse {
            success: true,
            duration_seconds: Some(ended.duration_secs),
        })),
        Ok(None) => Ok(Json(SessionEndResponse {
            success: false,
            duration_seconds: None,
        })),
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Failed to end session");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
