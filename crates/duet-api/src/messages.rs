use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use duet_gateway::ingest::SendMessage;
use duet_types::api::{Claims, HistoryMessage, SendMessageRequest, SendMessageResponse};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    /// Only read by `GET /messages`.
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// POST /conversations/{conversation_id}/messages
///
/// The id stays a raw string so a malformed one is reported by the ingest
/// path like any other invalid input.
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    submit(&state, claims.sub, conversation_id, req).await
}

/// POST /messages with `conversationId` in the body.
pub async fn send_message_flat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(mut req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = req.conversation_id.take().unwrap_or_default();
    submit(&state, claims.sub, conversation_id, req).await
}

async fn submit(
    state: &AppState,
    sender_id: Uuid,
    conversation_id: String,
    req: SendMessageRequest,
) -> Result<(StatusCode, Json<SendMessageResponse>), ApiError> {
    let message = state
        .gateway
        .messages()
        .send(SendMessage {
            conversation_id,
            sender_id,
            kind: req.kind,
            text: req.text,
            media_url: req.media_url,
            media_meta: req.media_meta,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            ok: true,
            id: message.id,
        }),
    ))
}

/// GET /conversations/{conversation_id}/messages?limit=N
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    history(&state, claims.sub, &conversation_id, query.limit).await
}

/// GET /messages?conversationId=...&limit=N
pub async fn get_messages_flat(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = query.conversation_id.unwrap_or_default();
    history(&state, claims.sub, &conversation_id, query.limit).await
}

async fn history(
    state: &AppState,
    user_id: Uuid,
    conversation_id: &str,
    limit: Option<u32>,
) -> Result<Json<Vec<HistoryMessage>>, ApiError> {
    let messages = state
        .gateway
        .messages()
        .history(conversation_id, user_id, limit)
        .await?;

    Ok(Json(messages.into_iter().map(HistoryMessage::from).collect()))
}
