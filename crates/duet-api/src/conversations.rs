use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use uuid::Uuid;

use duet_gateway::store::{conversation_from_row, run_blocking};
use duet_types::api::{Claims, ConversationResponse, CreateConversationRequest};

use crate::error::ApiError;
use crate::state::AppState;

/// POST /conversations: open (or reopen) the conversation with `peerId`.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.peer_id == claims.sub {
        return Err(ApiError::BadRequest("cannot open a conversation with yourself"));
    }

    let db = state.db.clone();
    let me = claims.sub.to_string();
    let peer = req.peer_id.to_string();
    let row = run_blocking(move || {
        if db.get_user_by_id(&peer)?.is_none() {
            return Ok(None);
        }
        db.create_conversation(&Uuid::new_v4().to_string(), &me, &peer)
            .map(Some)
    })
    .await?
    .ok_or(ApiError::NotFound)?;

    let conversation = conversation_from_row(row)?;
    Ok((StatusCode::OK, Json(ConversationResponse::from(conversation))))
}

/// GET /conversations: every conversation the caller is part of.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let me = claims.sub.to_string();
    let rows = run_blocking(move || db.list_conversations_for_user(&me)).await?;

    let conversations = rows
        .into_iter()
        .map(|row| conversation_from_row(row).map(ConversationResponse::from))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Json(conversations))
}
