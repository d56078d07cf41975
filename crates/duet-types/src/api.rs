use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Conversation, Message, MessageType};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the realtime handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

/// Login accepts two payload shapes. Older clients still post `{mockKey}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LoginRequest {
    Password { username: String, password: String },
    MockKey {
        #[serde(rename = "mockKey")]
        mock_key: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub peer_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub id: Uuid,
    pub participant_a: Uuid,
    pub participant_b: Uuid,
}

impl From<Conversation> for ConversationResponse {
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id,
            participant_a: c.participant_a,
            participant_b: c.participant_b,
        }
    }
}

// -- Messages --

/// `type` stays a string here so unknown values surface as a validation
/// error from the ingest path rather than a body rejection.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Only read by `POST /messages`; the nested route takes it from the path.
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_meta: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub ok: bool,
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub media_meta: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for HistoryMessage {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            sender_id: m.sender_id,
            kind: m.kind,
            text: m.text,
            media_url: m.media_url,
            media_meta: m.media_meta,
            created_at: m.created_at,
        }
    }
}

// -- Uploads --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    pub size: u64,
    pub content_type: String,
    pub sha256: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
