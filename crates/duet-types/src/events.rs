use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, MessageType};

/// Events pushed to live connections.
///
/// Serialized as `{"event": "...", "data": {...}}`. The field layout is a
/// compatibility contract with existing clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RealtimeEvent {
    /// A message was persisted in the connection's conversation
    #[serde(rename = "message:new")]
    MessageNew(MessagePayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub media_meta: Option<serde_json::Value>,
}

impl From<&Message> for MessagePayload {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            kind: message.kind,
            text: message.text.clone(),
            media_url: message.media_url.clone(),
            media_meta: message.media_meta.clone(),
        }
    }
}

impl RealtimeEvent {
    pub fn message_new(message: &Message) -> Self {
        Self::MessageNew(MessagePayload::from(message))
    }
}
