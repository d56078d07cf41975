use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use duet_db::Database;
use duet_db::models::{ConversationRow, MessageRow, NewMessageRow};
use duet_db::queries::parse_timestamp;
use duet_types::models::{Conversation, Message, MessageType};

/// A validated message ready to be written.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub kind: MessageType,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub media_meta: Option<serde_json::Value>,
}

impl NewMessage {
    pub fn into_message(self, id: Uuid, created_at: DateTime<Utc>) -> Message {
        Message {
            id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            kind: self.kind,
            text: self.text,
            media_url: self.media_url,
            media_meta: self.media_meta,
            created_at,
        }
    }
}

/// Durable storage the realtime core reads and writes.
///
/// Calls are blocking; async callers go through [`run_blocking`].
pub trait MessageStore: Send + Sync + 'static {
    /// Persist a message. The store assigns the id and creation time.
    fn insert_message(&self, message: &NewMessage) -> Result<(Uuid, DateTime<Utc>)>;

    fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>>;

    /// Up to `limit` most recent messages, ascending by creation time.
    fn list_messages(&self, conversation_id: Uuid, limit: u32) -> Result<Vec<Message>>;
}

/// Run a blocking store call off the async runtime.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
}

impl MessageStore for Database {
    fn insert_message(&self, message: &NewMessage) -> Result<(Uuid, DateTime<Utc>)> {
        let id = Uuid::new_v4();
        let media_meta = message
            .media_meta
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let id_str = id.to_string();
        let conversation_id = message.conversation_id.to_string();
        let sender_id = message.sender_id.to_string();
        let created_at = Database::insert_message(
            self,
            &NewMessageRow {
                id: &id_str,
                conversation_id: &conversation_id,
                sender_id: &sender_id,
                kind: message.kind.as_str(),
                text: message.text.as_deref(),
                media_url: message.media_url.as_deref(),
                media_meta: media_meta.as_deref(),
            },
        )?;

        Ok((id, parse_timestamp(&created_at)?))
    }

    fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        Database::get_conversation(self, &conversation_id.to_string())?
            .map(conversation_from_row)
            .transpose()
    }

    fn list_messages(&self, conversation_id: Uuid, limit: u32) -> Result<Vec<Message>> {
        self.get_messages(&conversation_id.to_string(), limit)?
            .into_iter()
            .map(message_from_row)
            .collect()
    }
}

pub fn conversation_from_row(row: ConversationRow) -> Result<Conversation> {
    Ok(Conversation {
        id: row.id.parse().with_context(|| format!("Corrupt conversation id '{}'", row.id))?,
        participant_a: row
            .participant_a
            .parse()
            .with_context(|| format!("Corrupt participant_a on conversation '{}'", row.id))?,
        participant_b: row
            .participant_b
            .parse()
            .with_context(|| format!("Corrupt participant_b on conversation '{}'", row.id))?,
    })
}

fn message_from_row(row: MessageRow) -> Result<Message> {
    let media_meta: Option<serde_json::Value> = row
        .media_meta
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .with_context(|| format!("Corrupt media_meta on message '{}'", row.id))?;

    Ok(Message {
        id: row.id.parse().with_context(|| format!("Corrupt message id '{}'", row.id))?,
        conversation_id: row
            .conversation_id
            .parse()
            .with_context(|| format!("Corrupt conversation_id on message '{}'", row.id))?,
        sender_id: row
            .sender_id
            .parse()
            .with_context(|| format!("Corrupt sender_id on message '{}'", row.id))?,
        kind: row.kind.parse()?,
        text: row.text,
        media_url: row.media_url,
        media_meta,
        created_at: parse_timestamp(&row.created_at)?,
    })
}
