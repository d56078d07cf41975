use crate::models::{ConversationRow, MessageRow, NewMessageRow, UserRow};
use crate::Database;
use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;

/// Fixed-width UTC timestamps so lexical order matches time order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Conversations --

    /// Create the conversation between two users, or return the existing one.
    /// The pair is unordered.
    pub fn create_conversation(&self, id: &str, user_a: &str, user_b: &str) -> Result<ConversationRow> {
        if user_a == user_b {
            return Err(anyhow!("Conversation needs two distinct participants"));
        }
        let (lo, hi) = if user_a < user_b { (user_a, user_b) } else { (user_b, user_a) };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO conversations (id, participant_a, participant_b) VALUES (?1, ?2, ?3)",
                (id, lo, hi),
            )?;

            let row = conn.query_row(
                "SELECT id, participant_a, participant_b, created_at FROM conversations
                 WHERE participant_a = ?1 AND participant_b = ?2",
                (lo, hi),
                map_conversation,
            )?;
            Ok(row)
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, participant_a, participant_b, created_at FROM conversations WHERE id = ?1",
                    [id],
                    map_conversation,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, participant_a, participant_b, created_at FROM conversations
                 WHERE participant_a = ?1 OR participant_b = ?1
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], map_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert a message and return its assigned `created_at`.
    ///
    /// Timestamps are strictly increasing within a conversation: if the clock
    /// has not moved past the latest stored message, the new one is placed
    /// one microsecond after it.
    pub fn insert_message(&self, msg: &NewMessageRow<'_>) -> Result<String> {
        self.with_conn(|conn| {
            let latest: Option<String> = conn.query_row(
                "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
                [msg.conversation_id],
                |row| row.get(0),
            )?;

            let mut created_at = Utc::now();
            if let Some(latest) = latest {
                let latest = parse_timestamp(&latest)?;
                if created_at <= latest {
                    created_at = latest + Duration::microseconds(1);
                }
            }
            let created_at = format_timestamp(created_at);

            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, kind, text, media_url, media_meta, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    msg.id,
                    msg.conversation_id,
                    msg.sender_id,
                    msg.kind,
                    msg.text,
                    msg.media_url,
                    msg.media_meta,
                    created_at,
                ],
            )?;
            Ok(created_at)
        })
    }

    /// The most recent `limit` messages of a conversation, oldest first.
    pub fn get_messages(&self, conversation_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, conversation_id, limit))
    }

    pub fn count_messages(&self, conversation_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant_a: row.get(1)?,
        participant_b: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn query_messages(conn: &Connection, conversation_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sender_id, kind, text, media_url, media_meta, created_at
         FROM (
             SELECT * FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2
         )
         ORDER BY created_at ASC",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![conversation_id, limit], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                sender_id: row.get(2)?,
                kind: row.get(3)?,
                text: row.get(4)?,
                media_url: row.get(5)?,
                media_meta: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
