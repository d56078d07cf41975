use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        -- participant_a < participant_b, so one row per unordered pair
        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY,
            participant_a   TEXT NOT NULL REFERENCES users(id),
            participant_b   TEXT NOT NULL REFERENCES users(id),
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE(participant_a, participant_b),
            CHECK(participant_a < participant_b)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            kind            TEXT NOT NULL CHECK(kind IN ('text', 'image', 'video', 'audio')),
            text            TEXT,
            media_url       TEXT,
            media_meta      TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
