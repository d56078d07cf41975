/// Database row types. These map directly to SQLite rows and stay
/// independent of the duet-types API models.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub kind: String,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub media_meta: Option<String>,
    pub created_at: String,
}

/// Input for `insert_message`. The store assigns `created_at`.
pub struct NewMessageRow<'a> {
    pub id: &'a str,
    pub conversation_id: &'a str,
    pub sender_id: &'a str,
    pub kind: &'a str,
    pub text: Option<&'a str>,
    pub media_url: Option<&'a str>,
    pub media_meta: Option<&'a str>,
}
