use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::store::{MessageStore, run_blocking};

/// True iff the conversation exists and `user_id` is one of its two
/// participants. An unknown conversation is `false`, not an error.
///
/// Always hits the store; membership is never cached.
pub async fn is_participant(
    store: &Arc<dyn MessageStore>,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<bool> {
    let store = store.clone();
    let conversation = run_blocking(move || store.get_conversation(conversation_id)).await?;
    Ok(conversation.is_some_and(|c| c.includes(user_id)))
}
