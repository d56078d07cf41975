use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

/// Identifies one live connection. Two tabs of the same user on the same
/// conversation get distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Sending half of a connection's outbound queue. The socket writer task
/// owns the receiving half.
pub type SendHandle = mpsc::UnboundedSender<Utf8Bytes>;

#[derive(Debug, Clone)]
pub struct LiveConnection {
    pub id: ConnectionId,
    pub user_id: Uuid,
    pub conversation_id: Uuid,
    pub sender: SendHandle,
}

impl LiveConnection {
    /// Build a connection record plus the receiver its writer task drains.
    pub fn new(user_id: Uuid, conversation_id: Uuid) -> (Self, mpsc::UnboundedReceiver<Utf8Bytes>) {
        let (sender, rx) = mpsc::unbounded_channel();
        let conn = Self {
            id: ConnectionId::new(),
            user_id,
            conversation_id,
            sender,
        };
        (conn, rx)
    }
}

/// Live connections keyed by conversation.
///
/// All access goes through one `RwLock`, so a reader never observes a
/// half-applied add or remove. Readers get cloned snapshots.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Vec<LiveConnection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, conn: LiveConnection) {
        let mut guard = self.inner.write().await;
        let conversation_id = conn.conversation_id;
        let id = conn.id;
        let bucket = guard.entry(conversation_id).or_default();
        bucket.push(conn);

        debug!(
            "Registered connection {} on conversation {}, total: {}",
            id,
            conversation_id,
            bucket.len()
        );
    }

    /// Remove one connection. Returns `false` if it was already gone, which
    /// makes duplicate close events harmless.
    pub async fn remove(&self, conversation_id: Uuid, id: ConnectionId) -> bool {
        let mut guard = self.inner.write().await;

        let Some(bucket) = guard.get_mut(&conversation_id) else {
            return false;
        };

        let before = bucket.len();
        bucket.retain(|c| c.id != id);
        let removed = bucket.len() != before;

        if removed {
            debug!(
                "Removed connection {} from conversation {}, remaining: {}",
                id,
                conversation_id,
                bucket.len()
            );
        }

        if bucket.is_empty() {
            guard.remove(&conversation_id);
        }

        removed
    }

    /// Snapshot of the connections registered on a conversation.
    pub async fn list_by_conversation(&self, conversation_id: Uuid) -> Vec<LiveConnection> {
        self.inner
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of live connections.
    pub async fn len(&self) -> usize {
        self.inner.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Drop every registration. Writer tasks see their queue close and shut
    /// the socket down. Used at server shutdown.
    pub async fn drain(&self) -> usize {
        let drained: Vec<LiveConnection> = {
            let mut guard = self.inner.write().await;
            guard.drain().flat_map(|(_, bucket)| bucket).collect()
        };
        debug!("Drained {} live connections", drained.len());
        drained.len()
    }
}
