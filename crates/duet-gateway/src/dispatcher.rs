use axum::extract::ws::Utf8Bytes;
use tracing::{error, trace, warn};

use duet_types::events::RealtimeEvent;
use duet_types::models::Message;

use crate::registry::ConnectionRegistry;

/// Outcome of one fan-out pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans persisted messages out to the live connections of their conversation.
#[derive(Clone)]
pub struct Dispatcher {
    registry: ConnectionRegistry,
}

impl Dispatcher {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Deliver `message:new` to every connection on the message's
    /// conversation, as registered at call time.
    ///
    /// Delivery is best effort per connection. A failed send is logged and
    /// skipped; it is never retried and never reported to the sender.
    pub async fn broadcast(&self, message: &Message) -> BroadcastReport {
        let event = RealtimeEvent::message_new(message);
        let frame = match serde_json::to_string(&event) {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                error!("Failed to serialize event for message {}: {}", message.id, e);
                return BroadcastReport::default();
            }
        };

        let recipients = self.registry.list_by_conversation(message.conversation_id).await;
        let mut report = BroadcastReport::default();

        for conn in &recipients {
            match conn.sender.send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(_) => {
                    report.failed += 1;
                    warn!(
                        "Delivery of message {} to connection {} (user {}) failed: connection closed",
                        message.id, conn.id, conn.user_id
                    );
                }
            }
        }

        trace!(
            "Broadcast message {} on conversation {}: {} delivered, {} failed",
            message.id,
            message.conversation_id,
            report.delivered,
            report.failed
        );
        report
    }
}
