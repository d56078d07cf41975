use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error};
use uuid::Uuid;

use duet_types::models::{Message, MessageType};

use crate::authz::is_participant;
use crate::dispatcher::Dispatcher;
use crate::error::IngestError;
use crate::store::{MessageStore, NewMessage, run_blocking};

/// Hard cap on a single history fetch.
pub const HISTORY_LIMIT: u32 = 500;

/// Raw send request as it arrives from a client.
#[derive(Debug, Clone)]
pub struct SendMessage {
    pub conversation_id: String,
    pub sender_id: Uuid,
    pub kind: String,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub media_meta: Option<serde_json::Value>,
}

/// Validates, persists and fans out messages.
#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    dispatcher: Dispatcher,
    /// Per-conversation locks held across persist + broadcast, so each
    /// recipient sees messages in the order they were stored.
    sequencers: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl MessageService {
    pub fn new(store: Arc<dyn MessageStore>, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            dispatcher,
            sequencers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validate and store a message, then push it to live connections.
    ///
    /// All checks run before anything is written. Delivery problems are
    /// logged by the dispatcher and never fail the send. Once validated, the
    /// write and the fan-out run on their own task, so a caller that goes
    /// away mid-send cannot leave a stored message undelivered.
    pub async fn send(&self, req: SendMessage) -> Result<Message, IngestError> {
        let conversation_id: Uuid = req
            .conversation_id
            .parse()
            .map_err(|_| IngestError::InvalidInput("conversationId must be a UUID"))?;
        let kind: MessageType = req
            .kind
            .parse()
            .map_err(|_| IngestError::InvalidInput("type must be text, image, video or audio"))?;

        self.authorize(conversation_id, req.sender_id).await?;

        if kind.is_media() {
            if req.media_url.as_deref().is_none_or(|u| u.trim().is_empty()) {
                return Err(IngestError::InvalidInput("media messages need a mediaUrl"));
            }
        } else if req.text.as_deref().is_none_or(|t| t.trim().is_empty()) {
            return Err(IngestError::InvalidInput("text messages need a non-empty text"));
        }

        let new = NewMessage {
            conversation_id,
            sender_id: req.sender_id,
            kind,
            text: req.text,
            media_url: req.media_url,
            // A literal JSON null is the same as no metadata
            media_meta: req.media_meta.filter(|m| !m.is_null()),
        };

        let service = self.clone();
        tokio::spawn(async move {
            let turn = service.sequence(conversation_id).await;
            let result = service.persist_and_broadcast(new).await;
            drop(turn);
            service.release_sequencer(conversation_id).await;
            result
        })
        .await
        .map_err(|e| {
            error!("Send task for conversation {} failed: {}", conversation_id, e);
            IngestError::Storage(anyhow!("send task failed: {}", e))
        })?
    }

    async fn persist_and_broadcast(&self, new: NewMessage) -> Result<Message, IngestError> {
        let conversation_id = new.conversation_id;
        let store = self.store.clone();
        let row = new.clone();
        let (id, created_at) = run_blocking(move || store.insert_message(&row))
            .await
            .map_err(|e| {
                error!("Failed to persist message on conversation {}: {:#}", conversation_id, e);
                IngestError::Storage(e)
            })?;

        let message = new.into_message(id, created_at);
        let report = self.dispatcher.broadcast(&message).await;
        debug!(
            "Message {} from {} on {} stored, fanned out to {} connection(s)",
            message.id, message.sender_id, conversation_id, report.delivered
        );

        Ok(message)
    }

    /// The latest messages of a conversation, oldest first. `limit` is
    /// clamped to `1..=HISTORY_LIMIT`.
    pub async fn history(
        &self,
        conversation_id: &str,
        user_id: Uuid,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, IngestError> {
        let conversation_id: Uuid = conversation_id
            .parse()
            .map_err(|_| IngestError::InvalidInput("conversationId must be a UUID"))?;

        self.authorize(conversation_id, user_id).await?;

        let limit = limit.unwrap_or(HISTORY_LIMIT).clamp(1, HISTORY_LIMIT);
        let store = self.store.clone();
        run_blocking(move || store.list_messages(conversation_id, limit))
            .await
            .map_err(|e| {
                error!("Failed to load history for conversation {}: {:#}", conversation_id, e);
                IngestError::Storage(e)
            })
    }

    async fn authorize(&self, conversation_id: Uuid, user_id: Uuid) -> Result<(), IngestError> {
        match is_participant(&self.store, conversation_id, user_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(IngestError::Forbidden),
            Err(e) => {
                error!("Membership lookup failed for conversation {}: {:#}", conversation_id, e);
                Err(IngestError::Storage(e))
            }
        }
    }

    async fn sequence(&self, conversation_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .sequencers
            .lock()
            .await
            .entry(conversation_id)
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Forget the conversation's lock once nobody else holds or waits on it.
    async fn release_sequencer(&self, conversation_id: Uuid) {
        let mut sequencers = self.sequencers.lock().await;
        if sequencers
            .get(&conversation_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            sequencers.remove(&conversation_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionRegistry, LiveConnection};
    use std::time::Duration;

    use crate::testing::{FailingInserts, Fixture, SlowInserts};

    fn service(store: Arc<dyn MessageStore>) -> (MessageService, ConnectionRegistry) {
        let registry = ConnectionRegistry::new();
        let service = MessageService::new(store, Dispatcher::new(registry.clone()));
        (service, registry)
    }

    fn text(conversation: Uuid, sender: Uuid, body: &str) -> SendMessage {
        SendMessage {
            conversation_id: conversation.to_string(),
            sender_id: sender,
            kind: "text".into(),
            text: Some(body.into()),
            media_url: None,
            media_meta: None,
        }
    }

    #[tokio::test]
    async fn participant_send_is_stored_and_broadcast() {
        let fx = Fixture::new();
        let (service, registry) = service(fx.store.clone());

        let (bob_conn, mut bob_rx) = LiveConnection::new(fx.bob, fx.conversation);
        registry.add(bob_conn).await;

        let message = service.send(text(fx.conversation, fx.alice, "hi")).await.unwrap();
        assert_eq!(message.sender_id, fx.alice);
        assert_eq!(fx.db.count_messages(&fx.conversation.to_string()).unwrap(), 1);

        let frame: serde_json::Value = serde_json::from_str(bob_rx.try_recv().unwrap().as_str()).unwrap();
        assert_eq!(frame["event"], "message:new");
        assert_eq!(frame["data"]["id"], message.id.to_string());
        assert_eq!(frame["data"]["senderId"], fx.alice.to_string());
        assert_eq!(frame["data"]["conversationId"], fx.conversation.to_string());
        assert_eq!(frame["data"]["text"], "hi");
        assert!(frame["data"]["mediaUrl"].is_null());
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn outsider_is_forbidden_and_nothing_happens() {
        let fx = Fixture::new();
        let (service, registry) = service(fx.store.clone());

        let (bob_conn, mut bob_rx) = LiveConnection::new(fx.bob, fx.conversation);
        registry.add(bob_conn).await;

        let err = service.send(text(fx.conversation, fx.mallory, "hi")).await.unwrap_err();
        assert!(matches!(err, IngestError::Forbidden));
        assert_eq!(fx.db.count_messages(&fx.conversation.to_string()).unwrap(), 0);
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_conversation_is_forbidden() {
        let fx = Fixture::new();
        let (service, _) = service(fx.store.clone());

        let err = service.send(text(Uuid::new_v4(), fx.alice, "hi")).await.unwrap_err();
        assert!(matches!(err, IngestError::Forbidden));
    }

    #[tokio::test]
    async fn validation_order() {
        let fx = Fixture::new();
        let (service, _) = service(fx.store.clone());

        // Malformed id beats everything else
        let mut req = text(fx.conversation, fx.mallory, "");
        req.conversation_id = "not-a-uuid".into();
        assert!(matches!(service.send(req).await, Err(IngestError::InvalidInput(_))));

        let mut req = text(fx.conversation, fx.mallory, "hi");
        req.kind = "sticker".into();
        assert!(matches!(service.send(req).await, Err(IngestError::InvalidInput(_))));

        // Authorization is checked before content
        let req = text(fx.conversation, fx.mallory, "   ");
        assert!(matches!(service.send(req).await, Err(IngestError::Forbidden)));
    }

    #[tokio::test]
    async fn rejects_blank_text_and_missing_media() {
        let fx = Fixture::new();
        let (service, _) = service(fx.store.clone());

        for body in ["", "  \n\t "] {
            let err = service.send(text(fx.conversation, fx.alice, body)).await.unwrap_err();
            assert!(matches!(err, IngestError::InvalidInput(_)));
        }

        let mut no_text = text(fx.conversation, fx.alice, "");
        no_text.text = None;
        assert!(matches!(service.send(no_text).await, Err(IngestError::InvalidInput(_))));

        for kind in ["image", "video", "audio"] {
            let req = SendMessage {
                conversation_id: fx.conversation.to_string(),
                sender_id: fx.alice,
                kind: kind.into(),
                text: Some("caption".into()),
                media_url: None,
                media_meta: None,
            };
            assert!(matches!(service.send(req).await, Err(IngestError::InvalidInput(_))));
        }

        assert_eq!(fx.db.count_messages(&fx.conversation.to_string()).unwrap(), 0);
    }

    #[tokio::test]
    async fn media_message_keeps_metadata() {
        let fx = Fixture::new();
        let (service, registry) = service(fx.store.clone());
        let (alice_conn, mut alice_rx) = LiveConnection::new(fx.alice, fx.conversation);
        registry.add(alice_conn).await;

        let req = SendMessage {
            conversation_id: fx.conversation.to_string(),
            sender_id: fx.bob,
            kind: "audio".into(),
            text: None,
            media_url: Some("/uploads/voice.ogg".into()),
            media_meta: Some(serde_json::json!({ "durationMs": 5300 })),
        };
        let message = service.send(req).await.unwrap();
        assert_eq!(message.kind, MessageType::Audio);

        let frame: serde_json::Value = serde_json::from_str(alice_rx.try_recv().unwrap().as_str()).unwrap();
        assert_eq!(frame["data"]["type"], "audio");
        assert_eq!(frame["data"]["mediaUrl"], "/uploads/voice.ogg");
        assert_eq!(frame["data"]["mediaMeta"]["durationMs"], 5300);
        assert!(frame["data"]["text"].is_null());

        let history = service.history(&fx.conversation.to_string(), fx.alice, None).await.unwrap();
        assert_eq!(history, vec![message]);
    }

    #[tokio::test]
    async fn other_conversations_never_see_the_message() {
        let fx = Fixture::new();
        let (service, registry) = service(fx.store.clone());

        let (elsewhere, mut elsewhere_rx) = LiveConnection::new(fx.alice, fx.other_conversation);
        registry.add(elsewhere).await;

        service.send(text(fx.conversation, fx.bob, "private")).await.unwrap();
        assert!(elsewhere_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn storage_failure_skips_broadcast() {
        let fx = Fixture::new();
        let (service, registry) = service(Arc::new(FailingInserts(fx.db.clone())));

        let (bob_conn, mut bob_rx) = LiveConnection::new(fx.bob, fx.conversation);
        registry.add(bob_conn).await;

        let err = service.send(text(fx.conversation, fx.alice, "hi")).await.unwrap_err();
        assert!(matches!(err, IngestError::Storage(_)));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_recipient_does_not_fail_the_send() {
        let fx = Fixture::new();
        let (service, registry) = service(fx.store.clone());

        let (gone, gone_rx) = LiveConnection::new(fx.bob, fx.conversation);
        registry.add(gone).await;
        drop(gone_rx);

        assert!(service.send(text(fx.conversation, fx.alice, "hello?")).await.is_ok());
        assert_eq!(fx.db.count_messages(&fx.conversation.to_string()).unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_sends_arrive_in_stored_order() {
        let fx = Fixture::new();
        let (service, registry) = service(fx.store.clone());
        let (bob_conn, mut bob_rx) = LiveConnection::new(fx.bob, fx.conversation);
        registry.add(bob_conn).await;

        let mut tasks = Vec::new();
        for i in 0..20 {
            let service = service.clone();
            let req = text(fx.conversation, fx.alice, &format!("m{}", i));
            tasks.push(tokio::spawn(async move { service.send(req).await.unwrap() }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let history = service.history(&fx.conversation.to_string(), fx.bob, None).await.unwrap();
        assert_eq!(history.len(), 20);
        for stored in &history {
            let frame: serde_json::Value = serde_json::from_str(bob_rx.try_recv().unwrap().as_str()).unwrap();
            assert_eq!(frame["data"]["id"], stored.id.to_string());
        }
        assert!(service.sequencers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn history_is_capped_and_forbidden_to_outsiders() {
        let fx = Fixture::new();
        let (service, _) = service(fx.store.clone());

        for i in 0..3 {
            service.send(text(fx.conversation, fx.alice, &format!("m{}", i))).await.unwrap();
        }

        let two = service.history(&fx.conversation.to_string(), fx.bob, Some(2)).await.unwrap();
        assert_eq!(two.len(), 2);
        assert_eq!(two[0].text.as_deref(), Some("m1"));
        assert_eq!(two[1].text.as_deref(), Some("m2"));
        assert!(two[0].created_at < two[1].created_at);

        let all = service.history(&fx.conversation.to_string(), fx.bob, Some(100_000)).await.unwrap();
        assert_eq!(all.len(), 3);

        let err = service
            .history(&fx.conversation.to_string(), fx.mallory, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Forbidden));
    }

    #[tokio::test]
    async fn history_never_exceeds_the_cap() {
        let fx = Fixture::new();
        let (service, _) = service(fx.store.clone());
        let total = HISTORY_LIMIT as usize + 20;

        for i in 0..total {
            service.send(text(fx.conversation, fx.alice, &format!("m{}", i))).await.unwrap();
        }

        for limit in [None, Some(100_000)] {
            let page = service.history(&fx.conversation.to_string(), fx.bob, limit).await.unwrap();
            assert_eq!(page.len(), HISTORY_LIMIT as usize);
            assert_eq!(page[0].text.as_deref(), Some("m20"));
            assert_eq!(page[page.len() - 1].text, Some(format!("m{}", total - 1)));
            assert!(page.windows(2).all(|w| w[0].created_at < w[1].created_at));
        }
    }

    #[tokio::test]
    async fn abandoned_send_is_still_broadcast() {
        let fx = Fixture::new();
        let slow = SlowInserts(fx.db.clone(), Duration::from_millis(100));
        let (service, registry) = service(Arc::new(slow));

        let (bob_conn, mut bob_rx) = LiveConnection::new(fx.bob, fx.conversation);
        registry.add(bob_conn).await;

        // The caller gives up while the insert is still running
        let attempt = tokio::time::timeout(
            Duration::from_millis(50),
            service.send(text(fx.conversation, fx.alice, "are you there")),
        )
        .await;
        assert!(attempt.is_err());

        let frame = tokio::time::timeout(Duration::from_secs(2), bob_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let frame: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(frame["data"]["text"], "are you there");
        assert_eq!(fx.db.count_messages(&fx.conversation.to_string()).unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(service.sequencers.lock().await.is_empty());
    }
}
