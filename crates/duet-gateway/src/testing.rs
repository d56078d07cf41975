use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use duet_db::Database;
use duet_types::models::{Conversation, Message};

use crate::store::{MessageStore, NewMessage};

/// Three users and two conversations in an in-memory database:
/// alice+bob share `conversation`, alice+mallory share `other_conversation`.
pub struct Fixture {
    pub db: Arc<Database>,
    pub store: Arc<dyn MessageStore>,
    pub alice: Uuid,
    pub bob: Uuid,
    pub mallory: Uuid,
    pub conversation: Uuid,
    pub other_conversation: Uuid,
}

impl Fixture {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (alice, bob, mallory) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for (id, name) in [(alice, "alice"), (bob, "bob"), (mallory, "mallory")] {
            db.create_user(&id.to_string(), name, "x").unwrap();
        }

        let conversation = db
            .create_conversation(&Uuid::new_v4().to_string(), &alice.to_string(), &bob.to_string())
            .unwrap()
            .id
            .parse()
            .unwrap();
        let other_conversation = db
            .create_conversation(&Uuid::new_v4().to_string(), &alice.to_string(), &mallory.to_string())
            .unwrap()
            .id
            .parse()
            .unwrap();

        Self {
            store: db.clone(),
            db,
            alice,
            bob,
            mallory,
            conversation,
            other_conversation,
        }
    }
}

/// Reads go to the database; every insert fails.
pub struct FailingInserts(pub Arc<Database>);

impl MessageStore for FailingInserts {
    fn insert_message(&self, _message: &NewMessage) -> Result<(Uuid, DateTime<Utc>)> {
        Err(anyhow!("disk I/O error"))
    }

    fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        MessageStore::get_conversation(&*self.0, conversation_id)
    }

    fn list_messages(&self, conversation_id: Uuid, limit: u32) -> Result<Vec<Message>> {
        MessageStore::list_messages(&*self.0, conversation_id, limit)
    }
}

/// Every insert blocks for the given duration before reaching the database.
pub struct SlowInserts(pub Arc<Database>, pub Duration);

impl MessageStore for SlowInserts {
    fn insert_message(&self, message: &NewMessage) -> Result<(Uuid, DateTime<Utc>)> {
        std::thread::sleep(self.1);
        MessageStore::insert_message(&*self.0, message)
    }

    fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        MessageStore::get_conversation(&*self.0, conversation_id)
    }

    fn list_messages(&self, conversation_id: Uuid, limit: u32) -> Result<Vec<Message>> {
        MessageStore::list_messages(&*self.0, conversation_id, limit)
    }
}
