use crate::models::chat_id::ChatId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single chat message as embedded in a [`Batch`].
///
/// Only `read` / `read_at` change after the message is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: String,
    #[serde(rename = "message")]
    pub body: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// New unread message stamped with the server clock
    pub fn new(sender_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self::at(sender_id, body, Utc::now())
    }

    pub fn at(
        sender_id: impl Into<String>,
        body: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            body: body.into(),
            timestamp,
            read: false,
            read_at: None,
        }
    }

    /// Flip an unread message from someone other than `reader` to read.
    /// Returns whether anything changed.
    pub fn mark_read_by(&mut self, reader: &str, now: DateTime<Utc>) -> bool {
        if self.read || self.sender_id == reader {
            return false;
        }
        self.read = true;
        self.read_at = Some(now);
        true
    }

    pub fn is_unread_for(&self, user_id: &str) -> bool {
        !self.read && self.sender_id != user_id
    }
}

/// Unit of persistence: a time/size bounded run of messages of one conversation.
///
/// `version` is bumped by the store on every successful write and is what
/// conditional saves compare against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: Uuid,
    pub chat_id: ChatId,
    pub messages: Vec<Message>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub version: i64,
}

impl Batch {
    /// Fresh batch holding only `message`; start and end are the message timestamp.
    pub fn seeded(chat_id: ChatId, message: Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            chat_id,
            start_time: message.timestamp,
            end_time: message.timestamp,
            messages: vec![message],
            version: 0,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.end_time = message.timestamp;
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}
