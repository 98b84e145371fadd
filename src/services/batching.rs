//! Batch placement rules.
//!
//! A batch is closed once it has been idle longer than the window or holds
//! `max_messages` messages. Every send path places messages through
//! [`BatchingPolicy::place`], so both rules always apply together.

use crate::config::BatchingConfig;
use crate::models::{Batch, ChatId, Message};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy)]
pub struct BatchingPolicy {
    pub window: Duration,
    pub max_messages: usize,
}

impl Default for BatchingPolicy {
    fn default() -> Self {
        Self {
            window: Duration::hours(1),
            max_messages: 100,
        }
    }
}

impl From<&BatchingConfig> for BatchingPolicy {
    fn from(cfg: &BatchingConfig) -> Self {
        Self {
            window: Duration::seconds(cfg.window_secs as i64),
            max_messages: cfg.max_messages,
        }
    }
}

/// Where a message goes, with the message already applied to the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// Existing batch, message pushed and end time moved.
    Append(Batch),
    /// New batch seeded with only this message.
    Start(Batch),
}

impl Placement {
    pub fn batch(&self) -> &Batch {
        match self {
            Placement::Append(b) | Placement::Start(b) => b,
        }
    }

    pub fn into_batch(self) -> Batch {
        match self {
            Placement::Append(b) | Placement::Start(b) => b,
        }
    }
}

impl BatchingPolicy {
    pub fn is_closed(&self, batch: &Batch, now: DateTime<Utc>) -> bool {
        now - batch.end_time > self.window || batch.len() >= self.max_messages
    }

    /// Decide placement of `message` given the conversation's latest batch.
    /// The message timestamp is the "now" both rules are evaluated against.
    ///
    /// A message stamped before the latest batch's end (it waited behind a
    /// concurrent writer) is moved up to that end, so timestamps never go
    /// backwards within a conversation.
    pub fn place(
        &self,
        chat_id: &ChatId,
        latest: Option<Batch>,
        mut message: Message,
    ) -> Placement {
        if let Some(batch) = &latest {
            message.timestamp = message.timestamp.max(batch.end_time);
        }
        match latest {
            Some(mut batch) if !self.is_closed(&batch, message.timestamp) => {
                batch.push(message);
                Placement::Append(batch)
            }
            _ => Placement::Start(Batch::seeded(chat_id.clone(), message)),
        }
    }
}
