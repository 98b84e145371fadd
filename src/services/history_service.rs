//! Read side of the chat: history, conversation lists, unread counts,
//! search, and the read-flag transition.

use crate::config::ListingConfig;
use crate::error::{AppError, AppResult};
use crate::models::{Batch, ChatId, Message};
use crate::services::batch_store::BatchStore;
use crate::services::require;
use crate::storage::Page;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

pub const MIN_SEARCH_LEN: usize = 3;

/// History entry as returned by `GET /chat/messages/...`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub sender_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Message> for MessageView {
    fn from(m: &Message) -> Self {
        Self {
            sender_id: m.sender_id.clone(),
            message: m.body.clone(),
            timestamp: m.timestamp,
        }
    }
}

/// All messages of one conversation, read flags included.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessages {
    pub chat_id: ChatId,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub chat_id: ChatId,
    pub sender_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct HistoryService {
    store: BatchStore,
    listing: ListingConfig,
}

impl HistoryService {
    pub fn new(store: BatchStore, listing: ListingConfig) -> Self {
        Self { store, listing }
    }

    /// Full history between `a` and `b`, oldest first.
    pub async fn get_messages(&self, a: &str, b: &str) -> AppResult<Vec<MessageView>> {
        let chat_id = ChatId::resolve(a, b)?;
        let batches = self
            .store
            .all_for_conversation(&chat_id)
            .await
            .map_err(AppError::storage("fetching messages"))?;

        Ok(batches
            .iter()
            .flat_map(|b| b.messages.iter().map(MessageView::from))
            .collect())
    }

    /// Conversations of `user_id`, most recently started first.
    pub async fn user_conversations(&self, user_id: &str) -> AppResult<Vec<ConversationMessages>> {
        let user_id = require(Some(user_id), "userId")?;
        let batches = self
            .store
            .all_for_participant(user_id)
            .await
            .map_err(AppError::storage("fetching chats"))?;
        Ok(group_by_conversation(batches))
    }

    /// Administrative listing over a page of all conversations, ordered by
    /// chat id, each with its messages in timestamp order.
    pub async fn all_conversations(
        &self,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> AppResult<Vec<ConversationMessages>> {
        let page = Page {
            offset: offset.unwrap_or(0),
            limit: limit
                .unwrap_or(self.listing.default_limit)
                .clamp(1, self.listing.max_limit),
        };
        let batches = self
            .store
            .all(page)
            .await
            .map_err(AppError::storage("fetching chats"))?;

        let mut groups = group_by_conversation(batches);
        for group in &mut groups {
            group.messages.sort_by_key(|m| m.timestamp);
        }
        Ok(groups)
    }

    /// Unread messages addressed to `user_id`, per conversation. Conversations
    /// without unread messages are left out.
    pub async fn unread_count(&self, user_id: &str) -> AppResult<BTreeMap<ChatId, usize>> {
        let user_id = require(Some(user_id), "userId")?;
        let batches = self
            .store
            .all_for_participant(user_id)
            .await
            .map_err(AppError::storage("fetching unread count"))?;

        let mut counts = BTreeMap::new();
        for batch in &batches {
            let unread = batch.messages.iter().filter(|m| m.is_unread_for(user_id)).count();
            if unread > 0 {
                *counts.entry(batch.chat_id.clone()).or_insert(0) += unread;
            }
        }
        Ok(counts)
    }

    /// Case-insensitive substring search over every conversation of `user_id`,
    /// newest first.
    pub async fn search(&self, user_id: &str, query: &str) -> AppResult<Vec<SearchHit>> {
        let user_id = require(Some(user_id), "userId")?;
        if query.chars().count() < MIN_SEARCH_LEN {
            return Err(AppError::BadRequest(format!(
                "Search query must be at least {MIN_SEARCH_LEN} characters"
            )));
        }
        let needle = query.to_lowercase();

        let batches = self
            .store
            .all_for_participant(user_id)
            .await
            .map_err(AppError::storage("searching messages"))?;

        let mut hits: Vec<SearchHit> = batches
            .iter()
            .flat_map(|batch| {
                batch
                    .messages
                    .iter()
                    .filter(|m| m.body.to_lowercase().contains(&needle))
                    .map(move |m| SearchHit {
                        chat_id: batch.chat_id.clone(),
                        sender_id: m.sender_id.clone(),
                        message: m.body.clone(),
                        timestamp: m.timestamp,
                    })
            })
            .collect();
        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        debug!(user_id, query, hits = hits.len(), "search completed");
        Ok(hits)
    }

    /// Mark every message sent to `user_id` in `chat_id` as read. Idempotent.
    pub async fn mark_read(&self, user_id: Option<&str>, chat_id: Option<&str>) -> AppResult<()> {
        let user_id = require(user_id, "userId")?;
        let chat_id = ChatId::from_raw(require(chat_id, "chatId")?)?;
        let now = Utc::now();

        let written = self
            .store
            .update_conversation(&chat_id, |batch| {
                batch
                    .messages
                    .iter_mut()
                    .fold(false, |changed, m| m.mark_read_by(user_id, now) || changed)
            })
            .await
            .map_err(AppError::storage("marking messages as read"))?;

        info!(user_id, chat_id = %chat_id, batches = written, "messages marked as read");
        Ok(())
    }
}

/// One group per conversation in first-seen order, messages concatenated in
/// batch order.
fn group_by_conversation(batches: Vec<Batch>) -> Vec<ConversationMessages> {
    let mut groups: Vec<ConversationMessages> = Vec::new();
    let mut position: HashMap<ChatId, usize> = HashMap::new();

    for batch in batches {
        match position.get(&batch.chat_id) {
            Some(&i) => groups[i].messages.extend(batch.messages),
            None => {
                position.insert(batch.chat_id.clone(), groups.len());
                groups.push(ConversationMessages {
                    chat_id: batch.chat_id,
                    messages: batch.messages,
                });
            }
        }
    }
    groups
}
