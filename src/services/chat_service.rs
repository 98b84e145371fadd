use crate::error::{AppError, AppResult};
use crate::models::{ChatId, Message, Participants};
use crate::services::batch_store::BatchStore;
use crate::services::require;
use crate::websocket::Fanout;
use tracing::{debug, info};

/// A message after it was persisted.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub chat_id: ChatId,
    pub message: Message,
}

/// Write side of the chat. Both the HTTP and the WebSocket send paths go
/// through [`ChatService::send_message`].
#[derive(Clone)]
pub struct ChatService {
    store: BatchStore,
    fanout: Fanout,
}

impl ChatService {
    pub fn new(store: BatchStore, fanout: Fanout) -> Self {
        Self { store, fanout }
    }

    /// Validate, persist into the current batch, then publish to the
    /// conversation's group. Nothing is published if persistence fails.
    pub async fn send_message(
        &self,
        sender_id: Option<&str>,
        receiver_id: Option<&str>,
        body: Option<&str>,
    ) -> AppResult<SentMessage> {
        let sender_id = require(sender_id, "senderId")?;
        let receiver_id = require(receiver_id, "receiverId")?;
        // body is stored verbatim; only all-blank text is rejected
        require(body, "message")?;
        let body = body.unwrap_or_default();

        let participants = Participants::new(sender_id, receiver_id)?;
        let chat_id = participants.chat_id();
        let message = Message::new(sender_id, body);

        let batch = self
            .store
            .append_or_create(&participants, message)
            .await
            .map_err(AppError::storage("sending message"))?;
        // the placement may have moved the timestamp; report what was stored
        let message = batch.last_message().cloned().ok_or(AppError::Internal)?;
        debug!(
            chat_id = %chat_id,
            batch_id = %batch.id,
            batch_size = batch.len(),
            "message persisted"
        );

        self.fanout.publish_message(&chat_id, &message).await;
        Ok(SentMessage { chat_id, message })
    }

    /// Register the conversation between two users. Returns the chat id and
    /// whether it was newly created.
    pub async fn initiate_chat(
        &self,
        user_id1: Option<&str>,
        user_id2: Option<&str>,
    ) -> AppResult<(ChatId, bool)> {
        let user_id1 = require(user_id1, "userId1")?;
        let user_id2 = require(user_id2, "userId2")?;
        let participants = Participants::new(user_id1, user_id2)?;

        let created = self
            .store
            .register_conversation(&participants)
            .await
            .map_err(AppError::storage("creating chat"))?;

        let chat_id = participants.chat_id();
        info!(chat_id = %chat_id, created, "chat initiated");
        Ok((chat_id, created))
    }
}
