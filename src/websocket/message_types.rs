use crate::models::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound WebSocket events from client to server
///
/// Frames look like `{"event": "sendMessage", "data": {...}}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum WsInboundEvent {
    #[serde(rename = "joinChat")]
    JoinChat(JoinChatPayload),

    #[serde(rename = "sendMessage")]
    SendMessage(SendMessagePayload),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinChatPayload {
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// Fields are optional on the wire so that missing ones are reported back as
/// validation errors instead of a generic parse failure.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub receiver_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Advisory only; the server derives the chat from sender and receiver.
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// Outbound WebSocket events from server to client
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum WsOutboundEvent {
    #[serde(rename = "receiveMessage")]
    ReceiveMessage(ReceiveMessagePayload),

    #[serde(rename = "error")]
    Error(ErrorPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveMessagePayload {
    pub sender_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Message> for ReceiveMessagePayload {
    fn from(m: &Message) -> Self {
        Self {
            sender_id: m.sender_id.clone(),
            message: m.body.clone(),
            timestamp: m.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

impl WsOutboundEvent {
    pub fn error(message: impl Into<String>) -> Self {
        WsOutboundEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }
}
