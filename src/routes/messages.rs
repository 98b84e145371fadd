use crate::{error::AppError, models::ChatId, state::AppState};
use actix_web::{get, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub sender_id: Option<String>,
    pub receiver_id: Option<String>,
    pub message: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessageData {
    pub sender_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct SendMessageResponse {
    pub message: &'static str,
    pub data: SentMessageData,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub user_id: Option<String>,
    pub chat_id: Option<String>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub message: &'static str,
}

/// POST /chat/messages/send
#[post("/messages/send")]
pub async fn send_message(
    state: web::Data<AppState>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let sent = state
        .chat
        .send_message(
            body.sender_id.as_deref(),
            body.receiver_id.as_deref(),
            body.message.as_deref(),
        )
        .await?;

    Ok(HttpResponse::Created().json(SendMessageResponse {
        message: "Message sent successfully",
        data: SentMessageData {
            sender_id: sent.message.sender_id,
            message: sent.message.body,
            timestamp: sent.message.timestamp,
        },
    }))
}

/// POST /chat/messages/mark-read
#[post("/messages/mark-read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    body: web::Json<MarkReadRequest>,
) -> Result<HttpResponse, AppError> {
    state
        .history
        .mark_read(body.user_id.as_deref(), body.chat_id.as_deref())
        .await?;

    Ok(HttpResponse::Ok().json(StatusResponse {
        message: "Messages marked as read",
    }))
}

/// GET /chat/messages/{userId}/{receiverId}
#[get("/messages/{user_id}/{receiver_id}")]
pub async fn get_messages(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (user_id, receiver_id) = path.into_inner();
    let messages = state.history.get_messages(&user_id, &receiver_id).await?;
    Ok(HttpResponse::Ok().json(messages))
}

/// GET /chat/unread-count/{userId}
#[get("/unread-count/{user_id}")]
pub async fn unread_count(
    state: web::Data<AppState>,
    user_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let counts: BTreeMap<ChatId, usize> = state.history.unread_count(&user_id).await?;
    Ok(HttpResponse::Ok().json(counts))
}

/// GET /chat/search/{userId}/{query}
#[get("/search/{user_id}/{query}")]
pub async fn search_messages(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (user_id, query) = path.into_inner();
    let hits = state.history.search(&user_id, &query).await?;
    Ok(HttpResponse::Ok().json(hits))
}
