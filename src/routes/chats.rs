use crate::{error::AppError, models::ChatId, state::AppState};
use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateChatRequest {
    pub user_id1: Option<String>,
    pub user_id2: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateChatResponse {
    pub message: &'static str,
    pub chat_id: ChatId,
}

#[derive(Deserialize)]
pub struct ListChatsQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// POST /chat/chats/initiate
#[post("/chats/initiate")]
pub async fn initiate_chat(
    state: web::Data<AppState>,
    body: web::Json<InitiateChatRequest>,
) -> Result<HttpResponse, AppError> {
    let (chat_id, created) = state
        .chat
        .initiate_chat(body.user_id1.as_deref(), body.user_id2.as_deref())
        .await?;

    if created {
        Ok(HttpResponse::Created().json(InitiateChatResponse {
            message: "Chat created successfully",
            chat_id,
        }))
    } else {
        Ok(HttpResponse::Ok().json(InitiateChatResponse {
            message: "Chat already exists",
            chat_id,
        }))
    }
}

/// GET /chat/chats/{userId}
#[get("/chats/{user_id}")]
pub async fn get_user_chats(
    state: web::Data<AppState>,
    user_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let chats = state.history.user_conversations(&user_id).await?;
    Ok(HttpResponse::Ok().json(chats))
}

/// GET /chat/chats?limit=&offset=
///
/// Administrative listing of every conversation, paginated by chat id.
#[get("/chats")]
pub async fn get_all_chats(
    state: web::Data<AppState>,
    query: web::Query<ListChatsQuery>,
) -> Result<HttpResponse, AppError> {
    let chats = state
        .history
        .all_conversations(query.limit, query.offset)
        .await?;
    Ok(HttpResponse::Ok().json(chats))
}
