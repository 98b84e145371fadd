pub mod chats;
pub mod messages;
pub mod wsroute;

use crate::error::AppError;
use actix_web::web;

/// Mount every endpoint: `/chat/...` plus `/health`.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| {
                AppError::BadRequest(format!("Invalid request body: {err}")).into()
            }),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| {
                AppError::BadRequest(format!("Invalid query: {err}")).into()
            }),
    )
    .service(
        web::scope("/chat")
            .service(messages::send_message)
            .service(messages::mark_read)
            .service(messages::get_messages)
            .service(messages::unread_count)
            .service(messages::search_messages)
            .service(chats::initiate_chat)
            .service(chats::get_all_chats)
            .service(chats::get_user_chats)
            .service(wsroute::ws_handler),
    )
    .route("/health", web::get().to(|| async { "OK" }));
}
