pub mod batch_store;
pub mod batching;
pub mod chat_service;
pub mod history_service;

pub use batch_store::BatchStore;
pub use batching::BatchingPolicy;
pub use chat_service::{ChatService, SentMessage};
pub use history_service::HistoryService;

use crate::error::{AppError, AppResult};

/// Trimmed, non-empty value of a request field.
pub(crate) fn require<'a>(value: Option<&'a str>, field: &str) -> AppResult<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::BadRequest(format!("{field} is required"))),
    }
}
