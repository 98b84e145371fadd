use crate::storage::StorageError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("{0}")]
    BadRequest(String),

    /// A storage call failed while performing `action` (e.g. "fetching messages").
    #[error("storage failure while {action}: {source}")]
    Storage {
        action: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("internal server error")]
    Internal,
}

/// Body of every error response: `{"message": "..."}`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

impl AppError {
    /// Adapter for `map_err` that tags a storage failure with the operation it interrupted.
    pub fn storage(action: &'static str) -> impl FnOnce(StorageError) -> AppError {
        move |source| AppError::Storage { action, source }
    }

    /// Returns whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Storage { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Message exposed to clients. Storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Storage { action, .. } => format!("Error {action}"),
            _ => "Error processing request".to_string(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Storage { .. } if self.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        HttpResponse::build(status).json(ErrorBody {
            message: self.public_message(),
        })
    }
}
