//! Batch document storage.
//!
//! The service only talks to [`BatchRepository`]. Writes are conditional:
//! `create` and `save` fail with [`StorageError::Conflict`] when another
//! writer got there first, and the caller re-runs its read-decide-write cycle.

use crate::models::{Batch, ChatId, Participants};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryBatchRepository;
pub use postgres::PgBatchRepository;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),

    /// The conditional write lost a race; nothing was written.
    #[error("concurrent write conflict on chat {chat_id}")]
    Conflict { chat_id: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StorageError::Timeout(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

impl From<tokio_postgres::Error> for StorageError {
    fn from(e: tokio_postgres::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for StorageError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StorageError::Backend(e.to_string())
    }
}

/// Window over the conversation list for global scans, ordered by chat id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

#[async_trait]
pub trait BatchRepository: Send + Sync {
    /// Batch with the greatest end time for the conversation.
    async fn latest(&self, chat_id: &ChatId) -> StorageResult<Option<Batch>>;

    /// Insert a new batch and index both participants.
    ///
    /// Succeeds only while the conversation's latest batch is still
    /// `expected_latest` (`None` = the conversation has no batch yet).
    async fn create(
        &self,
        batch: &Batch,
        participants: &Participants,
        expected_latest: Option<Uuid>,
    ) -> StorageResult<()>;

    /// Overwrite a batch if its stored version still equals `batch.version`.
    /// The stored version becomes `batch.version + 1`.
    async fn save(&self, batch: &Batch) -> StorageResult<()>;

    /// All batches of one conversation, ascending start time.
    async fn for_chat(&self, chat_id: &ChatId) -> StorageResult<Vec<Batch>>;

    /// All batches of every conversation `user_id` participates in,
    /// descending start time.
    async fn for_participant(&self, user_id: &str) -> StorageResult<Vec<Batch>>;

    /// Batches of the conversations in `page` (conversations ordered by id).
    async fn all(&self, page: Page) -> StorageResult<Vec<Batch>>;

    /// Record the conversation in the participant index.
    /// Returns `false` if it was already known.
    async fn register_chat(&self, participants: &Participants) -> StorageResult<bool>;
}
