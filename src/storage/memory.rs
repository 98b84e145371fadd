//! Process-local batch storage.
//!
//! Used when no `DATABASE_URL` is configured and by the test suites. All state
//! sits behind one lock, which makes the conditional writes trivially atomic.

use super::{BatchRepository, Page, StorageError, StorageResult};
use crate::models::{Batch, ChatId, Participants};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    batches: HashMap<Uuid, Batch>,
    // chat -> batch ids in creation order
    by_chat: BTreeMap<ChatId, Vec<Uuid>>,
    // participant -> chats
    participants: HashMap<String, BTreeSet<ChatId>>,
}

impl Inner {
    fn chat_batches(&self, chat_id: &ChatId) -> Vec<Batch> {
        self.by_chat
            .get(chat_id)
            .map(|ids| ids.iter().filter_map(|id| self.batches.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    fn latest(&self, chat_id: &ChatId) -> Option<&Batch> {
        self.by_chat.get(chat_id).and_then(|ids| {
            ids.iter()
                .filter_map(|id| self.batches.get(id))
                // later-created wins ties on end time
                .fold(None, |best: Option<&Batch>, b| match best {
                    Some(cur) if cur.end_time > b.end_time => Some(cur),
                    _ => Some(b),
                })
        })
    }

    fn index(&mut self, participants: &Participants) -> bool {
        let chat_id = participants.chat_id();
        let mut inserted = false;
        for user in participants.ids() {
            inserted |= self
                .participants
                .entry(user.to_string())
                .or_default()
                .insert(chat_id.clone());
        }
        inserted
    }
}

#[derive(Default, Clone)]
pub struct InMemoryBatchRepository {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryBatchRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored batches for a conversation (diagnostics and tests)
    pub async fn batch_count(&self, chat_id: &ChatId) -> usize {
        let guard = self.inner.read().await;
        guard.by_chat.get(chat_id).map(|v| v.len()).unwrap_or(0)
    }
}

#[async_trait]
impl BatchRepository for InMemoryBatchRepository {
    async fn latest(&self, chat_id: &ChatId) -> StorageResult<Option<Batch>> {
        let guard = self.inner.read().await;
        Ok(guard.latest(chat_id).cloned())
    }

    async fn create(
        &self,
        batch: &Batch,
        participants: &Participants,
        expected_latest: Option<Uuid>,
    ) -> StorageResult<()> {
        let mut guard = self.inner.write().await;

        let current = guard.latest(&batch.chat_id).map(|b| b.id);
        if current != expected_latest {
            return Err(StorageError::Conflict {
                chat_id: batch.chat_id.to_string(),
            });
        }

        guard.index(participants);
        guard
            .by_chat
            .entry(batch.chat_id.clone())
            .or_default()
            .push(batch.id);
        guard.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn save(&self, batch: &Batch) -> StorageResult<()> {
        let mut guard = self.inner.write().await;
        match guard.batches.get_mut(&batch.id) {
            Some(stored) if stored.version == batch.version => {
                *stored = Batch {
                    version: batch.version + 1,
                    ..batch.clone()
                };
                Ok(())
            }
            Some(_) => Err(StorageError::Conflict {
                chat_id: batch.chat_id.to_string(),
            }),
            None => Err(StorageError::Backend(format!(
                "batch {} does not exist",
                batch.id
            ))),
        }
    }

    async fn for_chat(&self, chat_id: &ChatId) -> StorageResult<Vec<Batch>> {
        let guard = self.inner.read().await;
        let mut batches = guard.chat_batches(chat_id);
        batches.sort_by_key(|b| b.start_time);
        Ok(batches)
    }

    async fn for_participant(&self, user_id: &str) -> StorageResult<Vec<Batch>> {
        let guard = self.inner.read().await;
        let mut batches: Vec<Batch> = guard
            .participants
            .get(user_id)
            .into_iter()
            .flatten()
            .flat_map(|chat_id| guard.chat_batches(chat_id))
            .collect();
        batches.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(batches)
    }

    async fn all(&self, page: Page) -> StorageResult<Vec<Batch>> {
        let guard = self.inner.read().await;
        let mut batches: Vec<Batch> = guard
            .by_chat
            .keys()
            .skip(page.offset)
            .take(page.limit)
            .flat_map(|chat_id| guard.chat_batches(chat_id))
            .collect();
        batches.sort_by(|a, b| a.chat_id.cmp(&b.chat_id).then(a.start_time.cmp(&b.start_time)));
        Ok(batches)
    }

    async fn register_chat(&self, participants: &Participants) -> StorageResult<bool> {
        let mut guard = self.inner.write().await;
        Ok(guard.index(participants))
    }
}
