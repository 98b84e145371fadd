//! Batch Store: batching-aware access to the [`BatchRepository`].
//!
//! Writers for one conversation run a read-decide-write cycle:
//! fetch the latest batch, let the [`BatchingPolicy`] place the message, then
//! write conditionally. A lost race surfaces as [`StorageError::Conflict`] and
//! the whole cycle is re-run with backoff. The per-conversation mutex only
//! keeps writers of this process from racing each other.

use crate::config::StorageConfig;
use crate::models::{Batch, ChatId, Message, Participants};
use crate::resilience::{with_retry, with_timeout, RetryConfig};
use crate::services::batching::{BatchingPolicy, Placement};
use crate::storage::{BatchRepository, Page, StorageError, StorageResult};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// In-process write locks keyed by conversation.
#[derive(Default)]
struct ChatLocks {
    locks: DashMap<ChatId, Arc<Mutex<()>>>,
}

impl ChatLocks {
    async fn run<F, T>(&self, chat_id: &ChatId, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock = self.locks.entry(chat_id.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            work.await
        };
        drop(lock);
        // last holder cleans up
        self.locks.remove_if(chat_id, |_, l| Arc::strong_count(l) == 1);
        result
    }
}

#[derive(Clone)]
pub struct BatchStore {
    repo: Arc<dyn BatchRepository>,
    policy: BatchingPolicy,
    locks: Arc<ChatLocks>,
    timeout: Duration,
    retry: RetryConfig,
}

impl BatchStore {
    pub fn new(
        repo: Arc<dyn BatchRepository>,
        policy: BatchingPolicy,
        storage: &StorageConfig,
    ) -> Self {
        Self {
            repo,
            policy,
            locks: Arc::new(ChatLocks::default()),
            timeout: storage.timeout(),
            retry: RetryConfig {
                max_retries: storage.max_conflict_retries,
                ..RetryConfig::default()
            },
        }
    }

    /// Persist `message` into the conversation of `participants`, appending
    /// to the latest batch or starting a new one. Returns the stored batch.
    pub async fn append_or_create(
        &self,
        participants: &Participants,
        message: Message,
    ) -> StorageResult<Batch> {
        let chat_id = participants.chat_id();
        let chat = &chat_id;
        self.locks
            .run(chat, async {
                with_retry(&self.retry, StorageError::is_conflict, || {
                    self.place_once(chat, participants, message.clone())
                })
                .await
            })
            .await
    }

    async fn place_once(
        &self,
        chat_id: &ChatId,
        participants: &Participants,
        message: Message,
    ) -> StorageResult<Batch> {
        let latest = with_timeout(self.timeout, self.repo.latest(chat_id)).await?;
        let expected = latest.as_ref().map(|b| b.id);

        match self.policy.place(chat_id, latest, message) {
            Placement::Append(mut batch) => {
                with_timeout(self.timeout, self.repo.save(&batch)).await?;
                batch.version += 1;
                debug!(
                    chat_id = %chat_id,
                    batch_id = %batch.id,
                    size = batch.len(),
                    "appended to batch"
                );
                Ok(batch)
            }
            Placement::Start(batch) => {
                with_timeout(self.timeout, self.repo.create(&batch, participants, expected)).await?;
                debug!(
                    chat_id = %chat_id,
                    batch_id = %batch.id,
                    previous = ?expected,
                    "started new batch"
                );
                Ok(batch)
            }
        }
    }

    pub async fn latest(&self, chat_id: &ChatId) -> StorageResult<Option<Batch>> {
        with_timeout(self.timeout, self.repo.latest(chat_id)).await
    }

    pub async fn all_for_conversation(&self, chat_id: &ChatId) -> StorageResult<Vec<Batch>> {
        with_timeout(self.timeout, self.repo.for_chat(chat_id)).await
    }

    pub async fn all_for_participant(&self, user_id: &str) -> StorageResult<Vec<Batch>> {
        with_timeout(self.timeout, self.repo.for_participant(user_id)).await
    }

    pub async fn all(&self, page: Page) -> StorageResult<Vec<Batch>> {
        with_timeout(self.timeout, self.repo.all(page)).await
    }

    pub async fn register_conversation(&self, participants: &Participants) -> StorageResult<bool> {
        with_timeout(self.timeout, self.repo.register_chat(participants)).await
    }

    /// Version-checked write of a batch that was read from this store.
    pub async fn save(&self, batch: &Batch) -> StorageResult<()> {
        with_timeout(self.timeout, self.repo.save(batch)).await
    }

    /// Apply `change` to every batch of a conversation and save the ones it
    /// reports as modified. Conflicts re-run the cycle on fresh reads, so
    /// `change` must be idempotent. Returns the number of batches written.
    pub async fn update_conversation<F>(&self, chat_id: &ChatId, change: F) -> StorageResult<usize>
    where
        F: Fn(&mut Batch) -> bool,
    {
        let change = &change;
        self.locks
            .run(chat_id, async {
                with_retry(&self.retry, StorageError::is_conflict, || async move {
                    let mut written = 0;
                    for mut batch in self.all_for_conversation(chat_id).await? {
                        if change(&mut batch) {
                            self.save(&batch).await?;
                            written += 1;
                        }
                    }
                    Ok::<_, StorageError>(written)
                })
                .await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::InMemoryBatchRepository;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    fn pair() -> Participants {
        Participants::new("u1", "u2").unwrap()
    }

    fn store_over(repo: Arc<dyn BatchRepository>, policy: BatchingPolicy) -> BatchStore {
        let mut storage = Config::test_defaults().storage;
        storage.timeout_ms = 200;
        BatchStore::new(repo, policy, &storage)
    }

    fn memory_store() -> (InMemoryBatchRepository, BatchStore) {
        let repo = InMemoryBatchRepository::new();
        let store = store_over(Arc::new(repo.clone()), BatchingPolicy::default());
        (repo, store)
    }

    #[tokio::test]
    async fn first_message_creates_single_batch() {
        let (repo, store) = memory_store();
        let msg = Message::new("u1", "hello");
        let ts = msg.timestamp;

        let batch = store.append_or_create(&pair(), msg).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.start_time, ts);
        assert_eq!(batch.end_time, ts);
        assert_eq!(repo.batch_count(&pair().chat_id()).await, 1);
    }

    #[tokio::test]
    async fn hundred_and_first_message_opens_second_batch() {
        let (repo, store) = memory_store();
        let start = Utc::now();
        for i in 0..101 {
            let msg = Message::at("u1", format!("m{i}"), start + ChronoDuration::seconds(i));
            store.append_or_create(&pair(), msg).await.unwrap();
        }

        let batches = store.all_for_conversation(&pair().chat_id()).await.unwrap();
        assert_eq!(repo.batch_count(&pair().chat_id()).await, 2);
        assert_eq!(batches[0].len(), 100);
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[1].messages[0].body, "m100");
    }

    #[tokio::test]
    async fn idle_conversation_starts_new_batch() {
        let (_, store) = memory_store();
        let start = Utc::now();
        store
            .append_or_create(&pair(), Message::at("u1", "a", start))
            .await
            .unwrap();
        // exactly one window later still appends
        let same = store
            .append_or_create(&pair(), Message::at("u2", "b", start + ChronoDuration::hours(1)))
            .await
            .unwrap();
        assert_eq!(same.len(), 2);

        let later = same.end_time + ChronoDuration::hours(1) + ChronoDuration::seconds(1);
        let fresh = store
            .append_or_create(&pair(), Message::at("u1", "c", later))
            .await
            .unwrap();
        assert_ne!(fresh.id, same.id);
        assert_eq!(fresh.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_sends_lose_nothing() {
        let repo = InMemoryBatchRepository::new();
        let store = store_over(
            Arc::new(repo.clone()),
            BatchingPolicy {
                max_messages: 10,
                ..BatchingPolicy::default()
            },
        );

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append_or_create(&pair(), Message::new("u1", format!("msg-{i}")))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let batches = store.all_for_conversation(&pair().chat_id()).await.unwrap();
        let total: usize = batches.iter().map(Batch::len).sum();
        assert_eq!(total, 50);
        assert!(batches.iter().all(|b| b.len() <= 10));
    }

    /// Fails the first `conflicts` writes with a conflict before delegating.
    struct ConflictingRepo {
        inner: InMemoryBatchRepository,
        conflicts: AtomicU32,
        writes: AtomicU32,
    }

    impl ConflictingRepo {
        fn conflict_once(&self, chat_id: &ChatId) -> StorageResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let left = self.conflicts.load(Ordering::SeqCst);
            if left > 0 {
                self.conflicts.store(left - 1, Ordering::SeqCst);
                return Err(StorageError::Conflict {
                    chat_id: chat_id.to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BatchRepository for ConflictingRepo {
        async fn latest(&self, chat_id: &ChatId) -> StorageResult<Option<Batch>> {
            self.inner.latest(chat_id).await
        }
        async fn create(
            &self,
            batch: &Batch,
            p: &Participants,
            expected: Option<Uuid>,
        ) -> StorageResult<()> {
            self.conflict_once(&batch.chat_id)?;
            self.inner.create(batch, p, expected).await
        }
        async fn save(&self, batch: &Batch) -> StorageResult<()> {
            self.conflict_once(&batch.chat_id)?;
            self.inner.save(batch).await
        }
        async fn for_chat(&self, chat_id: &ChatId) -> StorageResult<Vec<Batch>> {
            self.inner.for_chat(chat_id).await
        }
        async fn for_participant(&self, user_id: &str) -> StorageResult<Vec<Batch>> {
            self.inner.for_participant(user_id).await
        }
        async fn all(&self, page: Page) -> StorageResult<Vec<Batch>> {
            self.inner.all(page).await
        }
        async fn register_chat(&self, p: &Participants) -> StorageResult<bool> {
            self.inner.register_chat(p).await
        }
    }

    #[tokio::test]
    async fn write_conflicts_are_retried() {
        let repo = Arc::new(ConflictingRepo {
            inner: InMemoryBatchRepository::new(),
            conflicts: AtomicU32::new(2),
            writes: AtomicU32::new(0),
        });
        let store = store_over(repo.clone(), BatchingPolicy::default());

        let batch = store
            .append_or_create(&pair(), Message::new("u1", "eventually"))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(repo.writes.load(Ordering::SeqCst), 3);
        assert_eq!(repo.inner.batch_count(&pair().chat_id()).await, 1);
    }

    #[tokio::test]
    async fn persistent_conflict_surfaces() {
        let repo = Arc::new(ConflictingRepo {
            inner: InMemoryBatchRepository::new(),
            conflicts: AtomicU32::new(100),
            writes: AtomicU32::new(0),
        });
        let store = store_over(repo.clone(), BatchingPolicy::default());

        let err = store
            .append_or_create(&pair(), Message::new("u1", "never"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        // first attempt plus the configured retries
        assert_eq!(repo.writes.load(Ordering::SeqCst), 6);
    }

    struct StalledRepo;

    #[async_trait]
    impl BatchRepository for StalledRepo {
        async fn latest(&self, _: &ChatId) -> StorageResult<Option<Batch>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
        async fn create(&self, _: &Batch, _: &Participants, _: Option<Uuid>) -> StorageResult<()> {
            Ok(())
        }
        async fn save(&self, _: &Batch) -> StorageResult<()> {
            Ok(())
        }
        async fn for_chat(&self, _: &ChatId) -> StorageResult<Vec<Batch>> {
            Ok(vec![])
        }
        async fn for_participant(&self, _: &str) -> StorageResult<Vec<Batch>> {
            Ok(vec![])
        }
        async fn all(&self, _: Page) -> StorageResult<Vec<Batch>> {
            Ok(vec![])
        }
        async fn register_chat(&self, _: &Participants) -> StorageResult<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn stalled_storage_times_out() {
        let store = store_over(Arc::new(StalledRepo), BatchingPolicy::default());
        let err = store
            .append_or_create(&pair(), Message::new("u1", "stuck"))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn update_conversation_saves_only_changed_batches() {
        let (_, store) = memory_store();
        let start = Utc::now();
        store
            .append_or_create(&pair(), Message::at("u1", "old", start))
            .await
            .unwrap();
        store
            .append_or_create(&pair(), Message::at("u2", "new", start + ChronoDuration::hours(3)))
            .await
            .unwrap();

        let chat_id = pair().chat_id();
        let written = store
            .update_conversation(&chat_id, |b| {
                b.messages
                    .iter_mut()
                    .fold(false, |changed, m| m.mark_read_by("u2", start) || changed)
            })
            .await
            .unwrap();
        assert_eq!(written, 1);

        let batches = store.all_for_conversation(&chat_id).await.unwrap();
        assert!(batches[0].messages[0].read);
        assert!(!batches[1].messages[0].read);
    }

    #[tokio::test]
    async fn locks_are_released_after_use() {
        let (_, store) = memory_store();
        store
            .append_or_create(&pair(), Message::new("u1", "x"))
            .await
            .unwrap();
        assert!(store.locks.locks.is_empty());
    }
}
