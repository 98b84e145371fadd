//! PostgreSQL batch storage (tokio-postgres over a deadpool pool).
//!
//! Schema: `migrations/0001_message_batches.sql`. Messages live in a JSONB
//! array on the batch row; `chat_participants` is the participant index.

use super::{BatchRepository, Page, StorageError, StorageResult};
use crate::models::{Batch, ChatId, Message, Participants};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::types::Json;
use tokio_postgres::Row;
use uuid::Uuid;

const BATCH_COLUMNS: &str = "id, chat_id, messages, start_time, end_time, version";
const INSERT_PARTICIPANT: &str =
    "INSERT INTO chat_participants (user_id, chat_id) VALUES ($1, $2) ON CONFLICT DO NOTHING";

#[derive(Clone)]
pub struct PgBatchRepository {
    pool: Pool,
}

impl PgBatchRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn batch_from_row(row: &Row) -> StorageResult<Batch> {
    let Json(messages): Json<Vec<Message>> = row.try_get("messages")?;
    Ok(Batch {
        id: row.try_get("id")?,
        chat_id: ChatId::from_stored(row.try_get("chat_id")?),
        messages,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        version: row.try_get("version")?,
    })
}

fn batches_from_rows(rows: &[Row]) -> StorageResult<Vec<Batch>> {
    rows.iter().map(batch_from_row).collect()
}

#[async_trait]
impl BatchRepository for PgBatchRepository {
    async fn latest(&self, chat_id: &ChatId) -> StorageResult<Option<Batch>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {BATCH_COLUMNS} FROM message_batches \
                     WHERE chat_id = $1 ORDER BY end_time DESC, seq DESC LIMIT 1"
                ),
                &[&chat_id.as_str()],
            )
            .await?;
        row.as_ref().map(batch_from_row).transpose()
    }

    async fn create(
        &self,
        batch: &Batch,
        participants: &Participants,
        expected_latest: Option<Uuid>,
    ) -> StorageResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // Serializes creators of the same chat across instances until commit.
        tx.execute(
            "SELECT pg_advisory_xact_lock(hashtext($1))",
            &[&batch.chat_id.as_str()],
        )
        .await?;

        let current: Option<Uuid> = tx
            .query_opt(
                "SELECT id FROM message_batches WHERE chat_id = $1 \
                 ORDER BY end_time DESC, seq DESC LIMIT 1",
                &[&batch.chat_id.as_str()],
            )
            .await?
            .map(|row| row.get(0));

        if current != expected_latest {
            tracing::debug!(
                chat_id = %batch.chat_id,
                ?current,
                ?expected_latest,
                "batch create lost race"
            );
            return Err(StorageError::Conflict {
                chat_id: batch.chat_id.to_string(),
            });
        }

        tx.execute(
            r#"
            INSERT INTO message_batches
                (id, chat_id, messages, message_count, start_time, end_time, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
            &[
                &batch.id,
                &batch.chat_id.as_str(),
                &Json(&batch.messages),
                &(batch.len() as i32),
                &batch.start_time,
                &batch.end_time,
                &batch.version,
            ],
        )
        .await?;

        for user_id in participants.ids() {
            tx.execute(
                INSERT_PARTICIPANT,
                &[&user_id, &batch.chat_id.as_str()],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save(&self, batch: &Batch) -> StorageResult<()> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE message_batches
                SET messages = $2, message_count = $3, end_time = $4, version = version + 1
                WHERE id = $1 AND version = $5
                "#,
                &[
                    &batch.id,
                    &Json(&batch.messages),
                    &(batch.len() as i32),
                    &batch.end_time,
                    &batch.version,
                ],
            )
            .await?;

        if updated == 0 {
            return Err(StorageError::Conflict {
                chat_id: batch.chat_id.to_string(),
            });
        }
        Ok(())
    }

    async fn for_chat(&self, chat_id: &ChatId) -> StorageResult<Vec<Batch>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {BATCH_COLUMNS} FROM message_batches \
                     WHERE chat_id = $1 ORDER BY start_time ASC, seq ASC"
                ),
                &[&chat_id.as_str()],
            )
            .await?;
        batches_from_rows(&rows)
    }

    async fn for_participant(&self, user_id: &str) -> StorageResult<Vec<Batch>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT b.id, b.chat_id, b.messages, b.start_time, b.end_time, b.version
                FROM message_batches b
                JOIN chat_participants p ON p.chat_id = b.chat_id
                WHERE p.user_id = $1
                ORDER BY b.start_time DESC, b.seq DESC
                "#,
                &[&user_id],
            )
            .await?;
        batches_from_rows(&rows)
    }

    async fn all(&self, page: Page) -> StorageResult<Vec<Batch>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                WITH chats AS (
                    SELECT DISTINCT chat_id COLLATE "C" AS chat_id
                    FROM message_batches
                    ORDER BY 1
                    OFFSET $1 LIMIT $2
                )
                SELECT b.id, b.chat_id, b.messages, b.start_time, b.end_time, b.version
                FROM message_batches b
                JOIN chats c ON c.chat_id = b.chat_id
                ORDER BY b.chat_id COLLATE "C", b.start_time ASC, b.seq ASC
                "#,
                &[&(page.offset as i64), &(page.limit as i64)],
            )
            .await?;
        batches_from_rows(&rows)
    }

    async fn register_chat(&self, participants: &Participants) -> StorageResult<bool> {
        let chat_id = participants.chat_id();
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let mut inserted = 0;
        for user_id in participants.ids() {
            inserted += tx
                .execute(
                    INSERT_PARTICIPANT,
                    &[&user_id, &chat_id.as_str()],
                )
                .await?;
        }

        tx.commit().await?;
        Ok(inserted > 0)
    }
}
