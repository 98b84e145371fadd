use crate::storage::{StorageError, StorageResult};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use std::time::Duration;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::info;

// Embedded at compile time; every statement is idempotent.
const MIG_0001: &str = include_str!("../migrations/0001_message_batches.sql");

/// Build the pool, verify one connection and apply migrations.
pub async fn init_pool(
    database_url: &str,
    max_connections: usize,
    connect_timeout: Duration,
) -> StorageResult<Pool> {
    let pg_config: PgConfig = database_url.parse()?;

    let mgr = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(mgr)
        .max_size(max_connections)
        .build()
        .map_err(|e| StorageError::Backend(format!("pool build: {e}")))?;

    match tokio::time::timeout(connect_timeout, run_migrations(&pool)).await {
        Ok(result) => result?,
        Err(_) => return Err(StorageError::Timeout(connect_timeout)),
    }

    info!(max_connections, "database pool ready");
    Ok(pool)
}

pub async fn run_migrations(pool: &Pool) -> StorageResult<()> {
    let client = pool.get().await?;
    for (i, sql) in [MIG_0001].into_iter().enumerate() {
        client.batch_execute(sql).await?;
        info!(migration = i + 1, "migration applied");
    }
    Ok(())
}
