//! Connection pool and transaction helper. Grounded in the teacher's
//! pragma-then-schema-application sequence, adapted to an async pool: the
//! store is always opened with WAL journalling and foreign-key enforcement
//! on, then migrated forward before anything else touches it.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use ep_types::config::StoreConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::StoreError;
use crate::migrations;

#[derive(Clone)]
pub struct StoreHandle {
    pool: SqlitePool,
}

impl StoreHandle {
    /// Open (creating if absent) the SQLite file at `config.path`, apply
    /// pending migrations, and return a ready handle.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_open)
            .min_connections(config.max_idle.min(config.max_open))
            .max_lifetime(Some(config.conn_max_lifetime))
            .connect_with(options)
            .await?;

        migrations::migrate_up(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory store for tests: same pragmas and migrations, no file.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        migrations::migrate_up(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Begin a transaction, run `f`, commit on `Ok`, roll back on `Err` (or
    /// if `f`'s future is dropped/panics while polling, since the
    /// transaction is rolled back on `Drop` unless explicitly committed).
    pub async fn with_transaction<F, Fut, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Transaction<'_, Sqlite>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut tx = self.pool.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                tx.rollback().await.ok();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_applies_migrations() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn with_transaction_rolls_back_on_error() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let result: Result<(), StoreError> = store
            .with_transaction(|tx| async move {
                sqlx::query(
                    "INSERT INTO messages (id, timestamp, status, created_at, updated_at) VALUES ('m1', '2024-01-01T00:00:00Z', 'received', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
                )
                .execute(&mut **tx)
                .await?;
                Err(StoreError::Migration("boom".into()))
            })
            .await;
        assert!(result.is_err());
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn with_transaction_commits_on_success() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        store
            .with_transaction(|tx| async move {
                sqlx::query(
                    "INSERT INTO messages (id, timestamp, status, created_at, updated_at) VALUES ('m1', '2024-01-01T00:00:00Z', 'received', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
                )
                .execute(&mut **tx)
                .await?;
                Ok(())
            })
            .await
            .unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 1);
    }
}
