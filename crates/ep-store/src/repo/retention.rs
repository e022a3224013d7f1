//! Generic time-based batched deletion shared by every retention-managed
//! table. Table and column names here are static, code-controlled
//! identifiers (never user input), so building the SQL text with `format!`
//! does not violate the "never splice user input into SQL" rule that binds
//! the search predicate compiler.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::StoreError;

pub async fn count_older_than(
    pool: &SqlitePool,
    table: &str,
    time_col: &str,
    cutoff: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE {time_col} < ?");
    let row: (i64,) = sqlx::query_as(&sql).bind(cutoff).fetch_one(pool).await?;
    Ok(row.0.max(0) as u64)
}

/// Delete up to `batch_size` rows older than `cutoff`. Returns the number
/// of rows actually deleted (0 means nothing left to delete).
pub async fn delete_batch(
    pool: &SqlitePool,
    table: &str,
    time_col: &str,
    cutoff: DateTime<Utc>,
    batch_size: u32,
) -> Result<u64, StoreError> {
    let sql = format!(
        "DELETE FROM {table} WHERE rowid IN (SELECT rowid FROM {table} WHERE {time_col} < ? LIMIT ?)"
    );
    let result = sqlx::query(&sql)
        .bind(cutoff)
        .bind(batch_size)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// `sessions` has the extra `expires_at < now` condition layered on top of
/// the standard `created_at` cutoff (§4.7).
pub async fn delete_expired_sessions_batch(
    pool: &SqlitePool,
    created_cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
    batch_size: u32,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "DELETE FROM sessions WHERE rowid IN (
            SELECT rowid FROM sessions WHERE created_at < ? OR expires_at < ? LIMIT ?
        )",
    )
    .bind(created_cutoff)
    .bind(now)
    .bind(batch_size)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn vacuum_and_analyze(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query("PRAGMA incremental_vacuum").execute(pool).await?;
    sqlx::query("ANALYZE").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreHandle;
    use chrono::Duration;
    use ep_types::LogEntry;

    #[tokio::test]
    async fn delete_batch_removes_only_rows_older_than_cutoff() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let now = Utc::now();
        let mut tx = store.pool().begin().await.unwrap();
        let entries = vec![
            LogEntry::new_unpersisted(now - Duration::days(100), ep_types::LogKind::Main, "old".into()),
            LogEntry::new_unpersisted(now, ep_types::LogKind::Main, "new".into()),
        ];
        crate::repo::log_entries::insert_batch(&mut tx, &entries, false).await.unwrap();
        tx.commit().await.unwrap();

        let cutoff = now - Duration::days(90);
        let count = count_older_than(store.pool(), "log_entries", "timestamp", cutoff).await.unwrap();
        assert_eq!(count, 1);
        let deleted = delete_batch(store.pool(), "log_entries", "timestamp", cutoff, 1000).await.unwrap();
        assert_eq!(deleted, 1);
        let remaining = count_older_than(store.pool(), "log_entries", "timestamp", now + Duration::days(1)).await.unwrap();
        assert_eq!(remaining, 1);
    }
}
