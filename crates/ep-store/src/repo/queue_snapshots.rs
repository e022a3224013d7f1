use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::StoreError;

pub async fn insert(
    pool: &SqlitePool,
    timestamp: DateTime<Utc>,
    total: i64,
    deferred: i64,
    frozen: i64,
    oldest_age_secs: Option<i64>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO queue_snapshots (timestamp, total_messages, deferred_messages, frozen_messages, oldest_message_age, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(timestamp)
    .bind(total)
    .bind(deferred)
    .bind(frozen)
    .bind(oldest_age_secs)
    .bind(timestamp)
    .execute(pool)
    .await?;
    Ok(())
}
