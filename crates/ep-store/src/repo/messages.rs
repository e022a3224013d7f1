use chrono::{DateTime, Utc};
use ep_types::{Message, MessageStatus};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::error::StoreError;

fn status_str(s: MessageStatus) -> &'static str {
    match s {
        MessageStatus::Received => "received",
        MessageStatus::Queued => "queued",
        MessageStatus::Delivered => "delivered",
        MessageStatus::Deferred => "deferred",
        MessageStatus::Bounced => "bounced",
        MessageStatus::Frozen => "frozen",
    }
}

fn parse_status(s: &str) -> MessageStatus {
    match s {
        "queued" => MessageStatus::Queued,
        "delivered" => MessageStatus::Delivered,
        "deferred" => MessageStatus::Deferred,
        "bounced" => MessageStatus::Bounced,
        "frozen" => MessageStatus::Frozen,
        _ => MessageStatus::Received,
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Message {
    Message {
        id: row.get("id"),
        timestamp: row.get("timestamp"),
        sender: row.get("sender"),
        size: row.get::<Option<i64>, _>("size").map(|v| v as u64),
        status: parse_status(row.get::<String, _>("status").as_str()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Message>, StoreError> {
    let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(row_to_message))
}

/// Insert a brand new message row (Correlator's "first sighting" path).
pub async fn insert(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
    timestamp: DateTime<Utc>,
    sender: Option<&str>,
    size: Option<u64>,
    status: MessageStatus,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO messages (id, timestamp, sender, size, status, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(timestamp)
    .bind(sender)
    .bind(size.map(|v| v as i64))
    .bind(status_str(status))
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Update the mutable fields the Correlator may refresh: earliest timestamp,
/// sender/size (only filled if previously empty, caller decides), and status.
pub async fn update(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
    timestamp: DateTime<Utc>,
    sender: Option<&str>,
    size: Option<u64>,
    status: MessageStatus,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE messages SET timestamp = ?, sender = ?, size = ?, status = ?, updated_at = ? WHERE id = ?",
    )
    .bind(timestamp)
    .bind(sender)
    .bind(size.map(|v| v as i64))
    .bind(status_str(status))
    .bind(now)
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn list_ids_with_log_entries_in_window(
    pool: &SqlitePool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<String>, StoreError> {
    let rows = sqlx::query(
        "SELECT DISTINCT message_id FROM log_entries
         WHERE message_id IS NOT NULL AND timestamp >= ? AND timestamp <= ?",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.get("message_id")).collect())
}

/// Orphan sweep step 3: messages older than `cutoff` with no associated
/// log_entries rows.
pub async fn delete_orphans_older_than(
    pool: &SqlitePool,
    cutoff: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "DELETE FROM messages WHERE created_at < ?
         AND id NOT IN (SELECT DISTINCT message_id FROM log_entries WHERE message_id IS NOT NULL)",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreHandle;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let now = Utc::now();
        let mut tx = store.pool().begin().await.unwrap();
        insert(&mut tx, "m1", now, Some("a@example.com"), Some(100), MessageStatus::Received, now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let msg = get_by_id(store.pool(), "m1").await.unwrap().unwrap();
        assert_eq!(msg.sender.as_deref(), Some("a@example.com"));
        assert_eq!(msg.size, Some(100));
        assert_eq!(msg.status, MessageStatus::Received);
    }
}
