//! Repository for `message_tags`. Same out-of-core status as `notes`; the
//! `(message_id, tag)` uniqueness invariant is enforced by the schema and
//! surfaced here as a `StoreError::AlreadyExists`.

use chrono::{DateTime, Utc};
use ep_types::MessageTag;
use sqlx::{Row, SqlitePool};

use crate::error::StoreError;

fn row_to_tag(row: &sqlx::sqlite::SqliteRow) -> MessageTag {
    MessageTag {
        id: row.get("id"),
        message_id: row.get("message_id"),
        tag: row.get("tag"),
        color: row.get("color"),
        user_id: row.get("user_id"),
        created_at: row.get("created_at"),
    }
}

pub async fn insert(
    pool: &SqlitePool,
    message_id: &str,
    tag: &str,
    color: Option<&str>,
    user_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        "INSERT INTO message_tags (message_id, tag, color, user_id, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(message_id)
    .bind(tag)
    .bind(color)
    .bind(user_id)
    .bind(now)
    .execute(pool)
    .await;

    match result {
        Ok(r) => Ok(r.last_insert_rowid()),
        Err(e) => {
            let wrapped = StoreError::Db(e);
            if wrapped.is_unique_violation() {
                Err(StoreError::AlreadyExists {
                    entity: "tag",
                    key: format!("{message_id}:{tag}"),
                })
            } else {
                Err(wrapped)
            }
        }
    }
}

pub async fn list_by_message(
    pool: &SqlitePool,
    message_id: &str,
) -> Result<Vec<MessageTag>, StoreError> {
    let rows = sqlx::query("SELECT * FROM message_tags WHERE message_id = ? ORDER BY created_at")
        .bind(message_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(row_to_tag).collect())
}

pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM message_tags WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
