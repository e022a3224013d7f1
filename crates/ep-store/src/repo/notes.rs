//! Repository for `message_notes`. Out-of-core per the purpose statement —
//! note-taking workflows belong to the HTTP layer — but the row shape and
//! CRUD surface are part of the persistence contract so that layer has
//! somewhere consistent to call into.

use chrono::{DateTime, Utc};
use ep_types::MessageNote;
use sqlx::{Row, SqlitePool};

use crate::error::StoreError;

fn row_to_note(row: &sqlx::sqlite::SqliteRow) -> MessageNote {
    MessageNote {
        id: row.get("id"),
        message_id: row.get("message_id"),
        user_id: row.get("user_id"),
        note: row.get("note"),
        is_public: row.get::<i64, _>("is_public") != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub async fn insert(
    pool: &SqlitePool,
    message_id: &str,
    user_id: Option<&str>,
    note: &str,
    is_public: bool,
    now: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        "INSERT INTO message_notes (message_id, user_id, note, is_public, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(message_id)
    .bind(user_id)
    .bind(note)
    .bind(is_public)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn list_by_message(
    pool: &SqlitePool,
    message_id: &str,
) -> Result<Vec<MessageNote>, StoreError> {
    let rows = sqlx::query("SELECT * FROM message_notes WHERE message_id = ? ORDER BY created_at")
        .bind(message_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(row_to_note).collect())
}

pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM message_notes WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
