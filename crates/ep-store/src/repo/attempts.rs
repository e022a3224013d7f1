use chrono::{DateTime, Utc};
use ep_types::{AttemptStatus, DeliveryAttempt};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::error::StoreError;

fn status_str(s: AttemptStatus) -> &'static str {
    match s {
        AttemptStatus::Success => "success",
        AttemptStatus::Defer => "defer",
        AttemptStatus::Bounce => "bounce",
        AttemptStatus::Timeout => "timeout",
    }
}

fn parse_status(s: &str) -> AttemptStatus {
    match s {
        "success" => AttemptStatus::Success,
        "bounce" => AttemptStatus::Bounce,
        "timeout" => AttemptStatus::Timeout,
        _ => AttemptStatus::Defer,
    }
}

fn row_to_attempt(row: &sqlx::sqlite::SqliteRow) -> DeliveryAttempt {
    DeliveryAttempt {
        id: row.get("id"),
        message_id: row.get("message_id"),
        recipient: row.get("recipient"),
        timestamp: row.get("timestamp"),
        host: row.get("host"),
        ip_address: row.get("ip_address"),
        status: parse_status(row.get::<String, _>("status").as_str()),
        smtp_code: row.get("smtp_code"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
    }
}

pub async fn list_by_message(
    pool: &SqlitePool,
    message_id: &str,
) -> Result<Vec<DeliveryAttempt>, StoreError> {
    let rows = sqlx::query(
        "SELECT * FROM delivery_attempts WHERE message_id = ? ORDER BY timestamp, id",
    )
    .bind(message_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_attempt).collect())
}

/// Idempotent insert: a `(message_id, recipient, timestamp, status)` tuple
/// is inserted at most once, so re-running the Correlator on an unchanged
/// window never mutates the attempt history.
#[allow(clippy::too_many_arguments)]
pub async fn insert_if_not_exists(
    tx: &mut Transaction<'_, Sqlite>,
    message_id: &str,
    recipient: &str,
    timestamp: DateTime<Utc>,
    host: Option<&str>,
    ip_address: Option<&str>,
    status: AttemptStatus,
    smtp_code: Option<&str>,
    error_message: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let exists: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM delivery_attempts WHERE message_id = ? AND recipient = ? AND timestamp = ? AND status = ?",
    )
    .bind(message_id)
    .bind(recipient)
    .bind(timestamp)
    .bind(status_str(status))
    .fetch_optional(&mut **tx)
    .await?;
    if exists.is_some() {
        return Ok(false);
    }

    sqlx::query(
        "INSERT INTO delivery_attempts (message_id, recipient, timestamp, host, ip_address, status, smtp_code, error_message, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(message_id)
    .bind(recipient)
    .bind(timestamp)
    .bind(host)
    .bind(ip_address)
    .bind(status_str(status))
    .bind(smtp_code)
    .bind(error_message)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(true)
}

/// Orphan sweep step 2: attempts whose message_id has no matching row.
pub async fn delete_orphans(pool: &SqlitePool) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "DELETE FROM delivery_attempts WHERE message_id NOT IN (SELECT id FROM messages)",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreHandle;

    #[tokio::test]
    async fn reinserting_identical_tuple_is_a_no_op() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let now = Utc::now();
        let mut tx = store.pool().begin().await.unwrap();
        crate::repo::messages::insert(&mut tx, "m1", now, None, None, ep_types::MessageStatus::Received, now)
            .await
            .unwrap();
        let first = insert_if_not_exists(
            &mut tx, "m1", "a@example.com", now, Some("mx"), None, AttemptStatus::Success, None, None, now,
        )
        .await
        .unwrap();
        let second = insert_if_not_exists(
            &mut tx, "m1", "a@example.com", now, Some("mx"), None, AttemptStatus::Success, None, None, now,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert!(first);
        assert!(!second);
        let attempts = list_by_message(store.pool(), "m1").await.unwrap();
        assert_eq!(attempts.len(), 1);
    }
}
