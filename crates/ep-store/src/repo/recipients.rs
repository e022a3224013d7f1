use chrono::{DateTime, Utc};
use ep_types::{Recipient, RecipientStatus};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::error::StoreError;

fn status_str(s: RecipientStatus) -> &'static str {
    match s {
        RecipientStatus::Pending => "pending",
        RecipientStatus::Delivered => "delivered",
        RecipientStatus::Deferred => "deferred",
        RecipientStatus::Bounced => "bounced",
    }
}

fn parse_status(s: &str) -> RecipientStatus {
    match s {
        "delivered" => RecipientStatus::Delivered,
        "deferred" => RecipientStatus::Deferred,
        "bounced" => RecipientStatus::Bounced,
        _ => RecipientStatus::Pending,
    }
}

fn row_to_recipient(row: &sqlx::sqlite::SqliteRow) -> Recipient {
    Recipient {
        id: row.get("id"),
        message_id: row.get("message_id"),
        recipient: row.get("recipient"),
        status: parse_status(row.get::<String, _>("status").as_str()),
        delivered_at: row.get("delivered_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub async fn list_by_message(
    pool: &SqlitePool,
    message_id: &str,
) -> Result<Vec<Recipient>, StoreError> {
    let rows = sqlx::query("SELECT * FROM recipients WHERE message_id = ? ORDER BY id")
        .bind(message_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(row_to_recipient).collect())
}

/// Insert-or-update keyed on the (message_id, recipient) uniqueness
/// invariant — the Correlator must never create duplicates when the same
/// address reappears across events.
pub async fn upsert(
    tx: &mut Transaction<'_, Sqlite>,
    message_id: &str,
    address: &str,
    status: RecipientStatus,
    delivered_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO recipients (message_id, recipient, status, delivered_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(message_id, recipient) DO UPDATE SET
            status = excluded.status,
            delivered_at = excluded.delivered_at,
            updated_at = excluded.updated_at",
    )
    .bind(message_id)
    .bind(address)
    .bind(status_str(status))
    .bind(delivered_at)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Orphan sweep step 1: recipients whose message_id has no matching row.
pub async fn delete_orphans(pool: &SqlitePool) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "DELETE FROM recipients WHERE message_id NOT IN (SELECT id FROM messages)",
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
    async fn upsert_same_address_does_not_duplicate() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let now = Utc::now();
        let mut tx = store.pool().begin().await.unwrap();
        crate::repo::messages::insert(&mut tx, "m1", now, None, None, ep_types::MessageStatus::Received, now)
            .await
            .unwrap();
        upsert(&mut tx, "m1", "a@example.com", RecipientStatus::Pending, None, now)
            .await
            .unwrap();
        upsert(&mut tx, "m1", "a@example.com", RecipientStatus::Delivered, Some(now), now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let recipients = list_by_message(store.pool(), "m1").await.unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].status, RecipientStatus::Delivered);
    }
}
