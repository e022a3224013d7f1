use chrono::{DateTime, Utc};
use ep_types::{AuditAction, AuditLog};
use sqlx::{Row, SqlitePool};

use crate::error::StoreError;

fn action_str(a: AuditAction) -> &'static str {
    match a {
        AuditAction::Login => "login",
        AuditAction::Logout => "logout",
        AuditAction::QueueDeliver => "queue_deliver",
        AuditAction::QueueFreeze => "queue_freeze",
        AuditAction::QueueThaw => "queue_thaw",
        AuditAction::QueueDelete => "queue_delete",
        AuditAction::BulkDeliver => "bulk_deliver",
        AuditAction::BulkFreeze => "bulk_freeze",
        AuditAction::BulkThaw => "bulk_thaw",
        AuditAction::BulkDelete => "bulk_delete",
        AuditAction::MessageView => "message_view",
        AuditAction::MessageContent => "message_content",
        AuditAction::NoteCreate => "note_create",
        AuditAction::NoteUpdate => "note_update",
        AuditAction::NoteDelete => "note_delete",
        AuditAction::TagCreate => "tag_create",
        AuditAction::TagDelete => "tag_delete",
    }
}

fn parse_action(s: &str) -> Result<AuditAction, StoreError> {
    match s {
        "login" => Ok(AuditAction::Login),
        "logout" => Ok(AuditAction::Logout),
        "queue_deliver" => Ok(AuditAction::QueueDeliver),
        "queue_freeze" => Ok(AuditAction::QueueFreeze),
        "queue_thaw" => Ok(AuditAction::QueueThaw),
        "queue_delete" => Ok(AuditAction::QueueDelete),
        "bulk_deliver" => Ok(AuditAction::BulkDeliver),
        "bulk_freeze" => Ok(AuditAction::BulkFreeze),
        "bulk_thaw" => Ok(AuditAction::BulkThaw),
        "bulk_delete" => Ok(AuditAction::BulkDelete),
        "message_view" => Ok(AuditAction::MessageView),
        "message_content" => Ok(AuditAction::MessageContent),
        "note_create" => Ok(AuditAction::NoteCreate),
        "note_update" => Ok(AuditAction::NoteUpdate),
        "note_delete" => Ok(AuditAction::NoteDelete),
        "tag_create" => Ok(AuditAction::TagCreate),
        "tag_delete" => Ok(AuditAction::TagDelete),
        other => Err(StoreError::Invalid {
            field: "audit_log.action",
            reason: format!("unrecognised action: {other}"),
        }),
    }
}

fn row_to_audit(row: &sqlx::sqlite::SqliteRow) -> Result<AuditLog, StoreError> {
    Ok(AuditLog {
        id: row.get("id"),
        timestamp: row.get("timestamp"),
        action: parse_action(row.get::<String, _>("action").as_str())?,
        message_id: row.get("message_id"),
        user_id: row.get("user_id"),
        details: row
            .get::<Option<String>, _>("details")
            .and_then(|s| serde_json::from_str(&s).ok()),
        ip_address: row.get("ip_address"),
        created_at: row.get("created_at"),
    })
}

pub async fn insert(
    pool: &SqlitePool,
    timestamp: DateTime<Utc>,
    action: AuditAction,
    message_id: Option<&str>,
    user_id: Option<&str>,
    details: Option<&serde_json::Value>,
    ip_address: Option<&str>,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        "INSERT INTO audit_log (timestamp, action, message_id, user_id, details, ip_address, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(timestamp)
    .bind(action_str(action))
    .bind(message_id)
    .bind(user_id)
    .bind(details.map(|v| v.to_string()))
    .bind(ip_address)
    .bind(timestamp)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn list_by_message(
    pool: &SqlitePool,
    message_id: &str,
) -> Result<Vec<AuditLog>, StoreError> {
    let rows = sqlx::query("SELECT * FROM audit_log WHERE message_id = ? ORDER BY timestamp, id")
        .bind(message_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_audit).collect()
}
