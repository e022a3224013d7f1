//! Persisted entities and their status enums, per the §6 schema contract.
//! Enum variants serialize to the exact lower-snake-case literals the store
//! schema fixes as stable column values — renaming a variant here is a
//! migration-compatibility break, not a refactor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Received,
    Queued,
    Delivered,
    Deferred,
    Bounced,
    Frozen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Delivered,
    Deferred,
    Bounced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Defer,
    Bounce,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Main,
    Reject,
    Panic,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown log kind: {0}")]
pub struct UnknownLogKind(pub String);

impl LogKind {
    /// Fallible parse from a configuration string. `parse()` on the line
    /// parser itself is infallible once the caller holds a `LogKind` value.
    pub fn parse(s: &str) -> Result<Self, UnknownLogKind> {
        match s {
            "main" => Ok(Self::Main),
            "reject" => Ok(Self::Reject),
            "panic" => Ok(Self::Panic),
            other => Err(UnknownLogKind(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    Arrival,
    Delivery,
    Defer,
    Bounce,
    Reject,
    Panic,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Login,
    Logout,
    QueueDeliver,
    QueueFreeze,
    QueueThaw,
    QueueDelete,
    BulkDeliver,
    BulkFreeze,
    BulkThaw,
    BulkDelete,
    MessageView,
    MessageContent,
    NoteCreate,
    NoteUpdate,
    NoteDelete,
    TagCreate,
    TagDelete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub sender: Option<String>,
    pub size: Option<u64>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: i64,
    pub message_id: String,
    pub recipient: String,
    pub status: RecipientStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: i64,
    pub message_id: String,
    pub recipient: String,
    pub timestamp: DateTime<Utc>,
    pub host: Option<String>,
    pub ip_address: Option<String>,
    pub status: AttemptStatus,
    pub smtp_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub message_id: Option<String>,
    pub log_type: LogKind,
    pub event: LogEvent,
    pub host: Option<String>,
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    pub size: Option<u64>,
    pub status: Option<String>,
    pub error_code: Option<String>,
    pub error_text: Option<String>,
    pub raw_line: String,
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    /// Construct a fresh, not-yet-persisted entry. `id` and `created_at`
    /// are assigned by the store on insert.
    pub fn new_unpersisted(
        timestamp: DateTime<Utc>,
        log_type: LogKind,
        raw_line: String,
    ) -> Self {
        Self {
            id: 0,
            timestamp,
            message_id: None,
            log_type,
            event: LogEvent::Unknown,
            host: None,
            sender: None,
            recipients: Vec::new(),
            size: None,
            status: None,
            error_code: None,
            error_text: None,
            raw_line,
            created_at: timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub message_id: Option<String>,
    pub user_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub total_messages: i64,
    pub deferred_messages: i64,
    pub frozen_messages: i64,
    pub oldest_message_age: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNote {
    pub id: i64,
    pub message_id: String,
    pub user_id: Option<String>,
    pub note: String,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTag {
    pub id: i64,
    pub message_id: String,
    pub tag: String,
    pub color: Option<String>,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
