//! Trace Builder (C6) DTOs: the assembled per-message timeline, per-recipient
//! status, threaded view, and the lighter-weight correlation snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{DeliveryAttempt, Message, Recipient, RecipientStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineSource {
    Log,
    Queue,
    Audit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub recipient: Option<String>,
    pub host: Option<String>,
    pub smtp_code: Option<String>,
    pub error_text: Option<String>,
    pub description: String,
    pub source: TimelineSource,
    pub source_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerRecipientStatus {
    pub address: String,
    pub status: RecipientStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub attempt_count: u64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_smtp_code: Option<String>,
    pub last_error_text: Option<String>,
    /// Estimated only; see `TraceSummary` doc on retry hints.
    pub next_estimated_retry_at: Option<DateTime<Utc>>,
    pub attempts: Vec<DeliveryAttempt>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub total_recipients: u64,
    pub delivered_count: u64,
    pub deferred_count: u64,
    pub bounced_count: u64,
    pub pending_count: u64,
    pub total_attempts: u64,
    pub first_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Mean of (delivered_at - message.timestamp) across delivered recipients, in seconds.
    pub average_delivery_time_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeliveryTrace {
    pub message: Message,
    pub recipients: Vec<PerRecipientStatus>,
    pub timeline: Vec<TimelineEvent>,
    pub summary: TraceSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadKind {
    Recipient,
    Host,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Error,
    Success,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub key: String,
    pub kind: ThreadKind,
    pub summary: String,
    pub status: ThreadStatus,
    pub events: Vec<TimelineEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadedTimelineView {
    pub message_id: String,
    pub threads: Vec<Thread>,
}

/// The lighter-weight snapshot returned by `get_message_correlation`: current
/// rows without the merged timeline or threading `get_message_delivery_trace`
/// builds on top of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCorrelation {
    pub message: Message,
    pub recipients: Vec<Recipient>,
    pub attempts: Vec<DeliveryAttempt>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupResult {
    pub rows_deleted_per_table: Vec<(String, u64)>,
    pub orphan_recipients_removed: u64,
    pub orphan_attempts_removed: u64,
    pub orphan_messages_removed: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub files_processed: u64,
    pub lines_read: u64,
    pub lines_parsed: u64,
    pub entries_stored: u64,
    pub batches_processed: u64,
    pub errors: u64,
    pub truncated_lines: u64,
    pub dropped_lines: u64,
    pub current_file: Option<String>,
    pub lines_per_second: f64,
    pub entries_per_second: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub correlation_last_run: Option<DateTime<Utc>>,
    pub correlation_next_run: Option<DateTime<Utc>>,
    pub cleanup_last_run: Option<DateTime<Utc>>,
    pub cleanup_next_run: Option<DateTime<Utc>>,
    pub metrics_last_run: Option<DateTime<Utc>>,
    pub metrics_next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub ingest: IngestStats,
    pub scheduler: SchedulerStatus,
}
