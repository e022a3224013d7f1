//! Trace Builder (C6): assembles the merged timeline, per-recipient status,
//! summary statistics, and threaded view for a single message.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ep_store::StoreHandle;
use ep_types::{
    AttemptStatus, AuditAction, AuditLog, DeliveryAttempt, LogEntry, LogEvent, MessageCorrelation,
    MessageDeliveryTrace, PerRecipientStatus, RecipientStatus, Thread, ThreadKind, ThreadStatus,
    ThreadedTimelineView, TimelineEvent, TimelineSource, TraceSummary,
};

use crate::error::EngineError;

fn retry_step() -> ChronoDuration {
    ChronoDuration::minutes(30)
}

/// `None` when the message doesn't exist, rather than an error — callers
/// use this to check correlation status, not to assert existence.
pub async fn get_message_correlation(
    store: &StoreHandle,
    message_id: &str,
) -> Result<Option<MessageCorrelation>, EngineError> {
    let Some(message) = ep_store::repo::messages::get_by_id(store.pool(), message_id).await? else {
        return Ok(None);
    };
    let recipients = ep_store::repo::recipients::list_by_message(store.pool(), message_id).await?;
    let attempts = ep_store::repo::attempts::list_by_message(store.pool(), message_id).await?;
    Ok(Some(MessageCorrelation { message, recipients, attempts }))
}

pub async fn build_delivery_trace(
    store: &StoreHandle,
    message_id: &str,
) -> Result<MessageDeliveryTrace, EngineError> {
    let message = ep_store::repo::messages::get_by_id(store.pool(), message_id)
        .await?
        .ok_or_else(|| EngineError::MessageNotFound(message_id.to_owned()))?;
    let recipient_rows = ep_store::repo::recipients::list_by_message(store.pool(), message_id).await?;
    let attempt_rows = ep_store::repo::attempts::list_by_message(store.pool(), message_id).await?;
    let log_rows = ep_store::repo::log_entries::list_by_message(store.pool(), message_id).await?;
    let audit_rows = ep_store::repo::audit::list_by_message(store.pool(), message_id).await?;

    let timeline = merge_timeline(&log_rows, &attempt_rows, &audit_rows);

    let mut by_recipient: HashMap<&str, Vec<&DeliveryAttempt>> = HashMap::new();
    for attempt in &attempt_rows {
        by_recipient.entry(attempt.recipient.as_str()).or_default().push(attempt);
    }

    let recipients = recipient_rows
        .iter()
        .map(|r| {
            let attempts: Vec<DeliveryAttempt> = by_recipient
                .get(r.recipient.as_str())
                .map(|v| v.iter().map(|a| (*a).clone()).collect())
                .unwrap_or_default();
            let last = attempts.last();
            let next_estimated_retry_at = if r.status == RecipientStatus::Deferred {
                last.map(|a| a.timestamp + retry_step() * i32::try_from(attempts.len()).unwrap_or(i32::MAX))
            } else {
                None
            };
            PerRecipientStatus {
                address: r.recipient.clone(),
                status: r.status,
                delivered_at: r.delivered_at,
                attempt_count: attempts.len() as u64,
                last_attempt_at: last.map(|a| a.timestamp),
                last_smtp_code: last.and_then(|a| a.smtp_code.clone()),
                last_error_text: last.and_then(|a| a.error_message.clone()),
                next_estimated_retry_at,
                attempts,
            }
        })
        .collect();

    let summary = build_summary(&message, &recipient_rows, &attempt_rows);

    Ok(MessageDeliveryTrace { message, recipients, timeline, summary })
}

pub async fn build_threaded_view(
    store: &StoreHandle,
    message_id: &str,
) -> Result<ThreadedTimelineView, EngineError> {
    let log_rows = ep_store::repo::log_entries::list_by_message(store.pool(), message_id).await?;
    let attempt_rows = ep_store::repo::attempts::list_by_message(store.pool(), message_id).await?;
    let audit_rows = ep_store::repo::audit::list_by_message(store.pool(), message_id).await?;
    let timeline = merge_timeline(&log_rows, &attempt_rows, &audit_rows);

    let mut index: HashMap<(ThreadKind, String), usize> = HashMap::new();
    let mut threads: Vec<Thread> = Vec::new();
    for event in timeline {
        let (kind, key) = classify_thread(&event);
        let idx = *index.entry((kind, key.clone())).or_insert_with(|| {
            threads.push(Thread { key, kind, summary: String::new(), status: ThreadStatus::Info, events: Vec::new() });
            threads.len() - 1
        });
        threads[idx].events.push(event);
    }
    for thread in &mut threads {
        thread.status = derive_thread_status(&thread.events);
        thread.summary = format!("{} event(s)", thread.events.len());
    }

    Ok(ThreadedTimelineView { message_id: message_id.to_owned(), threads })
}

fn classify_thread(event: &TimelineEvent) -> (ThreadKind, String) {
    if let Some(recipient) = &event.recipient {
        (ThreadKind::Recipient, recipient.clone())
    } else if let Some(host) = &event.host {
        (ThreadKind::Host, host.clone())
    } else {
        (ThreadKind::System, "system".to_owned())
    }
}

fn derive_thread_status(events: &[TimelineEvent]) -> ThreadStatus {
    let has = |needle: &str| events.iter().any(|e| e.event_type.contains(needle));
    if has("bounce") || has("reject") {
        ThreadStatus::Error
    } else if has("delivery") {
        ThreadStatus::Success
    } else if has("defer") {
        ThreadStatus::Warning
    } else {
        ThreadStatus::Info
    }
}

/// Union of log entries, delivery attempts, and audit rows into one
/// timeline, stable-sorted by timestamp only: concatenating the three
/// sources in {log, queue, audit} order first means a stable sort on
/// timestamp alone reproduces the required tie-break order for free.
///
/// The correlator derives one `DeliveryAttempt` per delivery/defer/bounce
/// log entry, so an attempt row is dropped here whenever a log entry
/// already covers the same `(timestamp, recipient, outcome)` — otherwise
/// every delivery outcome would appear twice in the merged timeline.
fn merge_timeline(
    log_rows: &[LogEntry],
    attempt_rows: &[DeliveryAttempt],
    audit_rows: &[AuditLog],
) -> Vec<TimelineEvent> {
    let log_outcomes: std::collections::HashSet<(DateTime<Utc>, String, &'static str)> = log_rows
        .iter()
        .filter_map(|entry| {
            let recipient = entry.recipients.first()?;
            let category = log_outcome_category(entry.event)?;
            Some((entry.timestamp, recipient.clone(), category))
        })
        .collect();

    let mut events: Vec<TimelineEvent> = Vec::with_capacity(log_rows.len() + attempt_rows.len() + audit_rows.len());
    events.extend(log_rows.iter().map(log_event));
    events.extend(attempt_rows.iter().filter(|attempt| {
        let Some(category) = attempt_outcome_category(attempt.status) else {
            return true;
        };
        !log_outcomes.contains(&(attempt.timestamp, attempt.recipient.clone(), category))
    }).map(attempt_event));
    events.extend(audit_rows.iter().map(audit_event));
    events.sort_by_key(|e| e.timestamp);
    events
}

/// The log-entry outcome category a delivery attempt can duplicate, or
/// `None` for event kinds that never produce a `DeliveryAttempt` row
/// (`arrival`/`unknown`) or have no reconstruction counterpart.
fn log_outcome_category(event: LogEvent) -> Option<&'static str> {
    match event {
        LogEvent::Delivery => Some("delivery"),
        LogEvent::Defer => Some("defer"),
        LogEvent::Bounce => Some("bounce"),
        LogEvent::Arrival | LogEvent::Reject | LogEvent::Panic | LogEvent::Unknown => None,
    }
}

/// Same categorisation from the `DeliveryAttempt` side. `Timeout` has no
/// direct log-event counterpart (it stands in for reject/panic entries),
/// so it's never deduped against a log row.
fn attempt_outcome_category(status: AttemptStatus) -> Option<&'static str> {
    match status {
        AttemptStatus::Success => Some("delivery"),
        AttemptStatus::Defer => Some("defer"),
        AttemptStatus::Bounce => Some("bounce"),
        AttemptStatus::Timeout => None,
    }
}

fn event_type_str(event: LogEvent) -> &'static str {
    match event {
        LogEvent::Arrival => "arrival",
        LogEvent::Delivery => "delivery",
        LogEvent::Defer => "defer",
        LogEvent::Bounce => "bounce",
        LogEvent::Reject => "reject",
        LogEvent::Panic => "panic",
        LogEvent::Unknown => "unknown",
    }
}

fn log_event(entry: &LogEntry) -> TimelineEvent {
    let description = match entry.event {
        LogEvent::Arrival => format!("message arrived from {}", entry.sender.as_deref().unwrap_or("unknown sender")),
        LogEvent::Delivery => format!("delivered to {}", entry.recipients.join(", ")),
        LogEvent::Defer => format!("deferred: {}", entry.error_text.as_deref().unwrap_or("no detail")),
        LogEvent::Bounce => format!("bounced: {}", entry.error_text.as_deref().unwrap_or("no detail")),
        LogEvent::Reject => format!("rejected: {}", entry.error_text.as_deref().unwrap_or("no detail")),
        LogEvent::Panic => format!("panic: {}", entry.error_text.as_deref().unwrap_or("no detail")),
        LogEvent::Unknown => "unrecognised log entry".to_owned(),
    };
    TimelineEvent {
        timestamp: entry.timestamp,
        event_type: event_type_str(entry.event).to_owned(),
        recipient: entry.recipients.first().cloned(),
        host: entry.host.clone(),
        smtp_code: entry.error_code.clone(),
        error_text: entry.error_text.clone(),
        description,
        source: TimelineSource::Log,
        source_id: entry.id,
    }
}

fn attempt_status_str(status: AttemptStatus) -> &'static str {
    match status {
        AttemptStatus::Success => "success",
        AttemptStatus::Defer => "defer",
        AttemptStatus::Bounce => "bounce",
        AttemptStatus::Timeout => "timeout",
    }
}

fn attempt_event(attempt: &DeliveryAttempt) -> TimelineEvent {
    TimelineEvent {
        timestamp: attempt.timestamp,
        event_type: format!("delivery_attempt:{}", attempt_status_str(attempt.status)),
        recipient: Some(attempt.recipient.clone()),
        host: attempt.host.clone(),
        smtp_code: attempt.smtp_code.clone(),
        error_text: attempt.error_message.clone(),
        description: format!("delivery attempt ({}) to {}", attempt_status_str(attempt.status), attempt.recipient),
        source: TimelineSource::Queue,
        source_id: attempt.id,
    }
}

fn audit_action_str(action: AuditAction) -> &'static str {
    match action {
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

fn audit_event(audit: &AuditLog) -> TimelineEvent {
    TimelineEvent {
        timestamp: audit.timestamp,
        event_type: format!("audit:{}", audit_action_str(audit.action)),
        recipient: None,
        host: None,
        smtp_code: None,
        error_text: None,
        description: format!("operator action: {}", audit_action_str(audit.action)),
        source: TimelineSource::Audit,
        source_id: audit.id,
    }
}

fn build_summary(
    message: &ep_types::Message,
    recipients: &[ep_types::Recipient],
    attempts: &[DeliveryAttempt],
) -> TraceSummary {
    let delivered_count = recipients.iter().filter(|r| r.status == RecipientStatus::Delivered).count() as u64;
    let deferred_count = recipients.iter().filter(|r| r.status == RecipientStatus::Deferred).count() as u64;
    let bounced_count = recipients.iter().filter(|r| r.status == RecipientStatus::Bounced).count() as u64;
    let pending_count = recipients.iter().filter(|r| r.status == RecipientStatus::Pending).count() as u64;

    let first_attempt_at = attempts.iter().map(|a| a.timestamp).min();
    let last_attempt_at = attempts.iter().map(|a| a.timestamp).max();

    let delivery_times: Vec<f64> = recipients
        .iter()
        .filter(|r| r.status == RecipientStatus::Delivered)
        .filter_map(|r| r.delivered_at)
        .map(|delivered_at| (delivered_at - message.timestamp).num_seconds() as f64)
        .collect();
    let average_delivery_time_secs = if delivery_times.is_empty() {
        None
    } else {
        Some(delivery_times.iter().sum::<f64>() / delivery_times.len() as f64)
    };

    TraceSummary {
        total_recipients: recipients.len() as u64,
        delivered_count,
        deferred_count,
        bounced_count,
        pending_count,
        total_attempts: attempts.len() as u64,
        first_attempt_at,
        last_attempt_at,
        average_delivery_time_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ep_store::StoreHandle;

    #[tokio::test]
    async fn builds_trace_with_merged_timeline_and_summary() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let now = Utc::now();
        let entries = vec![{
            let mut e = LogEntry::new_unpersisted(now, ep_types::LogKind::Main, "arrival".to_owned());
            e.message_id = Some("1rABCD-123456-03".to_owned());
            e.event = LogEvent::Arrival;
            e.sender = Some("a@example.com".to_owned());
            e
        }];
        let mut tx = store.pool().begin().await.unwrap();
        ep_store::repo::log_entries::insert_batch(&mut tx, &entries, false).await.unwrap();
        tx.commit().await.unwrap();

        crate::correlator::correlate_message(&store, "1rABCD-123456-03").await.unwrap();
        let trace = build_delivery_trace(&store, "1rABCD-123456-03").await.unwrap();
        assert_eq!(trace.timeline.len(), 1);
        assert_eq!(trace.summary.total_recipients, 0);
    }

    #[tokio::test]
    async fn merged_timeline_does_not_double_count_attempts_derived_from_log_entries() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let now = Utc::now();

        let mut arrival = LogEntry::new_unpersisted(now, ep_types::LogKind::Main, "arrival".to_owned());
        arrival.message_id = Some("1rABCD-123456-10".to_owned());
        arrival.event = LogEvent::Arrival;
        arrival.sender = Some("a@example.com".to_owned());

        let mut defer1 = LogEntry::new_unpersisted(
            now + chrono::Duration::minutes(1),
            ep_types::LogKind::Main,
            "defer1".to_owned(),
        );
        defer1.message_id = Some("1rABCD-123456-10".to_owned());
        defer1.event = LogEvent::Defer;
        defer1.recipients = vec!["r@example.com".to_owned()];

        let mut defer2 = LogEntry::new_unpersisted(
            now + chrono::Duration::minutes(2),
            ep_types::LogKind::Main,
            "defer2".to_owned(),
        );
        defer2.message_id = Some("1rABCD-123456-10".to_owned());
        defer2.event = LogEvent::Defer;
        defer2.recipients = vec!["r@example.com".to_owned()];

        let mut delivery = LogEntry::new_unpersisted(
            now + chrono::Duration::minutes(3),
            ep_types::LogKind::Main,
            "delivery".to_owned(),
        );
        delivery.message_id = Some("1rABCD-123456-10".to_owned());
        delivery.event = LogEvent::Delivery;
        delivery.recipients = vec!["r@example.com".to_owned()];

        let entries = vec![arrival, defer1, defer2, delivery];
        let mut tx = store.pool().begin().await.unwrap();
        ep_store::repo::log_entries::insert_batch(&mut tx, &entries, false).await.unwrap();
        tx.commit().await.unwrap();

        crate::correlator::correlate_message(&store, "1rABCD-123456-10").await.unwrap();
        let trace = build_delivery_trace(&store, "1rABCD-123456-10").await.unwrap();

        assert_eq!(trace.timeline.len(), 4);
        assert!(trace.timeline.iter().all(|e| e.source == TimelineSource::Log));
    }
}
