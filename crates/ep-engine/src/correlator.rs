//! Correlator (C5): rebuilds Message/Recipient/DeliveryAttempt rows from a
//! window of log entries. Grounded in the store's per-entity repo functions;
//! this module only owns the in-memory reconstruction and ordering.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ep_store::StoreHandle;
use ep_types::{AttemptStatus, LogEntry, LogEvent, MessageStatus, RecipientStatus};

use crate::error::EngineError;

#[derive(Debug, Default, Clone, Copy)]
pub struct CorrelationRunResult {
    pub messages_examined: u64,
    pub messages_failed: u64,
}

/// Periodic/manual window entry point (§4.5): correlate every message that
/// has at least one log entry timestamped within `[start, end]`. A
/// per-message failure or timeout is logged and skipped; it never aborts
/// the rest of the window.
pub async fn correlate_window(
    store: &StoreHandle,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    per_message_timeout: Duration,
) -> Result<CorrelationRunResult, EngineError> {
    let ids = ep_store::repo::messages::list_ids_with_log_entries_in_window(store.pool(), start, end)
        .await?;
    let mut result = CorrelationRunResult::default();
    for id in ids {
        result.messages_examined += 1;
        match tokio::time::timeout(per_message_timeout, correlate_message(store, &id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(message_id = %id, error = %e, "correlation failed, skipping message");
                result.messages_failed += 1;
            }
            Err(_) => {
                tracing::warn!(message_id = %id, timeout = ?per_message_timeout, "correlation timed out, skipping message");
                result.messages_failed += 1;
            }
        }
    }
    Ok(result)
}

#[derive(Debug, Clone)]
struct PendingAttempt {
    recipient: String,
    timestamp: DateTime<Utc>,
    host: Option<String>,
    status: AttemptStatus,
    smtp_code: Option<String>,
    error_message: Option<String>,
}

/// Inline and manual-single-message path: rebuild one message's rows from
/// its full log entry history, in timestamp-then-primary-key order.
pub async fn correlate_message(store: &StoreHandle, message_id: &str) -> Result<(), EngineError> {
    let entries = ep_store::repo::log_entries::list_by_message(store.pool(), message_id).await?;
    if entries.is_empty() {
        return Ok(());
    }

    let existing = ep_store::repo::messages::get_by_id(store.pool(), message_id).await?;
    let is_new = existing.is_none();
    let mut sender = existing.as_ref().and_then(|m| m.sender.clone());
    let mut size = existing.as_ref().and_then(|m| m.size);

    let mut arrival_timestamp: Option<DateTime<Utc>> = None;
    let mut recipients: HashMap<String, (RecipientStatus, Option<DateTime<Utc>>)> = HashMap::new();
    let mut bounced_message = false;
    let mut attempts: Vec<PendingAttempt> = Vec::new();

    for entry in &entries {
        accumulate_entry(
            entry,
            &mut arrival_timestamp,
            &mut sender,
            &mut size,
            &mut recipients,
            &mut bounced_message,
            &mut attempts,
        );
    }

    let message_timestamp = arrival_timestamp
        .or_else(|| existing.as_ref().map(|m| m.timestamp))
        .unwrap_or(entries[0].timestamp);
    let status = derive_status(bounced_message, &recipients);
    let now = Utc::now();

    store
        .with_transaction(move |tx| {
            async move {
                if is_new {
                    ep_store::repo::messages::insert(
                        tx,
                        message_id,
                        message_timestamp,
                        sender.as_deref(),
                        size,
                        status,
                        now,
                    )
                    .await?;
                } else {
                    ep_store::repo::messages::update(
                        tx,
                        message_id,
                        message_timestamp,
                        sender.as_deref(),
                        size,
                        status,
                        now,
                    )
                    .await?;
                }
                for (address, (r_status, delivered_at)) in &recipients {
                    ep_store::repo::recipients::upsert(
                        tx,
                        message_id,
                        address,
                        *r_status,
                        *delivered_at,
                        now,
                    )
                    .await?;
                }
                for attempt in &attempts {
                    ep_store::repo::attempts::insert_if_not_exists(
                        tx,
                        message_id,
                        &attempt.recipient,
                        attempt.timestamp,
                        attempt.host.as_deref(),
                        None,
                        attempt.status,
                        attempt.smtp_code.as_deref(),
                        attempt.error_message.as_deref(),
                        now,
                    )
                    .await?;
                }
                Ok(())
            }
        })
        .await?;

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn accumulate_entry(
    entry: &LogEntry,
    arrival_timestamp: &mut Option<DateTime<Utc>>,
    sender: &mut Option<String>,
    size: &mut Option<u64>,
    recipients: &mut HashMap<String, (RecipientStatus, Option<DateTime<Utc>>)>,
    bounced_message: &mut bool,
    attempts: &mut Vec<PendingAttempt>,
) {
    match entry.event {
        LogEvent::Arrival => {
            *arrival_timestamp = Some(match *arrival_timestamp {
                Some(existing) => existing.min(entry.timestamp),
                None => entry.timestamp,
            });
            if sender.is_none() {
                *sender = entry.sender.clone();
            }
            if size.is_none() {
                *size = entry.size;
            }
        }
        LogEvent::Delivery => {
            for recipient in &entry.recipients {
                let slot = recipients
                    .entry(recipient.clone())
                    .or_insert((RecipientStatus::Pending, None));
                if slot.0 != RecipientStatus::Bounced {
                    *slot = (RecipientStatus::Delivered, Some(entry.timestamp));
                }
                attempts.push(PendingAttempt {
                    recipient: recipient.clone(),
                    timestamp: entry.timestamp,
                    host: entry.host.clone(),
                    status: AttemptStatus::Success,
                    smtp_code: entry.error_code.clone(),
                    error_message: None,
                });
            }
        }
        LogEvent::Defer => {
            for recipient in &entry.recipients {
                let slot = recipients
                    .entry(recipient.clone())
                    .or_insert((RecipientStatus::Pending, None));
                if slot.0 != RecipientStatus::Delivered && slot.0 != RecipientStatus::Bounced {
                    slot.0 = RecipientStatus::Deferred;
                }
                attempts.push(PendingAttempt {
                    recipient: recipient.clone(),
                    timestamp: entry.timestamp,
                    host: entry.host.clone(),
                    status: AttemptStatus::Defer,
                    smtp_code: entry.error_code.clone(),
                    error_message: entry.error_text.clone(),
                });
            }
        }
        LogEvent::Bounce => {
            *bounced_message = true;
            for recipient in &entry.recipients {
                recipients.insert(recipient.clone(), (RecipientStatus::Bounced, None));
                attempts.push(PendingAttempt {
                    recipient: recipient.clone(),
                    timestamp: entry.timestamp,
                    host: entry.host.clone(),
                    status: AttemptStatus::Bounce,
                    smtp_code: entry.error_code.clone(),
                    error_message: entry.error_text.clone(),
                });
            }
        }
        LogEvent::Reject | LogEvent::Panic => {
            for recipient in &entry.recipients {
                attempts.push(PendingAttempt {
                    recipient: recipient.clone(),
                    timestamp: entry.timestamp,
                    host: entry.host.clone(),
                    status: reject_or_panic_status(entry),
                    smtp_code: entry.error_code.clone(),
                    error_message: entry.error_text.clone(),
                });
            }
        }
        LogEvent::Unknown => {}
    }
}

/// `reject`/`panic` entries have no direct `AttemptStatus` counterpart in
/// the schema; a reject's own error code tells us whether it behaves like a
/// temporary or permanent failure, and a panic (an internal MTA fault, not
/// a delivery outcome) is recorded as a timeout.
fn reject_or_panic_status(entry: &LogEntry) -> AttemptStatus {
    match entry.event {
        LogEvent::Reject => match entry.error_code.as_deref() {
            Some(code) if code.starts_with('4') => AttemptStatus::Defer,
            _ => AttemptStatus::Bounce,
        },
        _ => AttemptStatus::Timeout,
    }
}

fn derive_status(
    bounced_message: bool,
    recipients: &HashMap<String, (RecipientStatus, Option<DateTime<Utc>>)>,
) -> MessageStatus {
    if bounced_message || recipients.values().any(|(s, _)| *s == RecipientStatus::Bounced) {
        return MessageStatus::Bounced;
    }
    if !recipients.is_empty() && recipients.values().all(|(s, _)| *s == RecipientStatus::Delivered) {
        return MessageStatus::Delivered;
    }
    if recipients.values().any(|(s, _)| *s == RecipientStatus::Deferred) {
        return MessageStatus::Deferred;
    }
    MessageStatus::Received
}

#[cfg(test)]
mod tests {
    use super::*;
    use ep_store::StoreHandle;

    fn entry(ts: DateTime<Utc>, event: LogEvent, recipients: Vec<&str>, message_id: &str) -> LogEntry {
        let mut e = LogEntry::new_unpersisted(ts, ep_types::LogKind::Main, format!("{message_id}-{event:?}"));
        e.message_id = Some(message_id.to_owned());
        e.event = event;
        e.recipients = recipients.into_iter().map(str::to_owned).collect();
        e.sender = Some("sender@example.com".to_owned());
        e
    }

    #[tokio::test]
    async fn derives_delivered_status_when_all_recipients_succeed() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let now = Utc::now();
        let entries = vec![
            entry(now, LogEvent::Arrival, vec![], "1rABCD-123456-01"),
            entry(now + chrono::Duration::seconds(1), LogEvent::Delivery, vec!["a@example.com"], "1rABCD-123456-01"),
        ];
        let mut tx = store.pool().begin().await.unwrap();
        ep_store::repo::log_entries::insert_batch(&mut tx, &entries, false).await.unwrap();
        tx.commit().await.unwrap();

        correlate_message(&store, "1rABCD-123456-01").await.unwrap();

        let message = ep_store::repo::messages::get_by_id(store.pool(), "1rABCD-123456-01")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.status, MessageStatus::Delivered);
        assert_eq!(message.sender.as_deref(), Some("sender@example.com"));
    }

    #[tokio::test]
    async fn rerunning_correlation_is_idempotent() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let now = Utc::now();
        let entries = vec![
            entry(now, LogEvent::Arrival, vec![], "1rABCD-123456-02"),
            entry(now + chrono::Duration::seconds(1), LogEvent::Defer, vec!["a@example.com"], "1rABCD-123456-02"),
        ];
        let mut tx = store.pool().begin().await.unwrap();
        ep_store::repo::log_entries::insert_batch(&mut tx, &entries, false).await.unwrap();
        tx.commit().await.unwrap();

        correlate_message(&store, "1rABCD-123456-02").await.unwrap();
        correlate_message(&store, "1rABCD-123456-02").await.unwrap();

        let attempts = ep_store::repo::attempts::list_by_message(store.pool(), "1rABCD-123456-02")
            .await
            .unwrap();
        assert_eq!(attempts.len(), 1);
    }

    #[tokio::test]
    async fn bounce_is_terminal_and_survives_a_later_defer_or_delivery() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let now = Utc::now();
        let entries = vec![
            entry(now, LogEvent::Arrival, vec![], "1rABCD-123456-09"),
            entry(now + chrono::Duration::seconds(1), LogEvent::Bounce, vec!["a@example.com"], "1rABCD-123456-09"),
            entry(now + chrono::Duration::seconds(2), LogEvent::Defer, vec!["a@example.com"], "1rABCD-123456-09"),
            entry(now + chrono::Duration::seconds(3), LogEvent::Delivery, vec!["a@example.com"], "1rABCD-123456-09"),
        ];
        let mut tx = store.pool().begin().await.unwrap();
        ep_store::repo::log_entries::insert_batch(&mut tx, &entries, false).await.unwrap();
        tx.commit().await.unwrap();

        correlate_message(&store, "1rABCD-123456-09").await.unwrap();

        let recipients = ep_store::repo::recipients::list_by_message(store.pool(), "1rABCD-123456-09")
            .await
            .unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].status, RecipientStatus::Bounced);

        let message = ep_store::repo::messages::get_by_id(store.pool(), "1rABCD-123456-09")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.status, MessageStatus::Bounced);
    }
}
