use std::collections::HashSet;

use chrono::{DateTime, Utc};
use ep_types::{recipients::marshal_recipients, recipients::unmarshal_recipients};
use ep_types::{LogEntry, LogEvent, LogKind, SearchCriteria, SortOrder};
use sqlx::sqlite::SqliteArguments;
use sqlx::{Arguments, Row, Sqlite, SqlitePool, Transaction};

use crate::error::StoreError;

fn log_kind_str(k: LogKind) -> &'static str {
    match k {
        LogKind::Main => "main",
        LogKind::Reject => "reject",
        LogKind::Panic => "panic",
    }
}

pub fn parse_log_kind(s: &str) -> LogKind {
    match s {
        "reject" => LogKind::Reject,
        "panic" => LogKind::Panic,
        _ => LogKind::Main,
    }
}

fn event_str(e: LogEvent) -> &'static str {
    match e {
        LogEvent::Arrival => "arrival",
        LogEvent::Delivery => "delivery",
        LogEvent::Defer => "defer",
        LogEvent::Bounce => "bounce",
        LogEvent::Reject => "reject",
        LogEvent::Panic => "panic",
        LogEvent::Unknown => "unknown",
    }
}

pub fn parse_event(s: &str) -> LogEvent {
    match s {
        "arrival" => LogEvent::Arrival,
        "delivery" => LogEvent::Delivery,
        "defer" => LogEvent::Defer,
        "bounce" => LogEvent::Bounce,
        "reject" => LogEvent::Reject,
        "panic" => LogEvent::Panic,
        _ => LogEvent::Unknown,
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<LogEntry, StoreError> {
    Ok(LogEntry {
        id: row.get("id"),
        timestamp: row.get("timestamp"),
        message_id: row.get("message_id"),
        log_type: parse_log_kind(row.get::<String, _>("log_type").as_str()),
        event: parse_event(row.get::<String, _>("event").as_str()),
        host: row.get("host"),
        sender: row.get("sender"),
        recipients: unmarshal_recipients(row.get::<String, _>("recipients").as_str())?,
        size: row.get::<Option<i64>, _>("size").map(|v| v as u64),
        status: row.get("status"),
        error_code: row.get("error_code"),
        error_text: row.get("error_text"),
        raw_line: row.get("raw_line"),
        created_at: row.get("created_at"),
    })
}

/// Insert a batch of entries in one transaction. When `dedup` is set,
/// entries sharing a `raw_line` within this batch are collapsed to the
/// first occurrence before insertion. A per-row insert failure is logged
/// and skipped; it does not abort the rest of the batch (the batch-level
/// transaction failure path is the caller's rollback on `Err`).
pub async fn insert_batch(
    tx: &mut Transaction<'_, Sqlite>,
    entries: &[LogEntry],
    dedup: bool,
) -> Result<u64, StoreError> {
    let mut seen = HashSet::new();
    let mut inserted = 0u64;
    for entry in entries {
        if dedup && !seen.insert(entry.raw_line.clone()) {
            continue;
        }
        let result = sqlx::query(
            "INSERT INTO log_entries
                (timestamp, message_id, log_type, event, host, sender, recipients, size, status, error_code, error_text, raw_line, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.timestamp)
        .bind(&entry.message_id)
        .bind(log_kind_str(entry.log_type))
        .bind(event_str(entry.event))
        .bind(&entry.host)
        .bind(&entry.sender)
        .bind(marshal_recipients(&entry.recipients))
        .bind(entry.size.map(|v| v as i64))
        .bind(&entry.status)
        .bind(&entry.error_code)
        .bind(&entry.error_text)
        .bind(&entry.raw_line)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await;

        match result {
            Ok(_) => inserted += 1,
            Err(e) => tracing::warn!(error = %e, raw_line = %entry.raw_line, "dropping row that failed to insert"),
        }
    }
    Ok(inserted)
}

pub async fn list_by_message(
    pool: &SqlitePool,
    message_id: &str,
) -> Result<Vec<LogEntry>, StoreError> {
    let rows = sqlx::query("SELECT * FROM log_entries WHERE message_id = ? ORDER BY timestamp, id")
        .bind(message_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_entry).collect()
}

pub async fn list_window(
    pool: &SqlitePool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<LogEntry>, StoreError> {
    let rows = sqlx::query(
        "SELECT * FROM log_entries WHERE timestamp >= ? AND timestamp <= ? ORDER BY timestamp, id",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_entry).collect()
}

/// Compile `criteria` into a single AND-joined parameterized query. Every
/// predicate value is bound, never spliced into the SQL text.
pub async fn search(
    pool: &SqlitePool,
    criteria: &SearchCriteria,
) -> Result<(Vec<LogEntry>, u64), StoreError> {
    let (where_clause, args) = compile_predicate(criteria)?;
    let order = match criteria.sort_order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };

    let count_sql = format!("SELECT COUNT(*) as c FROM log_entries {where_clause}");
    let total: (i64,) = sqlx::query_as_with(&count_sql, args.clone())
        .fetch_one(pool)
        .await?;

    let page_sql = format!(
        "SELECT * FROM log_entries {where_clause} ORDER BY timestamp {order} LIMIT ? OFFSET ?"
    );
    let mut page_args = args;
    page_args.add(i64::from(criteria.effective_limit()))?;
    page_args.add(i64::from(criteria.effective_offset()))?;

    let rows = sqlx::query_with(&page_sql, page_args).fetch_all(pool).await?;
    let entries = rows.iter().map(row_to_entry).collect::<Result<Vec<_>, _>>()?;
    Ok((entries, total.0 as u64))
}

fn compile_predicate(
    criteria: &SearchCriteria,
) -> Result<(String, SqliteArguments<'static>), StoreError> {
    let mut clauses: Vec<String> = Vec::new();
    let mut args = SqliteArguments::default();

    if let Some(start) = criteria.start_time {
        clauses.push("timestamp >= ?".to_owned());
        args.add(start)?;
    }
    if let Some(end) = criteria.end_time {
        clauses.push("timestamp <= ?".to_owned());
        args.add(end)?;
    }
    if let Some(id) = &criteria.message_id {
        clauses.push("message_id = ?".to_owned());
        args.add(id.clone())?;
    }
    if let Some(sender) = &criteria.sender {
        clauses.push("sender LIKE ?".to_owned());
        args.add(format!("%{sender}%"))?;
    }
    if let Some(host) = &criteria.host {
        clauses.push("host LIKE ?".to_owned());
        args.add(format!("%{host}%"))?;
    }
    if let Some(code) = &criteria.error_code {
        clauses.push("error_code LIKE ?".to_owned());
        args.add(format!("%{code}%"))?;
    }
    if let Some(recipient_substr) = &criteria.recipients {
        clauses.push("recipients LIKE ?".to_owned());
        args.add(format!("%{recipient_substr}%"))?;
    }
    if let Some(kinds) = &criteria.log_kinds {
        if !kinds.is_empty() {
            let placeholders = kinds.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            clauses.push(format!("log_type IN ({placeholders})"));
            for kind in kinds {
                args.add(log_kind_str(*kind))?;
            }
        }
    }
    if let Some(events) = &criteria.events {
        if !events.is_empty() {
            let placeholders = events.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            clauses.push(format!("event IN ({placeholders})"));
            for event in events {
                args.add(event_str(*event))?;
            }
        }
    }
    if let Some(status) = &criteria.status {
        clauses.push("status = ?".to_owned());
        args.add(status.clone())?;
    }
    if let Some(keywords) = &criteria.keywords {
        for kw in keywords {
            clauses.push("(raw_line LIKE ? OR error_text LIKE ?)".to_owned());
            let pattern = format!("%{kw}%");
            args.add(pattern.clone())?;
            args.add(pattern)?;
        }
    }
    if let Some(min) = criteria.min_size {
        clauses.push("size >= ?".to_owned());
        args.add(min as i64)?;
    }
    if let Some(max) = criteria.max_size {
        clauses.push("size <= ?".to_owned());
        args.add(max as i64)?;
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    Ok((where_clause, args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreHandle;
    use ep_types::LogKind as Kind;

    fn entry(raw_line: &str, event: LogEvent, ts: DateTime<Utc>) -> LogEntry {
        let mut e = LogEntry::new_unpersisted(ts, Kind::Main, raw_line.to_owned());
        e.event = event;
        e
    }

    #[tokio::test]
    async fn insert_batch_dedups_by_raw_line() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let now = Utc::now();
        let entries = vec![
            entry("line a", LogEvent::Unknown, now),
            entry("line a", LogEvent::Unknown, now),
            entry("line b", LogEvent::Unknown, now),
        ];
        let mut tx = store.pool().begin().await.unwrap();
        let inserted = insert_batch(&mut tx, &entries, true).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(inserted, 2);
    }

    #[tokio::test]
    async fn search_filters_by_event_and_paginates() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let now = Utc::now();
        let entries = vec![
            entry("a", LogEvent::Arrival, now),
            entry("b", LogEvent::Delivery, now),
            entry("c", LogEvent::Delivery, now),
        ];
        let mut tx = store.pool().begin().await.unwrap();
        insert_batch(&mut tx, &entries, false).await.unwrap();
        tx.commit().await.unwrap();

        let mut criteria = SearchCriteria::default();
        criteria.events = Some(vec![LogEvent::Delivery]);
        let (rows, total) = search(store.pool(), &criteria).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 2);
    }
}
