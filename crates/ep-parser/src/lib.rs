//! Line Parser (C1): classifies one textual MTA log line into a typed
//! `LogEntry`. Never rejects a line — an unrecognised shape degrades to
//! `event=unknown` carrying only `raw_line`, and a malformed field degrades
//! to `None` rather than aborting the whole line.

mod fields;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use ep_types::{LogEntry, LogEvent, LogKind};

const TIMESTAMP_LEN: usize = 19; // "YYYY-MM-DD HH:MM:SS"
const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse one line of the given `log_kind`. `source_tz` is the time zone the
/// MTA wrote its timestamps in; the persisted `LogEntry.timestamp` is always
/// converted to UTC. Returns `None` for an empty/whitespace-only line, or
/// for a line with no recognisable timestamp prefix — the parser never
/// invents a timestamp for data that doesn't carry one.
pub fn parse(line: &str, log_kind: LogKind, source_tz: Tz) -> Option<LogEntry> {
    if line.trim().is_empty() {
        return None;
    }

    let (timestamp, rest) = split_timestamp(line, source_tz)?;
    let mut entry = LogEntry::new_unpersisted(timestamp, log_kind, line.to_owned());

    match log_kind {
        LogKind::Reject => classify_reject(&mut entry, rest),
        LogKind::Panic => classify_panic(&mut entry, rest),
        LogKind::Main => classify_main(&mut entry, rest),
    }

    Some(entry)
}

/// Split off the fixed-width timestamp prefix. Returns `None` on a
/// malformed/missing prefix rather than fabricating a timestamp — the
/// caller treats that as an unparseable line.
fn split_timestamp(line: &str, source_tz: Tz) -> Option<(DateTime<Utc>, &str)> {
    if line.len() >= TIMESTAMP_LEN {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&line[..TIMESTAMP_LEN], TIMESTAMP_FMT) {
            let local = source_tz.from_local_datetime(&naive).single();
            let utc = local.map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|| {
                // Ambiguous/non-existent local time (DST fold) — use the naive
                // value interpreted as UTC rather than guessing an offset.
                Utc.from_utc_datetime(&naive)
            });
            return Some((utc, line[TIMESTAMP_LEN..].trim_start()));
        }
    }
    tracing::warn!(line, "log line missing recognisable timestamp prefix, dropping");
    None
}

fn classify_main(entry: &mut LogEntry, rest: &str) {
    let (message_id, rest) = match fields::extract_message_id(rest) {
        Some((id, r)) => (Some(id.to_owned()), r),
        None => (None, rest),
    };
    entry.message_id = message_id;

    if rest.contains("<=") {
        classify_arrival(entry, rest);
    } else if rest.contains("=>") {
        classify_delivery(entry, rest);
    } else if rest.contains("==") {
        classify_defer(entry, rest);
    } else if rest.contains("**") || rest.contains("bounce") {
        classify_bounce(entry, rest);
    } else {
        entry.event = LogEvent::Unknown;
    }
}

fn classify_arrival(entry: &mut LogEntry, rest: &str) {
    entry.event = LogEvent::Arrival;
    entry.sender = fields::extract_address_after(rest, "<=");
    entry.host = fields::extract_kv(rest, "H");
    entry.size = fields::extract_u64_kv(rest, "S");
    entry.recipients = recipients_tail(rest, "<=");
}

fn classify_delivery(entry: &mut LogEntry, rest: &str) {
    entry.event = LogEvent::Delivery;
    entry.host = fields::extract_kv(rest, "H");
    if let Some(addr) = fields::extract_address_after(rest, "=>") {
        entry.recipients = vec![addr];
    }
}

fn classify_defer(entry: &mut LogEntry, rest: &str) {
    entry.event = LogEvent::Defer;
    if let Some(addr) = fields::extract_address_after(rest, "==") {
        entry.recipients = vec![addr];
    }
    entry.error_code = fields::extract_parenthesised(rest)
        .as_deref()
        .and_then(|s| s.split_whitespace().next())
        .filter(|tok| tok.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_owned);
    entry.error_text = trailing_clause(rest);
}

fn classify_bounce(entry: &mut LogEntry, rest: &str) {
    entry.event = LogEvent::Bounce;
    let marker = if rest.contains("**") { "**" } else { "bounce" };
    if let Some(addr) = fields::extract_address_after(rest, marker) {
        entry.recipients = vec![addr];
    }
    entry.error_text = trailing_clause(rest);
}

fn classify_reject(entry: &mut LogEntry, rest: &str) {
    entry.event = LogEvent::Reject;
    entry.host = fields::extract_bracketed(rest);
    entry.error_text = fields::extract_parenthesised(rest).or_else(|| trailing_clause(rest));
}

fn classify_panic(entry: &mut LogEntry, rest: &str) {
    entry.event = LogEvent::Panic;
    entry.error_text = Some(rest.trim().to_owned());
}

/// Everything after the matched marker's address token, treated as
/// recipients for `arrival` lines (MTA lines list one or more `R=...`-free
/// trailing addresses after the primary sender clause in batched arrivals).
fn recipients_tail(rest: &str, marker: &str) -> Vec<String> {
    fields::extract_address_after(rest, marker)
        .map(|a| vec![a])
        .unwrap_or_default()
}

/// Best-effort trailing free-text error clause: whatever follows the last
/// recognised key-value token, trimmed.
fn trailing_clause(rest: &str) -> Option<String> {
    let text = rest.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::UTC;

    fn p(line: &str, kind: LogKind) -> LogEntry {
        parse(line, kind, UTC).expect("non-empty line must parse")
    }

    #[test]
    fn empty_line_yields_none() {
        assert!(parse("", LogKind::Main, UTC).is_none());
        assert!(parse("   ", LogKind::Main, UTC).is_none());
    }

    #[test]
    fn arrival_line_captures_sender_host_size() {
        let line = "2024-01-15 10:30:45 1rABCD-123456-78 <= sender@example.com H=mail.example.com [192.168.1.1] P=esmtp S=1234";
        let e = p(line, LogKind::Main);
        assert_eq!(e.event, LogEvent::Arrival);
        assert_eq!(e.message_id.as_deref(), Some("1rABCD-123456-78"));
        assert_eq!(e.sender.as_deref(), Some("sender@example.com"));
        assert_eq!(e.host.as_deref(), Some("mail.example.com"));
        assert_eq!(e.size, Some(1234));
        assert_eq!(e.raw_line, line);
    }

    #[test]
    fn delivery_line_captures_recipient_and_host() {
        let line = "2024-01-15 10:31:00 1rABCD-123456-78 => recipient@example.com R=dnslookup T=remote_smtp H=mx.example.com [192.168.1.2]";
        let e = p(line, LogKind::Main);
        assert_eq!(e.event, LogEvent::Delivery);
        assert_eq!(e.recipients, vec!["recipient@example.com".to_owned()]);
        assert_eq!(e.host.as_deref(), Some("mx.example.com"));
    }

    #[test]
    fn defer_line_captures_error_code_and_text() {
        let line =
            "2024-01-15 10:32:00 1rABCD-123456-78 == recipient@example.com R=dnslookup defer (421 temporary failure)";
        let e = p(line, LogKind::Main);
        assert_eq!(e.event, LogEvent::Defer);
        assert_eq!(e.recipients, vec!["recipient@example.com".to_owned()]);
        assert_eq!(e.error_code.as_deref(), Some("421"));
    }

    #[test]
    fn reject_line_with_no_message_id() {
        let line = "2024-01-15 10:33:00 rejected connection from [10.0.0.1] (relay not permitted)";
        let e = p(line, LogKind::Reject);
        assert_eq!(e.event, LogEvent::Reject);
        assert_eq!(e.message_id, None);
        assert_eq!(e.host.as_deref(), Some("10.0.0.1"));
        assert_eq!(e.error_text.as_deref(), Some("relay not permitted"));
    }

    #[test]
    fn panic_line_is_captured_verbatim_in_error_text() {
        let line = "2024-01-15 10:34:00 panic: unable to open spool directory";
        let e = p(line, LogKind::Panic);
        assert_eq!(e.event, LogEvent::Panic);
        assert!(e.error_text.unwrap().contains("spool directory"));
    }

    #[test]
    fn unrecognised_main_shape_degrades_to_unknown_event() {
        let line = "2024-01-15 10:35:00 some unstructured diagnostic output";
        let e = p(line, LogKind::Main);
        assert_eq!(e.event, LogEvent::Unknown);
        assert_eq!(e.raw_line, line);
    }

    #[test]
    fn missing_timestamp_prefix_yields_none_rather_than_inventing_one() {
        let line = "not a timestamp at all <= sender@example.com";
        assert!(parse(line, LogKind::Main, UTC).is_none());
    }

    #[test]
    fn malformed_message_id_leaves_field_null_without_rejecting_line() {
        let line = "2024-01-15 10:36:00 not-an-id <= sender@example.com H=mail.example.com";
        let e = p(line, LogKind::Main);
        assert_eq!(e.message_id, None);
    }
}
