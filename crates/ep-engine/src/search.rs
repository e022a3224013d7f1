//! Search Engine (C9): thin orchestration over the store's parameterized
//! predicate compiler, adding in-memory, current-page aggregation and
//! duration timing.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Timelike;
use ep_store::StoreHandle;
use ep_types::{Aggregations, LogEntry, LogEvent, LogKind, SearchCriteria, SearchResults};

use crate::error::EngineError;

pub async fn search(store: &StoreHandle, criteria: &SearchCriteria) -> Result<SearchResults, EngineError> {
    let started = Instant::now();
    let (entries, total) = ep_store::repo::log_entries::search(store.pool(), criteria).await?;
    let aggregations = aggregate(&entries);
    Ok(SearchResults {
        entries,
        total,
        duration_ms: started.elapsed().as_millis() as u64,
        aggregations,
    })
}

/// Aggregations are descriptive for the returned page only, never global.
fn aggregate(entries: &[LogEntry]) -> Aggregations {
    let mut by_event: HashMap<LogEvent, u64> = HashMap::new();
    let mut by_log_kind: HashMap<LogKind, u64> = HashMap::new();
    let mut by_status: HashMap<String, u64> = HashMap::new();
    let mut by_hour: HashMap<chrono::DateTime<chrono::Utc>, u64> = HashMap::new();
    let mut senders: HashMap<String, u64> = HashMap::new();
    let mut hosts: HashMap<String, u64> = HashMap::new();

    for entry in entries {
        *by_event.entry(entry.event).or_insert(0) += 1;
        *by_log_kind.entry(entry.log_type).or_insert(0) += 1;
        if let Some(status) = &entry.status {
            *by_status.entry(status.clone()).or_insert(0) += 1;
        }
        *by_hour.entry(truncate_to_hour(entry.timestamp)).or_insert(0) += 1;
        if let Some(sender) = &entry.sender {
            *senders.entry(sender.clone()).or_insert(0) += 1;
        }
        if let Some(host) = &entry.host {
            *hosts.entry(host.clone()).or_insert(0) += 1;
        }
    }

    Aggregations {
        by_event: sort_count_desc(by_event.into_iter().collect()),
        by_log_kind: sort_count_desc(by_log_kind.into_iter().collect()),
        by_status: sort_desc_keyed(by_status),
        by_hour: sort_by_timestamp(by_hour.into_iter().collect()),
        top_senders: top_n(sort_desc_keyed(senders), 10),
        top_hosts: top_n(sort_desc_keyed(hosts), 10),
    }
}

fn truncate_to_hour(ts: chrono::DateTime<chrono::Utc>) -> chrono::DateTime<chrono::Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Sort by count only: `K` here (`LogEvent`/`LogKind`) has no natural
/// ordering worth imposing as a tiebreak.
fn sort_count_desc<K>(mut v: Vec<(K, u64)>) -> Vec<(K, u64)> {
    v.sort_by(|a, b| b.1.cmp(&a.1));
    v
}

fn sort_desc_keyed(map: HashMap<String, u64>) -> Vec<(String, u64)> {
    let mut v: Vec<(String, u64)> = map.into_iter().collect();
    v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    v
}

fn sort_by_timestamp(mut v: Vec<(chrono::DateTime<chrono::Utc>, u64)>) -> Vec<(chrono::DateTime<chrono::Utc>, u64)> {
    v.sort_by_key(|(ts, _)| *ts);
    v
}

fn top_n(mut v: Vec<(String, u64)>, n: usize) -> Vec<(String, u64)> {
    v.truncate(n);
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use ep_store::StoreHandle;
    use ep_types::LogKind as Kind;

    #[tokio::test]
    async fn search_reports_duration_and_aggregations() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let now = chrono::Utc::now();
        let entries = vec![
            LogEntry::new_unpersisted(now, Kind::Main, "a".into()),
            LogEntry::new_unpersisted(now, Kind::Main, "b".into()),
        ];
        let mut tx = store.pool().begin().await.unwrap();
        ep_store::repo::log_entries::insert_batch(&mut tx, &entries, false).await.unwrap();
        tx.commit().await.unwrap();

        let results = search(&store, &SearchCriteria::default()).await.unwrap();
        assert_eq!(results.total, 2);
        assert_eq!(results.aggregations.by_log_kind, vec![(Kind::Main, 2)]);
    }
}
