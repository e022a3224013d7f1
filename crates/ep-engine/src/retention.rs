//! Retention Engine (C7): per-table bounded-batch deletion, orphan sweep,
//! and vacuum/analyze finalization. Runs single-flighted: a run already in
//! progress makes a concurrent call a no-op rather than overlap it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ep_store::StoreHandle;
use ep_types::config::RetentionConfig;
use ep_types::CleanupResult;
use tokio::sync::Mutex;

use crate::error::EngineError;

const YIELD_PAUSE: Duration = Duration::from_millis(10);
const ORPHAN_MESSAGE_AGE_DAYS: i64 = 7;

#[derive(Clone)]
pub struct RetentionEngine {
    guard: Arc<Mutex<()>>,
}

impl RetentionEngine {
    pub fn new() -> Self {
        Self { guard: Arc::new(Mutex::new(())) }
    }

    /// Runs the full cleanup pass described in §4.7. Returns `Ok(None)`
    /// without touching the store if another run is still in flight.
    pub async fn run(
        &self,
        store: &StoreHandle,
        config: &RetentionConfig,
    ) -> Result<Option<CleanupResult>, EngineError> {
        let Ok(_permit) = self.guard.try_lock() else {
            tracing::debug!("retention run already in progress, skipping");
            return Ok(None);
        };

        let started = Instant::now();
        let now = Utc::now();
        let mut rows_deleted_per_table = Vec::new();

        for (table, time_col, days) in [
            ("log_entries", "timestamp", config.log_entries_days),
            ("audit_log", "timestamp", config.audit_days),
            ("queue_snapshots", "timestamp", config.snapshots_days),
            ("delivery_attempts", "timestamp", config.attempts_days),
        ] {
            let cutoff = now - chrono::Duration::days(days);
            let deleted = delete_table_in_batches(store, table, time_col, cutoff, config.batch_size as u32).await?;
            rows_deleted_per_table.push((table.to_owned(), deleted));
        }

        let sessions_cutoff = now - chrono::Duration::days(config.sessions_days);
        let sessions_deleted =
            delete_sessions_in_batches(store, sessions_cutoff, now, config.batch_size as u32).await?;
        rows_deleted_per_table.push(("sessions".to_owned(), sessions_deleted));

        let orphan_recipients_removed = ep_store::repo::recipients::delete_orphans(store.pool()).await?;
        let orphan_attempts_removed = ep_store::repo::attempts::delete_orphans(store.pool()).await?;
        let orphan_cutoff = now - chrono::Duration::days(ORPHAN_MESSAGE_AGE_DAYS);
        let orphan_messages_removed =
            ep_store::repo::messages::delete_orphans_older_than(store.pool(), orphan_cutoff).await?;

        ep_store::repo::retention::vacuum_and_analyze(store.pool()).await?;

        Ok(Some(CleanupResult {
            rows_deleted_per_table,
            orphan_recipients_removed,
            orphan_attempts_removed,
            orphan_messages_removed,
            duration_ms: started.elapsed().as_millis() as u64,
        }))
    }
}

impl Default for RetentionEngine {
    fn default() -> Self {
        Self::new()
    }
}

async fn delete_table_in_batches(
    store: &StoreHandle,
    table: &str,
    time_col: &str,
    cutoff: DateTime<Utc>,
    batch_size: u32,
) -> Result<u64, EngineError> {
    let total = ep_store::repo::retention::count_older_than(store.pool(), table, time_col, cutoff).await?;
    if total == 0 {
        return Ok(0);
    }
    let mut deleted_total = 0u64;
    loop {
        let deleted =
            ep_store::repo::retention::delete_batch(store.pool(), table, time_col, cutoff, batch_size).await?;
        if deleted == 0 {
            break;
        }
        deleted_total += deleted;
        tokio::time::sleep(YIELD_PAUSE).await;
    }
    Ok(deleted_total)
}

async fn delete_sessions_in_batches(
    store: &StoreHandle,
    created_cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
    batch_size: u32,
) -> Result<u64, EngineError> {
    let mut deleted_total = 0u64;
    loop {
        let deleted =
            ep_store::repo::retention::delete_expired_sessions_batch(store.pool(), created_cutoff, now, batch_size)
                .await?;
        if deleted == 0 {
            break;
        }
        deleted_total += deleted;
        tokio::time::sleep(YIELD_PAUSE).await;
    }
    Ok(deleted_total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use ep_types::LogEntry;

    #[tokio::test]
    async fn deletes_old_log_entries_and_reports_counts() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let now = Utc::now();
        let entries = vec![
            LogEntry::new_unpersisted(now - ChronoDuration::days(200), ep_types::LogKind::Main, "old".into()),
            LogEntry::new_unpersisted(now, ep_types::LogKind::Main, "new".into()),
        ];
        let mut tx = store.pool().begin().await.unwrap();
        ep_store::repo::log_entries::insert_batch(&mut tx, &entries, false).await.unwrap();
        tx.commit().await.unwrap();

        let engine = RetentionEngine::new();
        let result = engine.run(&store, &RetentionConfig::default()).await.unwrap().unwrap();
        let log_entries_deleted = result
            .rows_deleted_per_table
            .iter()
            .find(|(t, _)| t == "log_entries")
            .map(|(_, n)| *n)
            .unwrap_or(0);
        assert_eq!(log_entries_deleted, 1);
    }
}
