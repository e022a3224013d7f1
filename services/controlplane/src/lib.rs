//! Control Plane Facade (C12): the composition root's single entry point,
//! wiring the store, ingest pipeline, and background engines together behind
//! the consumer interface (§6).

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use ep_engine::{EngineError, Scheduler};
use ep_ingest::{FileOffset, LogEntryCallback, PipelineHandle, WatchedFile};
use ep_store::StoreHandle;
use ep_types::config::RuntimeConfig;
use ep_types::{
    CleanupResult, IngestStats, LogEntry, MessageCorrelation, MessageDeliveryTrace, SearchCriteria,
    SearchResults, ServiceStatus, ThreadedTimelineView,
};
use tokio::sync::Mutex;

pub mod config;

/// How long an inline, best-effort correlation triggered by a freshly stored
/// entry is allowed to run before it's abandoned (the batch correlation tick
/// will pick the message up regardless).
const INLINE_CORRELATION_BUDGET: Duration = Duration::from_secs(30);

pub type EntryCallback = Arc<dyn Fn(&LogEntry) + Send + Sync>;

pub struct ControlPlane {
    store: StoreHandle,
    scheduler: Scheduler,
    ingest: Mutex<Option<PipelineHandle>>,
    config: RuntimeConfig,
    user_callback: Arc<StdMutex<Option<EntryCallback>>>,
}

impl ControlPlane {
    /// Startup order (§5): open the store (migrations run inside `open`),
    /// then start the background scheduler. The ingest pipeline is started
    /// separately via `start_ingest` once a file list is known.
    pub async fn start(config: RuntimeConfig) -> Result<Self, EngineError> {
        let store = StoreHandle::open(&config.store).await?;
        let scheduler = Scheduler::new(
            store.clone(),
            config.correlation.clone(),
            config.retention.clone(),
            Duration::from_secs(60 * 60),
        );
        scheduler.start().await?;
        Ok(Self {
            store,
            scheduler,
            ingest: Mutex::new(None),
            config,
            user_callback: Arc::new(StdMutex::new(None)),
        })
    }

    /// Starts tailing `files` and persisting parsed entries. A no-op if
    /// ingest is already running.
    pub async fn start_ingest(&self, files: Vec<(WatchedFile, FileOffset)>, source_tz: Tz) {
        let mut ingest = self.ingest.lock().await;
        if ingest.is_some() {
            return;
        }
        let dispatch = self.build_dispatch_callback();
        let handle = ep_ingest::start(
            files,
            self.config.ingest.clone(),
            self.store.clone(),
            source_tz,
            Duration::from_millis(250),
            Some(dispatch),
        );
        *ingest = Some(handle);
    }

    /// Builds the callback fed to the ingest pipeline's persist stage: it
    /// forwards to whatever the caller registered via
    /// `set_log_entry_callback`, then schedules a best-effort inline
    /// correlation for any entry that names a message id (§4.5).
    fn build_dispatch_callback(&self) -> LogEntryCallback {
        let user_callback = self.user_callback.clone();
        let store = self.store.clone();
        Arc::new(move |entry: &LogEntry| {
            if let Some(cb) = user_callback.lock().expect("callback mutex poisoned").as_ref() {
                cb(entry);
            }
            if let Some(message_id) = entry.message_id.clone() {
                let store = store.clone();
                tokio::spawn(async move {
                    let outcome = tokio::time::timeout(
                        INLINE_CORRELATION_BUDGET,
                        ep_engine::correlator::correlate_message(&store, &message_id),
                    )
                    .await;
                    match outcome {
                        Ok(Err(e)) => tracing::warn!(message_id = %message_id, error = %e, "inline correlation failed"),
                        Err(_) => tracing::warn!(message_id = %message_id, "inline correlation exceeded its budget"),
                        Ok(Ok(())) => {}
                    }
                });
            }
        })
    }

    pub fn set_log_entry_callback(&self, callback: EntryCallback) {
        *self.user_callback.lock().expect("callback mutex poisoned") = Some(callback);
    }

    pub async fn process_log_entry(&self, entry: LogEntry) -> Result<(), EngineError> {
        self.process_log_entries(std::slice::from_ref(&entry)).await
    }

    pub async fn process_log_entries(&self, entries: &[LogEntry]) -> Result<(), EngineError> {
        let dedup = self.config.ingest.enable_deduplication;
        self.store
            .with_transaction(move |tx| async move {
                ep_store::repo::log_entries::insert_batch(tx, entries, dedup).await
            })
            .await?;
        let dispatch = self.build_dispatch_callback();
        for entry in entries {
            dispatch(entry);
        }
        Ok(())
    }

    pub async fn search_logs(&self, criteria: &SearchCriteria) -> Result<SearchResults, EngineError> {
        ep_engine::search::search(&self.store, criteria).await
    }

    pub async fn get_message_correlation(
        &self,
        message_id: &str,
    ) -> Result<Option<MessageCorrelation>, EngineError> {
        ep_engine::trace::get_message_correlation(&self.store, message_id).await
    }

    pub async fn get_message_delivery_trace(&self, message_id: &str) -> Result<MessageDeliveryTrace, EngineError> {
        ep_engine::trace::build_delivery_trace(&self.store, message_id).await
    }

    pub async fn get_threaded_timeline_view(&self, message_id: &str) -> Result<ThreadedTimelineView, EngineError> {
        ep_engine::trace::build_threaded_view(&self.store, message_id).await
    }

    pub async fn trigger_correlation(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), EngineError> {
        ep_engine::correlator::correlate_window(&self.store, start, end, self.config.correlation.per_message_timeout)
            .await?;
        Ok(())
    }

    pub async fn cleanup_expired_data(&self) -> Result<CleanupResult, EngineError> {
        let result = self.scheduler.retention_engine().run(&self.store, &self.config.retention).await?;
        Ok(result.unwrap_or_default())
    }

    pub async fn get_service_status(&self) -> ServiceStatus {
        let ingest_stats = match self.ingest.lock().await.as_ref() {
            Some(handle) => handle.stats(),
            None => IngestStats::default(),
        };
        ServiceStatus {
            ingest: ingest_stats,
            scheduler: self.scheduler.status().await,
        }
    }

    /// Shutdown order (§5): cancel ingest and wait for its flush grace
    /// window, stop the scheduler, then close the store.
    pub async fn stop(&self) {
        if let Some(handle) = self.ingest.lock().await.take() {
            handle.cancel_and_join().await;
        }
        self.scheduler.stop().await;
        self.store.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ep_types::LogKind;

    async fn test_control_plane() -> ControlPlane {
        let mut config = RuntimeConfig::default();
        config.store.path = ":memory:".to_owned();
        let store = StoreHandle::open_in_memory().await.unwrap();
        let scheduler = Scheduler::new(
            store.clone(),
            config.correlation.clone(),
            config.retention.clone(),
            Duration::from_secs(3600),
        );
        scheduler.start().await.unwrap();
        ControlPlane {
            store,
            scheduler,
            ingest: Mutex::new(None),
            config,
            user_callback: Arc::new(StdMutex::new(None)),
        }
    }

    #[tokio::test]
    async fn processes_entry_and_reports_it_in_search() {
        let control_plane = test_control_plane().await;
        let entry = LogEntry::new_unpersisted(Utc::now(), LogKind::Main, "test line".into());
        control_plane.process_log_entry(entry).await.unwrap();

        let results = control_plane.search_logs(&SearchCriteria::default()).await.unwrap();
        assert_eq!(results.total, 1);
        control_plane.stop().await;
    }

    #[tokio::test]
    async fn service_status_reports_idle_ingest_before_start() {
        let control_plane = test_control_plane().await;
        let status = control_plane.get_service_status().await;
        assert_eq!(status.ingest.lines_read, 0);
        assert!(status.scheduler.running);
        control_plane.stop().await;
    }
}
