//! Background Scheduler (C8): three independent periodic loops sharing one
//! cancellation signal, with idempotent start/stop and status reporting.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ep_store::StoreHandle;
use ep_types::config::{CorrelationConfig, RetentionConfig};
use ep_types::SchedulerStatus;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::correlator;
use crate::error::EngineError;
use crate::retention::RetentionEngine;

const METRICS_TABLES: [&str; 6] =
    ["messages", "recipients", "delivery_attempts", "log_entries", "audit_log", "queue_snapshots"];
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Default)]
struct RunTimes {
    correlation_last_run: Option<DateTime<Utc>>,
    cleanup_last_run: Option<DateTime<Utc>>,
    metrics_last_run: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    store: StoreHandle,
    correlation_config: CorrelationConfig,
    retention_config: RetentionConfig,
    metrics_interval: Duration,
    retention: RetentionEngine,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    tasks: Mutex<Option<Vec<JoinHandle<()>>>>,
    times: Arc<StdMutex<RunTimes>>,
}

impl Scheduler {
    pub fn new(
        store: StoreHandle,
        correlation_config: CorrelationConfig,
        retention_config: RetentionConfig,
        metrics_interval: Duration,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            store,
            correlation_config,
            retention_config,
            metrics_interval,
            retention: RetentionEngine::new(),
            cancel_tx,
            cancel_rx,
            tasks: Mutex::new(None),
            times: Arc::new(StdMutex::new(RunTimes::default())),
        }
    }

    /// Idempotent: a second call while already running returns an error
    /// instead of spawning a duplicate set of loops.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            return Err(EngineError::AlreadyRunning("scheduler"));
        }
        let _ = self.cancel_tx.send(false);

        let mut handles = Vec::with_capacity(3);
        handles.push(tokio::spawn(correlation_loop(
            self.store.clone(),
            self.correlation_config.clone(),
            self.cancel_rx.clone(),
            self.times.clone(),
        )));
        handles.push(tokio::spawn(cleanup_loop(
            self.store.clone(),
            self.retention_config.clone(),
            self.retention.clone(),
            self.cancel_rx.clone(),
            self.times.clone(),
        )));
        handles.push(tokio::spawn(metrics_loop(
            self.store.clone(),
            self.metrics_interval,
            self.cancel_rx.clone(),
            self.times.clone(),
        )));
        *tasks = Some(handles);
        Ok(())
    }

    /// Idempotent: stopping an already-stopped scheduler is a no-op.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        let Some(handles) = tasks.take() else { return };
        let _ = self.cancel_tx.send(true);
        for handle in handles {
            if tokio::time::timeout(STOP_GRACE_PERIOD, handle).await.is_err() {
                tracing::warn!("background loop did not stop within the grace period");
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.tasks.lock().await.is_some()
    }

    pub async fn status(&self) -> SchedulerStatus {
        let running = self.is_running().await;
        let times = self.times.lock().expect("scheduler times mutex poisoned");
        SchedulerStatus {
            running,
            correlation_last_run: times.correlation_last_run,
            correlation_next_run: times
                .correlation_last_run
                .and_then(|t| chrono::Duration::from_std(self.correlation_config.interval).ok().map(|d| t + d)),
            cleanup_last_run: times.cleanup_last_run,
            cleanup_next_run: times
                .cleanup_last_run
                .and_then(|t| chrono::Duration::from_std(self.retention_config.cleanup_interval).ok().map(|d| t + d)),
            metrics_last_run: times.metrics_last_run,
            metrics_next_run: times
                .metrics_last_run
                .and_then(|t| chrono::Duration::from_std(self.metrics_interval).ok().map(|d| t + d)),
        }
    }

    pub fn retention_engine(&self) -> &RetentionEngine {
        &self.retention
    }
}

async fn correlation_loop(
    store: StoreHandle,
    config: CorrelationConfig,
    mut cancel: watch::Receiver<bool>,
    times: Arc<StdMutex<RunTimes>>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately; skip it so startup doesn't race ingest
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let end = Utc::now();
                let start = end - chrono::Duration::hours(config.batch_hours);
                match correlator::correlate_window(&store, start, end, config.per_message_timeout).await {
                    Ok(result) => tracing::info!(examined = result.messages_examined, failed = result.messages_failed, "correlation tick complete"),
                    Err(e) => tracing::error!(error = %e, "correlation tick failed"),
                }
                times.lock().expect("scheduler times mutex poisoned").correlation_last_run = Some(Utc::now());
            }
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return;
                }
            }
        }
    }
}

async fn cleanup_loop(
    store: StoreHandle,
    config: RetentionConfig,
    retention: RetentionEngine,
    mut cancel: watch::Receiver<bool>,
    times: Arc<StdMutex<RunTimes>>,
) {
    let mut ticker = tokio::time::interval(config.cleanup_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if config.auto {
                    match retention.run(&store, &config).await {
                        Ok(Some(result)) => tracing::info!(duration_ms = result.duration_ms, "cleanup tick complete"),
                        Ok(None) => tracing::debug!("cleanup tick skipped, previous run still in flight"),
                        Err(e) => tracing::error!(error = %e, "cleanup tick failed"),
                    }
                    times.lock().expect("scheduler times mutex poisoned").cleanup_last_run = Some(Utc::now());
                }
            }
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return;
                }
            }
        }
    }
}

async fn metrics_loop(
    store: StoreHandle,
    interval: Duration,
    mut cancel: watch::Receiver<bool>,
    times: Arc<StdMutex<RunTimes>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let far_future = Utc::now() + chrono::Duration::days(365 * 100);
                for table in METRICS_TABLES {
                    match ep_store::repo::retention::count_older_than(store.pool(), table, "created_at", far_future).await {
                        Ok(count) => tracing::info!(table, count, "table row count snapshot"),
                        Err(e) => tracing::warn!(table, error = %e, "failed to snapshot table row count"),
                    }
                }
                times.lock().expect("scheduler times mutex poisoned").metrics_last_run = Some(Utc::now());
            }
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let scheduler = Scheduler::new(
            store,
            CorrelationConfig::default(),
            RetentionConfig::default(),
            Duration::from_secs(3600),
        );
        scheduler.start().await.unwrap();
        assert!(scheduler.start().await.is_err());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let store = StoreHandle::open_in_memory().await.unwrap();
        let scheduler = Scheduler::new(
            store,
            CorrelationConfig::default(),
            RetentionConfig::default(),
            Duration::from_secs(3600),
        );
        scheduler.start().await.unwrap();
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }
}
