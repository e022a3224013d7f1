//! Streaming Ingest Pipeline (C3): Read → Parse → Batch → Persist over
//! bounded queues, with reverse-order cancellation and a short flush grace
//! window on shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use ep_store::StoreHandle;
use ep_types::config::IngestConfig;
use ep_types::LogEntry;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::stats::IngestStatsHandle;
use crate::tail::{self, FileOffset, RawLine, WatchedFile};

pub type LogEntryCallback = Arc<dyn Fn(&LogEntry) + Send + Sync>;

const FLUSH_GRACE_WINDOW: Duration = Duration::from_secs(1);

pub struct PipelineHandle {
    cancel_tx: watch::Sender<bool>,
    stats: IngestStatsHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn stats(&self) -> ep_types::IngestStats {
        self.stats.snapshot()
    }

    /// Cancels reading first, then waits for every stage to drain in
    /// order. Safe to call more than once; subsequent calls are no-ops.
    pub async fn cancel_and_join(mut self) {
        let _ = self.cancel_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

pub fn start(
    files: Vec<(WatchedFile, FileOffset)>,
    config: IngestConfig,
    store: StoreHandle,
    source_tz: Tz,
    poll_interval: Duration,
    callback: Option<LogEntryCallback>,
) -> PipelineHandle {
    let stats = IngestStatsHandle::new();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let (raw_tx, raw_rx) = mpsc::channel::<RawLine>(config.queue_depth);
    let raw_rx = Arc::new(Mutex::new(raw_rx));

    for (watched, offset) in files {
        let tx = raw_tx.clone();
        let cancel_rx = cancel_rx.clone();
        let stats = stats.clone();
        tasks.push(tokio::spawn(tail::run(
            watched,
            offset,
            tx,
            cancel_rx,
            poll_interval,
            stats,
        )));
    }
    drop(raw_tx);

    let (parsed_tx, parsed_rx) = mpsc::channel::<LogEntry>(config.queue_depth);
    for _ in 0..config.parse_workers {
        let raw_rx = raw_rx.clone();
        let parsed_tx = parsed_tx.clone();
        let stats = stats.clone();
        tasks.push(tokio::spawn(parse_worker(raw_rx, parsed_tx, stats, source_tz)));
    }
    drop(parsed_tx);

    let (batch_tx, batch_rx) = mpsc::channel::<Vec<LogEntry>>(4);
    let batcher_stats = stats.clone();
    tasks.push(tokio::spawn(batcher(
        parsed_rx,
        batch_tx,
        config.batch_size,
        config.flush_interval,
        batcher_stats,
    )));

    let persist_stats = stats.clone();
    tasks.push(tokio::spawn(persister(
        batch_rx,
        store,
        config.enable_deduplication,
        persist_stats,
        callback,
    )));

    PipelineHandle { cancel_tx, stats, tasks }
}

async fn parse_worker(
    raw_rx: Arc<Mutex<mpsc::Receiver<RawLine>>>,
    parsed_tx: mpsc::Sender<LogEntry>,
    stats: IngestStatsHandle,
    source_tz: Tz,
) {
    loop {
        let item = {
            let mut rx = raw_rx.lock().await;
            rx.recv().await
        };
        let Some(raw) = item else { return };
        stats.set_current_file(Some(raw.source_path.display().to_string()));
        if let Some(entry) = ep_parser::parse(&raw.line, raw.log_kind, source_tz) {
            stats.inc_lines_parsed();
            if parsed_tx.send(entry).await.is_err() {
                return;
            }
        }
    }
}

async fn batcher(
    mut parsed_rx: mpsc::Receiver<LogEntry>,
    batch_tx: mpsc::Sender<Vec<LogEntry>>,
    batch_size: usize,
    flush_interval: Duration,
    stats: IngestStatsHandle,
) {
    let mut buffer: Vec<LogEntry> = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_entry = parsed_rx.recv() => {
                match maybe_entry {
                    Some(entry) => {
                        buffer.push(entry);
                        if buffer.len() >= batch_size {
                            flush(&mut buffer, &batch_tx, &stats).await;
                        }
                    }
                    None => {
                        // Upstream closed: final flush within a short grace
                        // window, otherwise the residual batch is discarded.
                        if !buffer.is_empty() {
                            let leftover = std::mem::take(&mut buffer);
                            let n = leftover.len() as u64;
                            if tokio::time::timeout(FLUSH_GRACE_WINDOW, batch_tx.send(leftover))
                                .await
                                .is_err()
                            {
                                tracing::warn!(n, "flush grace window expired, discarding residual batch");
                                for _ in 0..n {
                                    stats.inc_dropped_lines();
                                }
                            }
                        }
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&mut buffer, &batch_tx, &stats).await;
                }
            }
        }
    }
}

async fn flush(
    buffer: &mut Vec<LogEntry>,
    batch_tx: &mpsc::Sender<Vec<LogEntry>>,
    stats: &IngestStatsHandle,
) {
    let batch = std::mem::take(buffer);
    stats.inc_batches_processed();
    if batch_tx.send(batch).await.is_err() {
        // Persist stage gone; nothing more we can do.
    }
}

async fn persister(
    mut batch_rx: mpsc::Receiver<Vec<LogEntry>>,
    store: StoreHandle,
    dedup: bool,
    stats: IngestStatsHandle,
    callback: Option<LogEntryCallback>,
) {
    while let Some(batch) = batch_rx.recv().await {
        let len = batch.len();
        let result = store
            .with_transaction(|tx| {
                let batch = &batch;
                async move { ep_store::repo::log_entries::insert_batch(tx, batch, dedup).await }
            })
            .await;

        match result {
            Ok(inserted) => {
                stats.add_entries_stored(inserted);
                if let Some(cb) = &callback {
                    for entry in &batch {
                        cb(entry);
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, batch_len = len, "batch persist failed, whole batch abandoned");
                stats.inc_errors();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::UTC;
    use ep_store::StoreHandle;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn pipeline_persists_parsed_lines_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.log");
        std::fs::write(
            &path,
            "2024-01-15 10:30:45 1rABCD-123456-78 <= sender@example.com H=mail.example.com S=10\n",
        )
        .unwrap();

        let store = StoreHandle::open_in_memory().await.unwrap();
        let mut config = IngestConfig::default();
        config.flush_interval = StdDuration::from_millis(50);
        config.batch_size = 10;

        let watched = WatchedFile { path: path.clone(), log_kind: ep_types::LogKind::Main };
        let handle = start(
            vec![(watched, FileOffset::default())],
            config,
            store.clone(),
            UTC,
            StdDuration::from_millis(20),
            None,
        );

        tokio::time::sleep(StdDuration::from_millis(300)).await;
        handle.cancel_and_join().await;

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM log_entries")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
