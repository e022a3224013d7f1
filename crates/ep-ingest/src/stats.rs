//! Thread-safe ingest counters (§4.3) shared across every pipeline task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use ep_types::IngestStats;

#[derive(Default)]
struct Counters {
    files_processed: AtomicU64,
    lines_read: AtomicU64,
    lines_parsed: AtomicU64,
    entries_stored: AtomicU64,
    batches_processed: AtomicU64,
    errors: AtomicU64,
    truncated_lines: AtomicU64,
    dropped_lines: AtomicU64,
}

struct CurrentFile(Mutex<Option<String>>);

impl Default for CurrentFile {
    fn default() -> Self {
        Self(Mutex::new(None))
    }
}

#[derive(Clone)]
pub struct IngestStatsHandle {
    counters: Arc<Counters>,
    current_file: Arc<CurrentFile>,
    started_at: Instant,
}

impl IngestStatsHandle {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            current_file: Arc::new(CurrentFile::default()),
            started_at: Instant::now(),
        }
    }

    pub fn inc_files_processed(&self) {
        self.counters.files_processed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_lines_read(&self) {
        self.counters.lines_read.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_lines_parsed(&self) {
        self.counters.lines_parsed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn add_entries_stored(&self, n: u64) {
        self.counters.entries_stored.fetch_add(n, Ordering::Relaxed);
    }
    pub fn inc_batches_processed(&self) {
        self.counters.batches_processed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_errors(&self) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_truncated_lines(&self) {
        self.counters.truncated_lines.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_dropped_lines(&self) {
        self.counters.dropped_lines.fetch_add(1, Ordering::Relaxed);
    }
    pub fn set_current_file(&self, path: Option<String>) {
        *self.current_file.0.lock().expect("stats mutex poisoned") = path;
    }

    pub fn snapshot(&self) -> IngestStats {
        let elapsed = self.started_at.elapsed().as_secs_f64().max(0.001);
        let lines_read = self.counters.lines_read.load(Ordering::Relaxed);
        let entries_stored = self.counters.entries_stored.load(Ordering::Relaxed);
        IngestStats {
            files_processed: self.counters.files_processed.load(Ordering::Relaxed),
            lines_read,
            lines_parsed: self.counters.lines_parsed.load(Ordering::Relaxed),
            entries_stored,
            batches_processed: self.counters.batches_processed.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            truncated_lines: self.counters.truncated_lines.load(Ordering::Relaxed),
            dropped_lines: self.counters.dropped_lines.load(Ordering::Relaxed),
            current_file: self.current_file.0.lock().expect("stats mutex poisoned").clone(),
            lines_per_second: lines_read as f64 / elapsed,
            entries_per_second: entries_stored as f64 / elapsed,
        }
    }
}

impl Default for IngestStatsHandle {
    fn default() -> Self {
        Self::new()
    }
}
