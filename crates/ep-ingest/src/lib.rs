//! Tail Source (C2) and Streaming Ingest Pipeline (C3): turns watched log
//! files into persisted `LogEntry` rows.

pub mod pipeline;
pub mod stats;
pub mod tail;

pub use pipeline::{start, LogEntryCallback, PipelineHandle};
pub use stats::IngestStatsHandle;
pub use tail::{FileOffset, RawLine, WatchedFile};
