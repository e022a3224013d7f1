pub mod attempts;
pub mod audit;
pub mod log_entries;
pub mod messages;
pub mod notes;
pub mod queue_snapshots;
pub mod recipients;
pub mod retention;
pub mod tags;
