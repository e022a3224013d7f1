//! Search predicate and result DTOs for the Search Engine (C9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{LogEntry, LogEvent, LogKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl Default for SortField {
    fn default() -> Self {
        Self::Timestamp
    }
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::Desc
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
    pub sender: Option<String>,
    pub host: Option<String>,
    pub error_code: Option<String>,
    pub recipients: Option<String>,
    pub log_kinds: Option<Vec<LogKind>>,
    pub events: Option<Vec<LogEvent>>,
    pub status: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub sort_by: SortField,
    #[serde(default)]
    pub sort_order: SortOrder,
}

pub const DEFAULT_SEARCH_LIMIT: u32 = 100;
pub const MAX_SEARCH_LIMIT: u32 = 1000;

impl SearchCriteria {
    /// The effective limit after applying default and hard cap.
    pub fn effective_limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .min(MAX_SEARCH_LIMIT)
    }

    pub fn effective_offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Aggregations {
    pub by_event: Vec<(LogEvent, u64)>,
    pub by_log_kind: Vec<(LogKind, u64)>,
    pub by_status: Vec<(String, u64)>,
    /// Hour-bucketed counts, keyed by the hour-truncated UTC timestamp.
    pub by_hour: Vec<(DateTime<Utc>, u64)>,
    pub top_senders: Vec<(String, u64)>,
    pub top_hosts: Vec<(String, u64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    pub entries: Vec<LogEntry>,
    pub total: u64,
    pub duration_ms: u64,
    pub aggregations: Aggregations,
}
