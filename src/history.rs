use chrono::{DateTime, Local};
use parking_lot::Mutex;

use crate::model::TaskStatus;

/// History label for a successful task
pub const COMPLETE_LABEL: &str = "Complete";
/// History label for a failed or cancelled task
pub const FAILED_LABEL: &str = "Failed";

pub fn label_for(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Succeeded => COMPLETE_LABEL,
        _ => FAILED_LABEL,
    }
}

/// Receives one record per finished task
pub trait History: Send + Sync {
    fn record(&self, url: &str, status: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub url: String,
    pub status: String,
    pub recorded_at: DateTime<Local>,
}

/// Append-only in-process history
#[derive(Debug, Default)]
pub struct MemoryHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl History for MemoryHistory {
    fn record(&self, url: &str, status: &str) {
        self.entries.lock().push(HistoryEntry {
            url: url.to_string(),
            status: status.to_string(),
            recorded_at: Local::now(),
        });
    }
}
