use std::{
    fmt,
    path::PathBuf,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Placeholder shown in the result column while a task is still running
pub const PENDING_NOTE: &str = "—";
/// Result note recorded for a successful download
pub const SUCCESS_NOTE: &str = "Succeed";

/// Opaque task handle, unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Requested video quality tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    /// Whatever the engine considers best
    #[default]
    #[serde(rename = "best")]
    Best,
    #[serde(rename = "1080")]
    P1080,
    #[serde(rename = "720")]
    P720,
    #[serde(rename = "480")]
    P480,
    #[serde(rename = "360")]
    P360,
}

impl Quality {
    pub const ALL: [Quality; 5] = [
        Quality::Best,
        Quality::P1080,
        Quality::P720,
        Quality::P480,
        Quality::P360,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Best => "best",
            Quality::P1080 => "1080",
            Quality::P720 => "720",
            Quality::P480 => "480",
            Quality::P360 => "360",
        }
    }

    /// Maximum video height, `None` for [`Quality::Best`]
    pub fn height(self) -> Option<u32> {
        match self {
            Quality::Best => None,
            Quality::P1080 => Some(1080),
            Quality::P720 => Some(720),
            Quality::P480 => Some(480),
            Quality::P360 => Some(360),
        }
    }

    /// Format expression handed to the engine: separate streams capped at the
    /// tier's height, falling back to a single muxed file.
    pub fn format_selector(self) -> String {
        match self.height() {
            None => "bestvideo+bestaudio/best".to_string(),
            Some(h) => format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]"),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown quality '{0}' (expected one of best, 1080, 720, 480, 360)")]
pub struct ParseQualityError(String);

impl FromStr for Quality {
    type Err = ParseQualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_ascii_lowercase();
        let raw = raw.strip_suffix('p').unwrap_or(&raw);
        Quality::ALL
            .into_iter()
            .find(|q| q.as_str() == raw)
            .ok_or_else(|| ParseQualityError(s.to_string()))
    }
}

/// Which authentication cookies a task should use
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CookieChoice {
    /// Let the engine pull cookies from an installed browser
    #[default]
    Auto,
    /// Download anonymously
    None,
    /// Use a Netscape-format cookie file
    File(PathBuf),
}

impl CookieChoice {
    pub fn file(&self) -> Option<&PathBuf> {
        match self {
            CookieChoice::File(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for CookieChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CookieChoice::Auto => f.write_str("auto"),
            CookieChoice::None => f.write_str("none"),
            CookieChoice::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl FromStr for CookieChoice {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "" | "auto" => CookieChoice::Auto,
            "none" => CookieChoice::None,
            path => CookieChoice::File(PathBuf::from(path)),
        })
    }
}

/// Lifecycle of a download task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Created, worker not started yet
    Waiting,
    /// Engine is running
    Downloading,
    /// Engine reported success
    Succeeded,
    /// Engine, cookie resolution or cancellation ended the task
    Failed,
}

impl TaskStatus {
    fn rank(self) -> u8 {
        match self {
            TaskStatus::Waiting => 0,
            TaskStatus::Downloading => 1,
            TaskStatus::Succeeded | TaskStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    /// Statuses only move forward, may skip `Downloading`, and never leave a
    /// terminal state.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Waiting => "Waiting",
            TaskStatus::Downloading => "Downloading",
            TaskStatus::Succeeded => "Succeeded",
            TaskStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of applying an event to a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The event would break the lifecycle and was dropped
    Ignored,
    /// Task state changed (or the event carries no state, like a log line)
    Updated,
    /// The task's single terminal event was accepted
    Terminal,
}

/// One requested download; the registry copy is the source of truth
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Process-unique handle
    pub id: TaskId,
    /// Source URL, trimmed and non-empty
    pub url: String,
    /// Directory the engine writes into
    pub destination_dir: PathBuf,
    /// Requested quality tier
    pub quality: Quality,
    /// Cookie source chosen at submission
    pub cookie_choice: CookieChoice,
    /// Current lifecycle state
    pub status: TaskStatus,
    /// Percentage 0–100
    pub progress: u8,
    /// "—" while pending, "Succeed" or the error text when done
    pub result_note: String,
    /// Set once the terminal event has been accepted
    pub finished_at: Option<DateTime<Local>>,
}

impl Task {
    pub(crate) fn new(
        url: String,
        destination_dir: PathBuf,
        quality: Quality,
        cookie_choice: CookieChoice,
    ) -> Self {
        Self {
            id: TaskId::next(),
            url,
            destination_dir,
            quality,
            cookie_choice,
            status: TaskStatus::Waiting,
            progress: 0,
            result_note: PENDING_NOTE.to_string(),
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Fold one event into the task. Events for other tasks are ignored.
    pub fn apply(&mut self, event: &Event) -> Applied {
        if event.task_id() != Some(self.id) {
            return Applied::Ignored;
        }
        match event {
            Event::Progress { percent, .. } => {
                if self.status.is_terminal() {
                    return Applied::Ignored;
                }
                self.progress = (*percent).min(100);
                Applied::Updated
            }
            Event::StatusChanged { status, .. } => {
                if !self.status.can_transition_to(*status) {
                    return Applied::Ignored;
                }
                self.status = *status;
                Applied::Updated
            }
            Event::LogLine { .. } => Applied::Updated,
            Event::Finished { .. } => self.close(TaskStatus::Succeeded, SUCCESS_NOTE),
            Event::Failed { message, .. } => self.close(TaskStatus::Failed, message),
            Event::CookieNotice { .. } => Applied::Ignored,
        }
    }

    fn close(&mut self, status: TaskStatus, note: &str) -> Applied {
        if self.is_finished() {
            return Applied::Ignored;
        }
        if self.status != status {
            if !self.status.can_transition_to(status) {
                return Applied::Ignored;
            }
            self.status = status;
        }
        self.result_note = note.to_string();
        self.finished_at = Some(Local::now());
        Applied::Terminal
    }
}
