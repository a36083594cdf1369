//! Concurrent video download orchestration around an external engine
//! (yt-dlp), with cookie management and an ordered event stream.

// Configuration file
pub mod config;
// Cookie resolution and the managed cookie directory
pub mod cookies;
// Engine abstraction
pub mod engine;
// Error types
pub mod error;
// Events and the observer contract
pub mod event;
// Finished-task history
pub mod history;
// tracing-subscriber setup
pub mod logging;
// Data models for download tasks and status
pub mod model;
// Task registry and event dispatch
pub mod orchestrator;
// Progress parsing utilities
pub mod progress;
// One running download
pub mod worker;
// yt-dlp subprocess engine
pub mod ytdlp;

pub use config::AppConfig;
pub use cookies::{CookieSource, CookieStore, ResolvedCookie};
pub use engine::{Engine, EngineOutput, EngineRequest, EngineUpdate};
pub use error::{ConfigError, CookieError, EngineError, Error, Result, ValidationError};
pub use event::{CANCELLED_MESSAGE, Event, EventSink, FailureKind, NoticeLevel, Observer};
pub use history::{History, HistoryEntry, MemoryHistory};
pub use model::{CookieChoice, Quality, Task, TaskId, TaskStatus};
pub use orchestrator::Orchestrator;
pub use worker::{DownloadWorker, WorkerHandle};
pub use ytdlp::YtDlpEngine;
