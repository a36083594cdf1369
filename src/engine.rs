use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::cookies::ResolvedCookie;
use crate::error::EngineError;
use crate::model::Quality;

/// Everything an engine needs to fetch one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRequest {
    pub url: String,
    pub destination_dir: PathBuf,
    pub quality: Quality,
    pub cookie: ResolvedCookie,
}

/// Raw output streamed back while an engine runs
#[derive(Debug, Clone, PartialEq)]
pub enum EngineUpdate {
    /// Percent complete as reported, not yet clamped
    Progress(f32),
    /// Free-text line from the engine
    Log(String),
}

/// Where an engine reports progress and log lines
#[derive(Debug, Clone)]
pub struct EngineOutput(UnboundedSender<EngineUpdate>);

impl EngineOutput {
    pub fn channel() -> (Self, UnboundedReceiver<EngineUpdate>) {
        let (tx, rx) = unbounded_channel();
        (Self(tx), rx)
    }

    pub fn progress(&self, percent: f32) {
        let _ = self.0.send(EngineUpdate::Progress(percent));
    }

    pub fn log(&self, line: impl Into<String>) {
        let _ = self.0.send(EngineUpdate::Log(line.into()));
    }
}

/// External downloader driven by a worker.
///
/// The returned future may be dropped at any point when the task is
/// cancelled; implementations must release processes and handles on drop.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn download(&self, request: &EngineRequest, output: EngineOutput) -> Result<(), EngineError>;
}
