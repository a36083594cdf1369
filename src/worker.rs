//! One download task driven against the engine on its own tokio task.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::{
    runtime::Handle,
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cookies::ResolvedCookie;
use crate::engine::{Engine, EngineOutput, EngineRequest, EngineUpdate};
use crate::error::EngineError;
use crate::event::{CANCELLED_MESSAGE, Event, FailureKind};
use crate::model::{Task, TaskId, TaskStatus};
use crate::progress::to_percent;

/// Owned by the orchestrator while the worker runs
#[derive(Debug)]
pub struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Ask the worker to stop. The engine is dropped and a cancelled
    /// failure is reported unless the task already finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

pub struct DownloadWorker {
    id: TaskId,
    request: EngineRequest,
    engine: Arc<dyn Engine>,
    events: UnboundedSender<Event>,
    cancel: CancellationToken,
    last_percent: Option<u8>,
}

enum Outcome {
    Done(Result<(), EngineError>),
    Cancelled,
}

impl DownloadWorker {
    /// Start `task` on `runtime`. `StatusChanged(Downloading)` is already
    /// queued on the returned receiver when this returns.
    pub fn spawn(
        task: &Task,
        cookie: ResolvedCookie,
        engine: Arc<dyn Engine>,
        runtime: &Handle,
    ) -> (WorkerHandle, UnboundedReceiver<Event>) {
        let (events, rx) = unbounded_channel();
        let cancel = CancellationToken::new();
        let request = EngineRequest {
            url: task.url.clone(),
            destination_dir: task.destination_dir.clone(),
            quality: task.quality,
            cookie,
        };

        let _ = events.send(Event::StatusChanged {
            task: task.id,
            status: TaskStatus::Downloading,
        });

        let worker = DownloadWorker {
            id: task.id,
            request,
            engine,
            events,
            cancel: cancel.clone(),
            last_percent: None,
        };
        let join = runtime.spawn(worker.run());
        (WorkerHandle { cancel, join }, rx)
    }

    async fn run(mut self) {
        info!(task = %self.id, url = %self.request.url, quality = %self.request.quality, "download started");

        let outcome = self.drive().await;

        match outcome {
            Outcome::Done(Ok(())) => {
                if self.last_percent.is_none_or(|p| p < 100) {
                    self.emit(Event::Progress { task: self.id, percent: 100 });
                }
                self.emit(Event::StatusChanged {
                    task: self.id,
                    status: TaskStatus::Succeeded,
                });
                self.emit(Event::Finished { task: self.id });
                info!(task = %self.id, "download finished");
            }
            Outcome::Done(Err(err)) => {
                warn!(task = %self.id, error = %err, "download failed");
                self.fail(FailureKind::Engine, err.user_message());
            }
            Outcome::Cancelled => {
                info!(task = %self.id, "download cancelled");
                self.fail(FailureKind::Cancelled, CANCELLED_MESSAGE.to_string());
            }
        }
    }

    /// Run the engine to completion or cancellation. The engine future is
    /// gone by the time this returns.
    async fn drive(&mut self) -> Outcome {
        if self.cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        let dir = &self.request.destination_dir;
        if let Err(err) = tokio::fs::create_dir_all(dir).await {
            return Outcome::Done(Err(EngineError::Io(err)));
        }

        let (output, mut updates) = EngineOutput::channel();
        let engine = Arc::clone(&self.engine);
        let request = self.request.clone();
        let download = AssertUnwindSafe(async move { engine.download(&request, output).await })
            .catch_unwind();
        tokio::pin!(download);

        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Outcome::Cancelled,

                Some(update) = updates.recv() => self.forward(update),

                result = &mut download => {
                    while let Ok(update) = updates.try_recv() {
                        self.forward(update);
                    }
                    return Outcome::Done(match result {
                        Ok(result) => result,
                        Err(payload) => Err(EngineError::Panicked(panic_message(payload))),
                    });
                }
            }
        }
    }

    fn forward(&mut self, update: EngineUpdate) {
        match update {
            EngineUpdate::Progress(raw) => {
                // engines may restart per stream; only forward increases
                let percent = to_percent(raw);
                if self.last_percent.is_none_or(|last| percent > last) {
                    self.last_percent = Some(percent);
                    self.emit(Event::Progress { task: self.id, percent });
                }
            }
            EngineUpdate::Log(text) => self.emit(Event::LogLine { task: self.id, text }),
        }
    }

    fn fail(&self, kind: FailureKind, message: String) {
        self.emit(Event::StatusChanged {
            task: self.id,
            status: TaskStatus::Failed,
        });
        self.emit(Event::Failed {
            task: self.id,
            kind,
            message,
        });
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CookieChoice, Quality};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::time::Duration;

    enum Script {
        Succeed(Vec<f32>),
        Fail(&'static str),
        Hang,
        Panic,
    }

    struct ScriptedEngine(Script);

    #[async_trait]
    impl Engine for ScriptedEngine {
        async fn download(&self, _request: &EngineRequest, output: EngineOutput) -> Result<(), EngineError> {
            match &self.0 {
                Script::Succeed(ticks) => {
                    output.log("[youtube] extracting");
                    for tick in ticks {
                        output.progress(*tick);
                    }
                    Ok(())
                }
                Script::Fail(stderr) => Err(EngineError::Exited {
                    code: Some(1),
                    stderr: stderr.to_string(),
                }),
                Script::Hang => {
                    output.progress(5.0);
                    std::future::pending::<()>().await;
                    Ok(())
                }
                Script::Panic => panic!("engine blew up"),
            }
        }
    }

    fn task(dir: PathBuf) -> Task {
        Task::new(
            "https://example.com/watch?v=1".into(),
            dir,
            Quality::P720,
            CookieChoice::None,
        )
    }

    async fn collect(mut rx: UnboundedReceiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn success_ends_at_one_hundred() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("out");
        let t = task(dest.clone());
        let engine = Arc::new(ScriptedEngine(Script::Succeed(vec![10.0, 10.4, 55.5, 97.0])));
        let (handle, rx) = DownloadWorker::spawn(&t, ResolvedCookie::None, engine, &Handle::current());
        let events = collect(rx).await;
        let id = t.id;

        assert_eq!(
            events,
            vec![
                Event::StatusChanged { task: id, status: TaskStatus::Downloading },
                Event::LogLine { task: id, text: "[youtube] extracting".into() },
                Event::Progress { task: id, percent: 10 },
                Event::Progress { task: id, percent: 55 },
                Event::Progress { task: id, percent: 97 },
                Event::Progress { task: id, percent: 100 },
                Event::StatusChanged { task: id, status: TaskStatus::Succeeded },
                Event::Finished { task: id },
            ]
        );
        assert!(dest.is_dir());
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn reported_hundred_is_not_repeated() {
        let dir = tempfile::tempdir().unwrap();
        let t = task(dir.path().to_path_buf());
        let engine = Arc::new(ScriptedEngine(Script::Succeed(vec![100.0])));
        let (_handle, rx) = DownloadWorker::spawn(&t, ResolvedCookie::None, engine, &Handle::current());
        let events = collect(rx).await;
        let hundreds = events
            .iter()
            .filter(|e| matches!(e, Event::Progress { percent: 100, .. }))
            .count();
        assert_eq!(hundreds, 1);
    }

    #[tokio::test]
    async fn restarted_stream_progress_does_not_regress() {
        let dir = tempfile::tempdir().unwrap();
        let t = task(dir.path().to_path_buf());
        let engine = Arc::new(ScriptedEngine(Script::Succeed(vec![50.0, 100.0, 3.0, 60.0, 100.0])));
        let (_handle, rx) = DownloadWorker::spawn(&t, ResolvedCookie::None, engine, &Handle::current());
        let percents: Vec<u8> = collect(rx)
            .await
            .into_iter()
            .filter_map(|e| match e {
                Event::Progress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![50, 100]);
    }

    #[tokio::test]
    async fn engine_error_becomes_failed_event() {
        let dir = tempfile::tempdir().unwrap();
        let t = task(dir.path().to_path_buf());
        let engine = Arc::new(ScriptedEngine(Script::Fail("ERROR: [youtube] abc: Private video")));
        let (_handle, rx) = DownloadWorker::spawn(&t, ResolvedCookie::None, engine, &Handle::current());
        let events = collect(rx).await;
        let id = t.id;

        assert_eq!(
            &events[events.len() - 2..],
            &[
                Event::StatusChanged { task: id, status: TaskStatus::Failed },
                Event::Failed {
                    task: id,
                    kind: FailureKind::Engine,
                    message: "This video is private.".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        let t = task(dir.path().to_path_buf());
        let engine = Arc::new(ScriptedEngine(Script::Panic));
        let (handle, rx) = DownloadWorker::spawn(&t, ResolvedCookie::None, engine, &Handle::current());
        let events = collect(rx).await;

        match events.last() {
            Some(Event::Failed { kind: FailureKind::Engine, message, .. }) => {
                assert!(message.contains("engine blew up"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn cancel_stops_a_hanging_engine() {
        let dir = tempfile::tempdir().unwrap();
        let t = task(dir.path().to_path_buf());
        let engine = Arc::new(ScriptedEngine(Script::Hang));
        let (handle, mut rx) = DownloadWorker::spawn(&t, ResolvedCookie::None, engine, &Handle::current());
        let id = t.id;

        assert_eq!(
            rx.recv().await,
            Some(Event::StatusChanged { task: id, status: TaskStatus::Downloading })
        );
        assert_eq!(rx.recv().await, Some(Event::Progress { task: id, percent: 5 }));

        handle.cancel();
        let rest = collect(rx).await;
        assert_eq!(
            rest,
            vec![
                Event::StatusChanged { task: id, status: TaskStatus::Failed },
                Event::Failed {
                    task: id,
                    kind: FailureKind::Cancelled,
                    message: CANCELLED_MESSAGE.into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn unusable_destination_fails_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a dir").unwrap();
        let t = task(blocker.join("sub"));
        let engine = Arc::new(ScriptedEngine(Script::Succeed(vec![])));
        let (_handle, rx) = DownloadWorker::spawn(&t, ResolvedCookie::None, engine, &Handle::current());
        let events = collect(rx).await;
        assert!(matches!(
            events.last(),
            Some(Event::Failed { kind: FailureKind::Engine, .. })
        ));
        assert!(!events.iter().any(|e| matches!(e, Event::Finished { .. })));
    }
}
