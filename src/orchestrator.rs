//! Task registry: fans submissions out to workers and fans their events back
//! into one ordered stream for the observer.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    sync::{mpsc::UnboundedReceiver, watch},
};
use tracing::{debug, info, warn};

use crate::cookies;
use crate::engine::Engine;
use crate::error::ValidationError;
use crate::event::{Event, EventSink, FailureKind, Observer};
use crate::history::{History, label_for};
use crate::model::{Applied, CookieChoice, Quality, Task, TaskId, TaskStatus};
use crate::worker::{DownloadWorker, WorkerHandle};

pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    runtime: Handle,
    engine: Arc<dyn Engine>,
    observer: Arc<dyn Observer>,
    history: Arc<dyn History>,
    tasks: Mutex<BTreeMap<TaskId, Task>>,
    workers: Mutex<HashMap<TaskId, WorkerHandle>>,
    events: EventSink,
    pending: watch::Sender<usize>,
}

impl Orchestrator {
    /// Build an orchestrator whose workers and dispatcher run on `runtime`.
    pub fn new(
        runtime: Handle,
        engine: Arc<dyn Engine>,
        observer: Arc<dyn Observer>,
        history: Arc<dyn History>,
    ) -> Self {
        let (events, rx) = EventSink::channel();
        let (pending, _) = watch::channel(0);
        let inner = Arc::new(Inner {
            runtime,
            engine,
            observer,
            history,
            tasks: Mutex::new(BTreeMap::new()),
            workers: Mutex::new(HashMap::new()),
            events,
            pending,
        });
        inner.runtime.spawn(dispatch_loop(Arc::downgrade(&inner), rx));
        Self { inner }
    }

    /// Create one task per non-blank URL and start them all.
    ///
    /// Returns the tasks as created (all `Waiting`); later state is visible
    /// through [`Orchestrator::task`] and the observer. A cookie file that
    /// fails validation fails only the task it was resolved for.
    pub fn submit<I, S>(
        &self,
        urls: I,
        destination_dir: impl AsRef<Path>,
        quality: Quality,
        cookie_choice: CookieChoice,
    ) -> Result<Vec<Task>, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls: Vec<String> = urls
            .into_iter()
            .map(|u| u.as_ref().trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(ValidationError::NoUrls);
        }
        let destination_dir = normalize_destination(destination_dir.as_ref())?;

        info!(
            count = urls.len(),
            dir = %destination_dir.display(),
            quality = %quality,
            cookie = %cookie_choice,
            "submitting downloads"
        );

        let inner = &self.inner;
        let mut created = Vec::with_capacity(urls.len());
        for url in urls {
            let task = Task::new(url, destination_dir.clone(), quality, cookie_choice.clone());
            let id = task.id;
            let resolved = cookies::resolve(&cookie_choice, &inner.events);

            inner.tasks.lock().insert(id, task.clone());
            inner.pending.send_modify(|n| *n += 1);

            match resolved {
                Ok(cookie) => {
                    // held across spawn so the handle is registered before the
                    // dispatcher can see this task's terminal event
                    let mut workers = inner.workers.lock();
                    let (handle, rx) =
                        DownloadWorker::spawn(&task, cookie, Arc::clone(&inner.engine), &inner.runtime);
                    workers.insert(id, handle);
                    drop(workers);
                    inner.runtime.spawn(pump(rx, inner.events.clone()));
                }
                Err(err) => {
                    warn!(task = %id, error = %err, "cookie resolution failed");
                    inner.events.emit(Event::StatusChanged {
                        task: id,
                        status: TaskStatus::Failed,
                    });
                    inner.events.emit(Event::Failed {
                        task: id,
                        kind: FailureKind::Cookie,
                        message: err.to_string(),
                    });
                }
            }
            created.push(task);
        }
        Ok(created)
    }

    /// Sender into the observer's ordered stream, for other producers such
    /// as a [`crate::cookies::CookieStore`].
    pub fn event_sink(&self) -> EventSink {
        self.inner.events.clone()
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.inner.tasks.lock().get(&id).cloned()
    }

    /// Snapshot of every task submitted so far, oldest first
    pub fn tasks(&self) -> Vec<Task> {
        self.inner.tasks.lock().values().cloned().collect()
    }

    /// Tasks whose terminal event has not been dispatched yet
    pub fn pending(&self) -> usize {
        *self.inner.pending.borrow()
    }

    /// Request cancellation of one running task. Returns `false` when the
    /// task is unknown or already finished.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.inner.workers.lock().get(&id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Request cancellation of every running task; returns how many were
    /// newly signalled.
    pub fn cancel_all(&self) -> usize {
        let workers = self.inner.workers.lock();
        workers
            .values()
            .filter(|h| !h.is_cancelled())
            .inspect(|h| h.cancel())
            .count()
    }

    /// Resolves once every submitted task has delivered its terminal event
    /// to the observer.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let n = self.cancel_all();
        if n > 0 {
            debug!(count = n, "cancelled running downloads on shutdown");
        }
    }
}

impl Inner {
    fn dispatch(&self, event: Event) {
        let Some(id) = event.task_id() else {
            self.observer.on_event(&event);
            return;
        };

        let outcome = {
            let mut tasks = self.tasks.lock();
            tasks
                .get_mut(&id)
                .map(|task| (task.apply(&event), task.url.clone(), task.status))
        };

        match outcome {
            None => warn!(task = %id, ?event, "event for unknown task dropped"),
            Some((Applied::Ignored, _, status)) => {
                warn!(task = %id, %status, ?event, "event rejected by task lifecycle")
            }
            Some((Applied::Updated, _, _)) => self.observer.on_event(&event),
            Some((Applied::Terminal, url, status)) => {
                self.observer.on_event(&event);
                self.workers.lock().remove(&id);
                self.history.record(&url, label_for(status));
                self.pending.send_modify(|n| *n = n.saturating_sub(1));
                debug!(task = %id, %status, "task retired");
            }
        }
    }
}

async fn dispatch_loop(inner: Weak<Inner>, mut rx: UnboundedReceiver<Event>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.dispatch(event);
    }
}

/// Move one worker's events onto the shared queue, preserving their order
async fn pump(mut rx: UnboundedReceiver<Event>, events: EventSink) {
    while let Some(event) = rx.recv().await {
        events.emit(event);
    }
}

fn normalize_destination(dir: &Path) -> Result<PathBuf, ValidationError> {
    match dir.to_str() {
        Some(s) if s.trim().is_empty() => Err(ValidationError::NoDestination),
        Some(s) => Ok(PathBuf::from(s.trim())),
        None if dir.as_os_str().is_empty() => Err(ValidationError::NoDestination),
        None => Ok(dir.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_is_trimmed() {
        assert_eq!(
            normalize_destination(Path::new("  /tmp/out ")).unwrap(),
            PathBuf::from("/tmp/out")
        );
        assert_eq!(
            normalize_destination(Path::new("   ")),
            Err(ValidationError::NoDestination)
        );
        assert_eq!(normalize_destination(Path::new("")), Err(ValidationError::NoDestination));
    }
}
