//! Events flowing from workers and the cookie store to whoever is watching.
//!
//! Every producer writes into an [`EventSink`]; the orchestrator drains the
//! shared queue on a single dispatcher task, so an [`Observer`] sees one
//! ordered stream no matter how many workers are running.

use std::fmt;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::model::{TaskId, TaskStatus};

/// Message shown for a task stopped on request
pub const CANCELLED_MESSAGE: &str = "Cancelled";

/// Severity of a cookie notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl NoticeLevel {
    /// Prefix the desktop log panel puts in front of a notice
    pub fn icon(self) -> &'static str {
        match self {
            NoticeLevel::Info => "ℹ️",
            NoticeLevel::Warning => "⚠️",
            NoticeLevel::Error => "❌",
            NoticeLevel::Success => "✅",
        }
    }
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
            NoticeLevel::Success => "success",
        })
    }
}

/// Why a task failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The engine reported an error or could not be run
    Engine,
    /// The chosen cookie file could not be used
    Cookie,
    /// Cancellation was requested
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Progress { task: TaskId, percent: u8 },
    StatusChanged { task: TaskId, status: TaskStatus },
    LogLine { task: TaskId, text: String },
    CookieNotice { level: NoticeLevel, text: String },
    Finished { task: TaskId },
    Failed { task: TaskId, kind: FailureKind, message: String },
}

impl Event {
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Event::Progress { task, .. }
            | Event::StatusChanged { task, .. }
            | Event::LogLine { task, .. }
            | Event::Finished { task }
            | Event::Failed { task, .. } => Some(*task),
            Event::CookieNotice { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Finished { .. } | Event::Failed { .. })
    }
}

/// Sending half of an event queue. Cloning is cheap; sends never block and
/// are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct EventSink(UnboundedSender<Event>);

impl EventSink {
    pub fn channel() -> (Self, UnboundedReceiver<Event>) {
        let (tx, rx) = unbounded_channel();
        (Self(tx), rx)
    }

    pub fn emit(&self, event: Event) {
        let _ = self.0.send(event);
    }

    pub fn notice(&self, level: NoticeLevel, text: impl Into<String>) {
        self.emit(Event::CookieNotice {
            level,
            text: text.into(),
        });
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Consumer of the event stream (UI rows, log panes, tests).
///
/// Calls come from the orchestrator's dispatcher task, one at a time, and may
/// reference tasks the observer no longer tracks; those should be ignored.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> Observer for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

impl Observer for UnboundedSender<Event> {
    fn on_event(&self, event: &Event) {
        let _ = self.send(event.clone());
    }
}

impl<A: Observer, B: Observer> Observer for (A, B) {
    fn on_event(&self, event: &Event) {
        self.0.on_event(event);
        self.1.on_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn sink_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.notice(NoticeLevel::Info, "first");
        sink.notice(NoticeLevel::Success, "second");
        match rx.try_recv().unwrap() {
            Event::CookieNotice { level, text } => {
                assert_eq!(level, NoticeLevel::Info);
                assert_eq!(text, "first");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            Event::CookieNotice { level: NoticeLevel::Success, .. }
        ));
    }

    #[test]
    fn emit_after_receiver_dropped_is_silent() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        assert!(sink.is_closed());
        sink.notice(NoticeLevel::Error, "nobody listens");
    }

    #[test]
    fn pair_observer_fans_out() {
        let seen = Mutex::new(Vec::new());
        let (tx, mut rx) = unbounded_channel();
        let pair = (|e: &Event| seen.lock().unwrap().push(e.clone()), tx);
        let event = Event::CookieNotice {
            level: NoticeLevel::Warning,
            text: "x".into(),
        };
        pair.on_event(&event);
        assert_eq!(seen.lock().unwrap().as_slice(), &[event.clone()]);
        assert_eq!(rx.try_recv().unwrap(), event);
    }

    #[test]
    fn terminal_events() {
        let id = TaskId::next();
        assert!(Event::Finished { task: id }.is_terminal());
        assert!(
            Event::Failed {
                task: id,
                kind: FailureKind::Cancelled,
                message: CANCELLED_MESSAGE.into()
            }
            .is_terminal()
        );
        assert!(!Event::Progress { task: id, percent: 1 }.is_terminal());
        assert_eq!(
            Event::CookieNotice {
                level: NoticeLevel::Info,
                text: String::new()
            }
            .task_id(),
            None
        );
    }
}
