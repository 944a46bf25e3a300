// src/report/progress.rs

//! Progress events and listeners.
//!
//! Listeners are called synchronously by whichever task detected the
//! transition, after the job lock has been released. A listener that
//! panics is logged and skipped; it never affects scheduling. Listeners that
//! want asynchronous delivery can use [`ChannelListener`].

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::model::{JobId, JobState, TaskId, TaskStatus};

/// Status on either side of a transition: task-level or job-level.
///
/// Serialized as `{"scope": "task" | "job", "state": ...}` since the two
/// enums share names like `RUNNING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "state", rename_all = "lowercase")]
pub enum ProgressState {
    Task(TaskStatus),
    Job(JobState),
}

impl fmt::Display for ProgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressState::Task(s) => fmt::Display::fmt(s, f),
            ProgressState::Job(s) => fmt::Display::fmt(s, f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    /// `None` for job-level transitions.
    pub task_id: Option<TaskId>,
    pub old_status: ProgressState,
    pub new_status: ProgressState,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn task(job_id: JobId, task_id: TaskId, old: TaskStatus, new: TaskStatus) -> Self {
        Self {
            job_id,
            task_id: Some(task_id),
            old_status: ProgressState::Task(old),
            new_status: ProgressState::Task(new),
            timestamp: Utc::now(),
        }
    }

    pub fn job(job_id: JobId, old: JobState, new: JobState) -> Self {
        Self {
            job_id,
            task_id: None,
            old_status: ProgressState::Job(old),
            new_status: ProgressState::Job(new),
            timestamp: Utc::now(),
        }
    }

    pub fn is_job_level(&self) -> bool {
        self.task_id.is_none()
    }
}

/// Receives every status transition.
pub trait ProgressListener: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Fan-out to every registered listener.
#[derive(Default)]
pub struct ProgressRegistry {
    listeners: RwLock<Vec<Arc<dyn ProgressListener>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn ProgressListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn broadcast(&self, events: &[ProgressEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for event in events {
            for listener in &listeners {
                if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                    error!(
                        job = %event.job_id,
                        task = ?event.task_id,
                        "progress listener panicked; continuing"
                    );
                }
            }
        }
    }
}

impl fmt::Debug for ProgressRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Logs every transition through `tracing`.
#[derive(Debug, Default)]
pub struct TracingListener;

impl ProgressListener for TracingListener {
    fn on_event(&self, event: &ProgressEvent) {
        match (&event.task_id, event.new_status) {
            (None, _) => info!(
                job = %event.job_id,
                from = %event.old_status,
                to = %event.new_status,
                "job state changed"
            ),
            (Some(task), ProgressState::Task(TaskStatus::Failed)) => warn!(
                job = %event.job_id,
                task = %task,
                from = %event.old_status,
                "task failed"
            ),
            (Some(task), _) => info!(
                job = %event.job_id,
                task = %task,
                from = %event.old_status,
                to = %event.new_status,
                "task status changed"
            ),
        }
    }
}

/// Keeps every event in memory; handy in tests.
#[derive(Debug, Default)]
pub struct CollectingListener {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Task-level transitions of one task, in order.
    pub fn transitions_of(&self, task: &TaskId) -> Vec<(ProgressState, ProgressState)> {
        self.events()
            .into_iter()
            .filter(|e| e.task_id.as_ref() == Some(task))
            .map(|e| (e.old_status, e.new_status))
            .collect()
    }
}

impl ProgressListener for CollectingListener {
    fn on_event(&self, event: &ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Hands events to a bounded channel for asynchronous consumers.
///
/// When the channel is full the event is dropped with a warning; the engine
/// never waits on a slow consumer.
#[derive(Debug)]
pub struct ChannelListener {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelListener {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ProgressListener for ChannelListener {
    fn on_event(&self, event: &ProgressEvent) {
        if let Err(err) = self.tx.try_send(event.clone()) {
            warn!(job = %event.job_id, error = %err, "dropping progress event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event() -> ProgressEvent {
        ProgressEvent::task(
            JobId::new(),
            TaskId::from("t"),
            TaskStatus::Pending,
            TaskStatus::Queued,
        )
    }

    fn broken_listener(_event: &ProgressEvent) {
        panic!("listener bug");
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let registry = ProgressRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        registry.register(Arc::new(broken_listener));
        let counter = Arc::clone(&seen);
        registry.register(Arc::new(move |_e: &ProgressEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        registry.broadcast(&[event(), event()]);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn collecting_listener_filters_by_task() {
        let listener = CollectingListener::new();
        listener.on_event(&event());
        let other = ProgressEvent::task(
            JobId::new(),
            TaskId::from("u"),
            TaskStatus::Pending,
            TaskStatus::Skipped,
        );
        listener.on_event(&other);

        let t = listener.transitions_of(&TaskId::from("t"));
        assert_eq!(
            t,
            vec![(
                ProgressState::Task(TaskStatus::Pending),
                ProgressState::Task(TaskStatus::Queued)
            )]
        );
    }

    #[tokio::test]
    async fn channel_listener_drops_when_full() {
        let (listener, mut rx) = ChannelListener::new(1);
        listener.on_event(&event());
        listener.on_event(&event());
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn event_json_shape() {
        let value = serde_json::to_value(event()).unwrap();
        assert_eq!(value["old_status"]["scope"], "task");
        assert_eq!(value["old_status"]["state"], "PENDING");
        assert_eq!(value["new_status"]["state"], "QUEUED");
        assert_eq!(value["task_id"], "t");
    }

    #[test]
    fn job_events_keep_their_scope_through_json() {
        for (old, new) in [
            (JobState::Created, JobState::Running),
            (JobState::Running, JobState::Completed),
            (JobState::Running, JobState::Failed),
            (JobState::Running, JobState::Cancelled),
        ] {
            let event = ProgressEvent::job(JobId::new(), old, new);
            let wire = serde_json::to_string(&event).unwrap();
            let back: ProgressEvent = serde_json::from_str(&wire).unwrap();
            assert_eq!(back, event);
            assert_eq!(back.new_status, ProgressState::Job(new));
        }
    }
}
