// src/model/task.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::work::Work;

/// Opaque task identifier, unique within a job.
///
/// Defaults to the task name when the caller does not supply one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&String> for TaskId {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Retrying,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Pending,
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Retrying,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::Skipped,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Cancelled
                | TaskStatus::Skipped
        )
    }

    /// Still owned by the scheduler: not yet settled.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Whether `self -> next` is an edge of the task lifecycle.
    ///
    /// `RUNNING -> QUEUED` only happens when a distributed worker is lost and
    /// its task is handed back for redispatch.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Queued | Cancelled | Skipped)
                | (Queued, Running | Cancelled)
                | (Running, Completed | Retrying | Failed | Cancelled | Queued)
                | (Retrying, Queued | Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Retrying => "RETRYING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Classification of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// The work itself reported an error.
    Execution,
    /// The per-task timeout elapsed.
    Timeout,
    /// The work panicked.
    Panicked,
    /// The work stopped because it observed cancellation.
    Cancelled,
    /// The distributed worker holding the task was lost too many times.
    WorkerUnreachable,
    /// A dependency never completed, so the task was skipped.
    DependencyFailed,
}

impl fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskErrorKind::Execution => "execution error",
            TaskErrorKind::Timeout => "timeout exceeded",
            TaskErrorKind::Panicked => "panicked",
            TaskErrorKind::Cancelled => "cancelled",
            TaskErrorKind::WorkerUnreachable => "worker unreachable",
            TaskErrorKind::DependencyFailed => "dependency failed",
        };
        f.write_str(s)
    }
}

/// Structured task failure, stored on the task rather than propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Execution, message)
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            TaskErrorKind::Timeout,
            format!("task exceeded its timeout of {}ms", limit.as_millis()),
        )
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Panicked, message)
    }

    pub fn cancelled() -> Self {
        Self::new(TaskErrorKind::Cancelled, "task was cancelled")
    }

    pub fn worker_unreachable(worker: &str, reassignments: u32) -> Self {
        Self::new(
            TaskErrorKind::WorkerUnreachable,
            format!(
                "worker '{worker}' became unreachable; reassignment limit reached after {reassignments} reassignment(s)"
            ),
        )
    }

    pub fn dependency_failed(dependency: &TaskId) -> Self {
        Self::new(
            TaskErrorKind::DependencyFailed,
            format!("dependency '{dependency}' did not complete"),
        )
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::execution(format!("{err:#}"))
    }
}

/// What one attempt of a task's work produced.
pub type WorkResult = std::result::Result<serde_json::Value, TaskError>;

/// A unit of work inside a [`Job`](super::Job).
///
/// Everything except the status-related fields is fixed once the job is
/// submitted. Status and bookkeeping are only mutated by the engine.
#[derive(Clone)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub(crate) work: Arc<dyn Work>,
    /// Tasks that must be `COMPLETED` before this one becomes ready.
    pub dependencies: Vec<TaskId>,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    retries_explicit: bool,
    /// Higher runs first among equally ready tasks.
    pub priority: i32,
    pub timeout: Option<Duration>,
    /// Classification used for per-category breakdowns in reports.
    pub tag: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Cumulative time spent executing, across all attempts.
    pub duration: Duration,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,
    /// Number of attempts that actually started.
    pub attempts: u32,
    /// Backoff delays applied before each retry, in order.
    pub retry_delays: Vec<Duration>,
    /// Times the task was handed back after its worker was lost.
    pub reassignments: u32,
    /// Worker that ran the most recent attempt (distributed mode).
    pub worker_id: Option<String>,
}

impl Task {
    pub(crate) fn from_spec(spec: TaskSpec) -> Self {
        let id = spec.id.unwrap_or_else(|| TaskId::new(spec.name.clone()));

        // Dependencies form a set; keep first occurrence order.
        let mut dependencies: Vec<TaskId> = Vec::with_capacity(spec.dependencies.len());
        for dep in spec.dependencies {
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }

        Self {
            id,
            name: spec.name,
            work: spec.work,
            dependencies,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(0),
            retries_explicit: spec.max_retries.is_some(),
            priority: spec.priority,
            timeout: spec.timeout,
            tag: spec.tag,
            started_at: None,
            finished_at: None,
            duration: Duration::ZERO,
            result: None,
            error: None,
            attempts: 0,
            retry_delays: Vec::new(),
            reassignments: 0,
            worker_id: None,
        }
    }

    /// Fill in engine-wide defaults for fields the caller left unset.
    pub(crate) fn apply_defaults(
        &mut self,
        default_max_retries: u32,
        default_timeout: Option<Duration>,
    ) {
        if !self.retries_explicit {
            self.max_retries = default_max_retries;
        }
        if self.timeout.is_none() {
            self.timeout = default_timeout;
        }
    }

    pub fn work(&self) -> Arc<dyn Work> {
        Arc::clone(&self.work)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("status", &self.status)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Builder describing a task before it is added to a job.
///
/// ```ignore
/// let spec = TaskSpec::new("compile", work_fn(|_ctx| async { Ok(json!(null)) }))
///     .depends_on(["fetch"])
///     .with_max_retries(2)
///     .with_priority(10);
/// ```
#[derive(Clone)]
pub struct TaskSpec {
    pub(crate) id: Option<TaskId>,
    pub(crate) name: String,
    pub(crate) work: Arc<dyn Work>,
    pub(crate) dependencies: Vec<TaskId>,
    pub(crate) max_retries: Option<u32>,
    pub(crate) priority: i32,
    pub(crate) timeout: Option<Duration>,
    pub(crate) tag: Option<String>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, work: impl Work + 'static) -> Self {
        Self::from_shared(name, Arc::new(work))
    }

    pub fn from_shared(name: impl Into<String>, work: Arc<dyn Work>) -> Self {
        Self {
            id: None,
            name: name.into(),
            work,
            dependencies: Vec::new(),
            max_retries: None,
            priority: 0,
            timeout: None,
            tag: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn depends_on<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("max_retries", &self.max_retries)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::work::work_fn;

    fn noop() -> impl Work {
        work_fn(|_ctx| async { Ok(serde_json::Value::Null) })
    }

    #[test]
    fn lifecycle_edges_match_the_table() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Queued));
        assert!(Running.can_transition_to(Queued));

        assert!(!Pending.can_transition_to(Running));
        assert!(!Retrying.can_transition_to(Running));
        assert!(!Queued.can_transition_to(Skipped));
        for terminal in [Completed, Failed, Cancelled, Skipped] {
            for next in TaskStatus::ALL {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn status_serializes_in_upper_case() {
        let json = serde_json::to_string(&TaskStatus::Retrying).unwrap();
        assert_eq!(json, "\"RETRYING\"");
    }

    #[test]
    fn spec_defaults_id_to_name_and_dedups_dependencies() {
        let task = Task::from_spec(TaskSpec::new("b", noop()).depends_on(["a", "a", "c"]));
        assert_eq!(task.id, TaskId::from("b"));
        assert_eq!(task.dependencies, vec![TaskId::from("a"), TaskId::from("c")]);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn defaults_only_fill_unset_fields() {
        let mut implicit = Task::from_spec(TaskSpec::new("a", noop()));
        implicit.apply_defaults(4, Some(Duration::from_secs(1)));
        assert_eq!(implicit.max_retries, 4);
        assert_eq!(implicit.timeout, Some(Duration::from_secs(1)));

        let mut explicit = Task::from_spec(
            TaskSpec::new("b", noop())
                .with_max_retries(0)
                .with_timeout(Duration::from_millis(5)),
        );
        explicit.apply_defaults(4, Some(Duration::from_secs(1)));
        assert_eq!(explicit.max_retries, 0);
        assert_eq!(explicit.timeout, Some(Duration::from_millis(5)));
    }
}
