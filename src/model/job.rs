// src/model/job.rs

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::task::{Task, TaskId, TaskSpec, TaskStatus};
use crate::dag::DagGraph;
use crate::errors::{Result, TaskdagError};
use crate::types::ExecutionMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Cross-job scheduling priority. Declaration order is scheduling order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
    Background,
}

impl FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(JobPriority::Critical),
            "high" => Ok(JobPriority::High),
            "normal" => Ok(JobPriority::Normal),
            "low" => Ok(JobPriority::Low),
            "background" => Ok(JobPriority::Background),
            other => Err(format!("invalid job priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Created => "CREATED",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Per-status task counts, kept in step with every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatistics {
    pub total: usize,
    pub pending: usize,
    pub queued: usize,
    pub running: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

impl JobStatistics {
    fn slot(&mut self, status: TaskStatus) -> &mut usize {
        match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::Queued => &mut self.queued,
            TaskStatus::Running => &mut self.running,
            TaskStatus::Retrying => &mut self.retrying,
            TaskStatus::Completed => &mut self.completed,
            TaskStatus::Failed => &mut self.failed,
            TaskStatus::Cancelled => &mut self.cancelled,
            TaskStatus::Skipped => &mut self.skipped,
        }
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Queued => self.queued,
            TaskStatus::Running => self.running,
            TaskStatus::Retrying => self.retrying,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Cancelled => self.cancelled,
            TaskStatus::Skipped => self.skipped,
        }
    }

    pub(crate) fn record_added(&mut self) {
        self.total += 1;
        self.pending += 1;
    }

    pub(crate) fn record_removed(&mut self) {
        self.total -= 1;
        self.pending -= 1;
    }

    pub(crate) fn record_transition(&mut self, from: TaskStatus, to: TaskStatus) {
        *self.slot(from) -= 1;
        *self.slot(to) += 1;
    }

    pub fn terminal(&self) -> usize {
        self.completed + self.failed + self.cancelled + self.skipped
    }

    pub fn active(&self) -> usize {
        self.pending + self.queued + self.running + self.retrying
    }

    pub fn success_rate(&self) -> f64 {
        crate::report::success_rate(self.completed, self.total)
    }
}

/// Read-only view of one task inside a [`JobSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub attempts: u32,
    pub reassignments: u32,
}

/// Immutable copy of a job's state; never aliases engine data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub name: String,
    pub state: JobState,
    pub priority: JobPriority,
    pub statistics: JobStatistics,
    pub tasks: Vec<TaskSnapshot>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A named collection of tasks with declared dependencies.
///
/// Task order is insertion order and is used as the final tie-break when
/// several tasks with equal priority are ready at once.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    tasks: Vec<Task>,
    index: HashMap<TaskId, usize>,
    /// `None` defers to the engine configuration.
    pub execution_mode: Option<ExecutionMode>,
    pub priority: JobPriority,
    statistics: JobStatistics,
    pub(crate) state: JobState,
    pub created_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            tasks: Vec::new(),
            index: HashMap::new(),
            execution_mode: None,
            priority: JobPriority::default(),
            statistics: JobStatistics::default(),
            state: JobState::Created,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = Some(mode);
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a task to the job.
    ///
    /// Dependencies may name tasks that are added later; unknown names are
    /// only rejected by [`Job::validate`]. A dependency that closes a cycle
    /// is rejected here and the task is not added.
    pub fn add_task(&mut self, spec: TaskSpec) -> Result<TaskId> {
        if self.state != JobState::Created {
            return Err(TaskdagError::ConfigError(format!(
                "job '{}' is already {}; tasks cannot be added",
                self.name, self.state
            )));
        }

        let task = Task::from_spec(spec);
        if self.index.contains_key(&task.id) || self.tasks.iter().any(|t| t.name == task.name) {
            return Err(TaskdagError::DuplicateTask(task.id));
        }

        let id = task.id.clone();
        self.index.insert(id.clone(), self.tasks.len());
        self.tasks.push(task);
        self.statistics.record_added();

        if let Some(cycle) = self.cycle_through(self.tasks.len() - 1) {
            self.tasks.pop();
            self.index.remove(&id);
            self.statistics.record_removed();
            return Err(TaskdagError::DependencyCycle(cycle));
        }

        debug!(job = %self.name, task = %id, "task added");
        Ok(id)
    }

    /// Convenience for `add_task` with dependencies given inline.
    pub fn add<I, T>(&mut self, spec: TaskSpec, dependencies: I) -> Result<TaskId>
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.add_task(spec.depends_on(dependencies))
    }

    /// Check that every dependency names a task of this job and that the
    /// graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        for task in &self.tasks {
            for dep in &task.dependencies {
                if dep == &task.id {
                    return Err(TaskdagError::DependencyCycle(vec![task.id.clone()]));
                }
                if !self.index.contains_key(dep) {
                    return Err(TaskdagError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        match self.find_cycle() {
            Some(cycle) => Err(TaskdagError::DependencyCycle(cycle)),
            None => Ok(()),
        }
    }

    /// Cycle that passes through the task at `start`, if any.
    ///
    /// Walks dependency links from `start` only, so adding a task costs the
    /// size of its upstream rather than the whole job.
    fn cycle_through(&self, start: usize) -> Option<Vec<TaskId>> {
        let mut reached_from: HashMap<usize, usize> = HashMap::new();
        let mut seen: HashSet<usize> = HashSet::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            for dep in &self.tasks[node].dependencies {
                let Some(&dep_idx) = self.index.get(dep) else {
                    continue;
                };
                if dep_idx == start {
                    // Members in execution order: start, then back down the walk.
                    let mut members = vec![self.tasks[start].id.clone()];
                    let mut cur = node;
                    while cur != start {
                        members.push(self.tasks[cur].id.clone());
                        match reached_from.get(&cur) {
                            Some(&prev) => cur = prev,
                            None => break,
                        }
                    }
                    return Some(members);
                }
                if seen.insert(dep_idx) {
                    reached_from.insert(dep_idx, node);
                    stack.push(dep_idx);
                }
            }
        }
        None
    }

    fn find_cycle(&self) -> Option<Vec<TaskId>> {
        let graph = DagGraph::from_tasks(&self.tasks);
        graph
            .detect_cycle()
            .map(|members| members.into_iter().map(|i| self.tasks[i].id.clone()).collect())
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub fn index_of(&self, id: &TaskId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn statistics(&self) -> &JobStatistics {
        &self.statistics
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub(crate) fn task_at(&self, idx: usize) -> &Task {
        &self.tasks[idx]
    }

    pub(crate) fn task_at_mut(&mut self, idx: usize) -> &mut Task {
        &mut self.tasks[idx]
    }

    pub(crate) fn tasks_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.iter_mut()
    }

    /// Move a task along one lifecycle edge, keeping statistics in step.
    ///
    /// Returns the previous status.
    pub(crate) fn transition(&mut self, idx: usize, to: TaskStatus) -> Result<TaskStatus> {
        let task = &mut self.tasks[idx];
        let from = task.status;
        if !from.can_transition_to(to) {
            return Err(TaskdagError::InvalidTransition {
                task: task.id.clone(),
                from,
                to,
            });
        }
        task.status = to;
        self.statistics.record_transition(from, to);
        Ok(from)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            name: self.name.clone(),
            state: self.state,
            priority: self.priority,
            statistics: self.statistics.clone(),
            tasks: self
                .tasks
                .iter()
                .map(|t| TaskSnapshot {
                    id: t.id.clone(),
                    name: t.name.clone(),
                    status: t.status,
                    retry_count: t.retry_count,
                    attempts: t.attempts,
                    reassignments: t.reassignments,
                })
                .collect(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}
