// src/report/result.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::model::{Job, JobId, JobState, Task, TaskError, TaskId, TaskStatus};

/// Final record of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub retry_count: u32,
    pub reassignments: u32,
    pub duration_ms: u64,
    #[serde(default)]
    pub retry_delays_ms: Vec<u64>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<TaskError>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub worker_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskResult {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            name: task.name.clone(),
            status: task.status,
            attempts: task.attempts,
            retry_count: task.retry_count,
            reassignments: task.reassignments,
            duration_ms: millis(task.duration),
            retry_delays_ms: task.retry_delays.iter().copied().map(millis).collect(),
            result: task.result.clone(),
            error: task.error.clone(),
            tag: task.tag.clone(),
            worker_id: task.worker_id.clone(),
            started_at: task.started_at,
            finished_at: task.finished_at,
        }
    }
}

/// Outcome of executing one job. Always produced, even when every task
/// failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub job_id: JobId,
    pub job_name: String,
    pub state: JobState,
    /// Strategy the job actually ran with.
    pub strategy: String,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub skipped_tasks: usize,
    pub cancelled_tasks: usize,
    pub duration_ms: u64,
    pub success_rate: f64,
    pub task_results: Vec<TaskResult>,
    /// Job-level problems such as a job timeout or losing every worker.
    #[serde(default)]
    pub execution_errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchResult {
    pub(crate) fn from_job(
        job: &Job,
        strategy: impl Into<String>,
        duration: std::time::Duration,
        execution_errors: Vec<String>,
    ) -> Self {
        let stats = job.statistics();
        Self {
            job_id: job.id,
            job_name: job.name.clone(),
            state: job.state(),
            strategy: strategy.into(),
            total_tasks: stats.total,
            completed_tasks: stats.completed,
            failed_tasks: stats.failed,
            skipped_tasks: stats.skipped,
            cancelled_tasks: stats.cancelled,
            duration_ms: millis(duration),
            success_rate: stats.success_rate(),
            task_results: job.tasks().iter().map(TaskResult::from).collect(),
            execution_errors,
            started_at: job.started_at(),
            finished_at: job.finished_at(),
        }
    }

    /// `false` whenever a task failed or the job recorded an execution error.
    pub fn is_successful(&self) -> bool {
        self.failed_tasks == 0 && self.execution_errors.is_empty()
    }

    pub fn task(&self, id: impl Into<TaskId>) -> Option<&TaskResult> {
        let id = id.into();
        self.task_results.iter().find(|t| t.task_id == id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
