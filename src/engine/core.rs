// src/engine/core.rs

//! Pure per-job state machine.
//!
//! [`JobCore`] owns one job and everything needed to decide what happens
//! next: the dependency resolver, the retry policy and the failure policy.
//! It consumes backend notifications (attempt started, attempt finished,
//! worker lost) and updates task states, statistics and the ready frontier.
//!
//! The core performs no IO and never waits. The async driver in
//! [`runtime`](super::runtime) feeds it events and acts on what it returns;
//! this keeps every scheduling rule unit-testable without a runtime.

use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::strategy::Strategy;
use crate::config::EngineConfig;
use crate::dag::{DagGraph, DependencyResolver};
use crate::exec::Dispatch;
use crate::model::{
    Job, JobSnapshot, JobState, TaskError, TaskErrorKind, TaskId, TaskStatus, WorkResult,
};
use crate::report::{BatchResult, ProgressEvent};
use crate::retry::RetryPolicy;
use crate::types::FailurePolicy;

/// Why a job stopped dispatching before running out of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// The caller cancelled the job.
    Cancelled,
    /// A task failed under the fail-fast policy.
    FailFast,
    /// `job_timeout` elapsed.
    JobTimeout(Duration),
    /// The distributed pool has no reachable worker left.
    WorkersLost,
    /// The backend refused a dispatch.
    Backend(String),
    /// Work remained but nothing was running or waiting to run.
    Stalled,
}

impl HaltReason {
    fn execution_error(&self) -> Option<String> {
        match self {
            HaltReason::Cancelled | HaltReason::FailFast => None,
            HaltReason::JobTimeout(limit) => {
                Some(format!("job timed out after {}ms", limit.as_millis()))
            }
            HaltReason::WorkersLost => Some("no reachable workers remain".to_string()),
            HaltReason::Backend(msg) => Some(format!("backend error: {msg}")),
            HaltReason::Stalled => {
                Some("scheduling stalled with unfinished tasks".to_string())
            }
        }
    }
}

/// Per-job knobs taken from the engine configuration.
#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub retry: RetryPolicy,
    pub policy: FailurePolicy,
    pub max_reassignments: u32,
}

impl CoreSettings {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            retry: RetryPolicy::from_config(cfg),
            policy: cfg.failure_policy(),
            max_reassignments: cfg.max_reassignments,
        }
    }
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[derive(Debug)]
pub struct JobCore {
    job: Job,
    resolver: DependencyResolver,
    settings: CoreSettings,
    strategy: Strategy,
    /// Current lease per task; `0` means no dispatch is outstanding.
    leases: Vec<u64>,
    next_lease: u64,
    halted: Option<HaltReason>,
    execution_errors: Vec<String>,
    events: Vec<ProgressEvent>,
    started: Option<Instant>,
    outcome: Option<BatchResult>,
}

impl JobCore {
    /// The job must already be validated.
    pub fn new(job: Job, strategy: Strategy, settings: CoreSettings) -> Self {
        let graph = DagGraph::from_tasks(job.tasks());
        let priorities = job.tasks().iter().map(|t| t.priority).collect();
        let resolver = DependencyResolver::new(graph, priorities);
        let leases = vec![0; job.len()];

        Self {
            job,
            resolver,
            settings,
            strategy,
            leases,
            next_lease: 0,
            halted: None,
            execution_errors: Vec::new(),
            events: Vec::new(),
            started: None,
            outcome: None,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.job.snapshot()
    }

    pub fn halt_reason(&self) -> Option<&HaltReason> {
        self.halted.as_ref()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// No task is pending, queued, running or waiting to retry.
    pub fn is_drained(&self) -> bool {
        self.job.statistics().active() == 0
    }

    pub fn result(&self) -> Option<&BatchResult> {
        self.outcome.as_ref()
    }

    /// Pending tasks whose dependencies are all settled, in dispatch order.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.resolver
            .ready_tasks()
            .into_iter()
            .filter(|&idx| self.job.task_at(idx).status == TaskStatus::Pending)
            .map(|idx| self.job.task_at(idx).id.clone())
            .collect()
    }

    /// Progress events produced since the last call.
    pub fn take_events(&mut self) -> Vec<ProgressEvent> {
        std::mem::take(&mut self.events)
    }

    /// Move the job from `CREATED` to `RUNNING`.
    ///
    /// Returns `false` if the job already left `CREATED` (e.g. it was
    /// cancelled before it started).
    pub fn start(&mut self) -> bool {
        if self.job.state != JobState::Created {
            return false;
        }
        self.started = Some(Instant::now());
        self.job.started_at = Some(Utc::now());
        self.set_job_state(JobState::Running);
        info!(
            job = %self.job.id,
            name = %self.job.name,
            tasks = self.job.len(),
            strategy = %self.strategy,
            "job started"
        );
        true
    }

    /// Pop up to `limit` ready tasks and turn them into dispatches.
    ///
    /// Each dispatch gets a fresh lease and a child of `parent` as its
    /// cancellation token. Nothing is handed out once the job is halted.
    pub fn take_ready(&mut self, limit: usize, parent: &CancellationToken) -> Vec<Dispatch> {
        let mut cohort = Vec::new();
        if self.halted.is_some() || self.job.state != JobState::Running {
            return cohort;
        }

        while cohort.len() < limit {
            let Some(idx) = self.resolver.pop_ready() else {
                break;
            };
            match self.job.task_at(idx).status {
                TaskStatus::Pending | TaskStatus::Retrying => {
                    if !self.set_status(idx, TaskStatus::Queued) {
                        continue;
                    }
                }
                // Handed back after a lost worker.
                TaskStatus::Queued => {}
                _ => continue,
            }

            self.next_lease += 1;
            let lease = self.next_lease;
            self.leases[idx] = lease;

            let task = self.job.task_at(idx);
            debug!(
                job = %self.job.id,
                task = %task.id,
                lease,
                attempt = task.attempts + 1,
                "task dispatched"
            );
            cohort.push(Dispatch {
                job_id: self.job.id,
                index: idx,
                lease,
                task_id: task.id.clone(),
                name: task.name.clone(),
                attempt: task.attempts + 1,
                work: task.work(),
                timeout: task.timeout,
                cancel: parent.child_token(),
            });
        }
        cohort
    }

    /// An attempt began executing.
    pub fn mark_running(&mut self, idx: usize, lease: u64, worker_id: Option<String>) {
        if !self.lease_matches(idx, lease) || self.job.task_at(idx).status != TaskStatus::Queued {
            return;
        }
        if !self.set_status(idx, TaskStatus::Running) {
            return;
        }
        let task = self.job.task_at_mut(idx);
        task.attempts += 1;
        task.started_at.get_or_insert_with(Utc::now);
        if worker_id.is_some() {
            task.worker_id = worker_id;
        }
    }

    /// Record the outcome of an attempt.
    ///
    /// Returns the backoff delay when the task should be retried; the caller
    /// must then call [`retry_due`](Self::retry_due) with the same lease once
    /// the delay has elapsed. Outcomes carrying a stale lease are ignored.
    pub fn record_outcome(
        &mut self,
        idx: usize,
        lease: u64,
        outcome: WorkResult,
        elapsed: Duration,
    ) -> Option<Duration> {
        if !self.lease_matches(idx, lease) {
            debug!(job = %self.job.id, index = idx, lease, "ignoring stale outcome");
            return None;
        }
        if self.job.task_at(idx).status == TaskStatus::Queued {
            self.mark_running(idx, lease, None);
        }
        if self.job.task_at(idx).status != TaskStatus::Running {
            return None;
        }

        self.job.task_at_mut(idx).duration += elapsed;

        let err = match outcome {
            Ok(value) => {
                let task = self.job.task_at_mut(idx);
                task.result = Some(value);
                task.error = None;
                self.settle(idx, TaskStatus::Completed);
                self.resolver.mark_satisfied(idx);
                return None;
            }
            Err(err) => err,
        };

        if self.halted.is_some() {
            let status = if err.kind == TaskErrorKind::Cancelled {
                TaskStatus::Cancelled
            } else {
                TaskStatus::Failed
            };
            self.job.task_at_mut(idx).error = Some(err);
            self.settle(idx, status);
            return None;
        }

        if self.settings.retry.should_retry(self.job.task_at(idx)) {
            let delay = self.settings.retry.next_delay(self.job.task_at(idx));
            let job_id = self.job.id;
            let task = self.job.task_at_mut(idx);
            task.retry_count += 1;
            task.retry_delays.push(delay);
            warn!(
                job = %job_id,
                task = %task.id,
                attempt = task.attempts,
                retry = task.retry_count,
                max_retries = task.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "task failed; retrying"
            );
            task.error = Some(err);
            self.set_status(idx, TaskStatus::Retrying);
            return Some(delay);
        }

        error!(
            job = %self.job.id,
            task = %self.job.task_at(idx).id,
            attempts = self.job.task_at(idx).attempts,
            error = %err,
            "task failed"
        );
        self.job.task_at_mut(idx).error = Some(err);
        self.fail(idx);
        None
    }

    /// The backoff delay of a retrying task elapsed.
    pub fn retry_due(&mut self, idx: usize, lease: u64) {
        if self.lease_matches(idx, lease)
            && self.job.task_at(idx).status == TaskStatus::Retrying
            && self.halted.is_none()
        {
            self.leases[idx] = 0;
            self.resolver.push_ready(idx);
        }
    }

    /// The worker holding an attempt stopped heartbeating.
    ///
    /// A running task goes back to the ready frontier without touching its
    /// retry count, until it has been reassigned more than
    /// `max_reassignments` times; then it fails with `worker_unreachable`.
    pub fn reassign(&mut self, idx: usize, lease: u64, worker_id: &str) {
        if !self.lease_matches(idx, lease) {
            return;
        }
        let status = self.job.task_at(idx).status;
        if !matches!(status, TaskStatus::Queued | TaskStatus::Running) {
            return;
        }
        self.leases[idx] = 0;

        if self.halted.is_some() {
            self.job.task_at_mut(idx).error = Some(TaskError::worker_unreachable(
                worker_id,
                self.job.task_at(idx).reassignments,
            ));
            self.settle(idx, TaskStatus::Cancelled);
            return;
        }

        // Never started on the lost worker: just hand it out again.
        if status == TaskStatus::Queued {
            self.resolver.push_ready(idx);
            return;
        }

        let task = self.job.task_at_mut(idx);
        task.reassignments += 1;
        let reassignments = task.reassignments;
        if reassignments > self.settings.max_reassignments {
            error!(
                job = %self.job.id,
                task = %self.job.task_at(idx).id,
                worker = %worker_id,
                reassignments,
                "reassignment limit reached"
            );
            self.job.task_at_mut(idx).error =
                Some(TaskError::worker_unreachable(worker_id, reassignments));
            self.fail(idx);
            return;
        }

        warn!(
            job = %self.job.id,
            task = %self.job.task_at(idx).id,
            worker = %worker_id,
            reassignments,
            "worker lost; reassigning task"
        );
        if self.set_status(idx, TaskStatus::Queued) {
            self.resolver.push_ready(idx);
        }
    }

    /// No reachable worker can take this attempt.
    pub fn pool_exhausted(&mut self, idx: usize, lease: u64) {
        if !self.lease_matches(idx, lease) {
            return;
        }
        self.leases[idx] = 0;
        let error = TaskError::new(TaskErrorKind::WorkerUnreachable, "no reachable workers remain");
        match self.job.task_at(idx).status {
            TaskStatus::Queued => {
                self.job.task_at_mut(idx).error = Some(error);
                self.settle(idx, TaskStatus::Cancelled);
            }
            TaskStatus::Running => {
                self.job.task_at_mut(idx).error = Some(error);
                self.settle(idx, TaskStatus::Failed);
            }
            _ => {}
        }
        self.halt(HaltReason::WorkersLost);
    }

    /// Cancel a job that has not started yet.
    ///
    /// Every task becomes `CANCELLED` and the job is finalized at once.
    /// Returns `false` if the job is already running or finished.
    pub fn cancel_unstarted(&mut self) -> bool {
        if self.job.state != JobState::Created {
            return false;
        }
        self.halt(HaltReason::Cancelled);
        self.finish();
        true
    }

    /// Stop dispatching.
    ///
    /// Pending, queued and retrying tasks become `CANCELLED`. Running tasks
    /// are left to finish, except on a job timeout where they are cancelled
    /// on the spot and their eventual outcome is ignored. Only the first
    /// halt counts.
    pub fn halt(&mut self, reason: HaltReason) {
        if self.halted.is_some() {
            return;
        }
        match &reason {
            HaltReason::Cancelled => info!(job = %self.job.id, "job cancelled"),
            other => warn!(job = %self.job.id, reason = ?other, "job halted"),
        }
        if let Some(msg) = reason.execution_error() {
            self.execution_errors.push(msg);
        }
        let cancel_running = matches!(reason, HaltReason::JobTimeout(_));
        self.halted = Some(reason);
        self.resolver.clear_ready();

        for idx in 0..self.job.len() {
            match self.job.task_at(idx).status {
                TaskStatus::Pending | TaskStatus::Queued | TaskStatus::Retrying => {
                    self.leases[idx] = 0;
                    self.settle(idx, TaskStatus::Cancelled);
                }
                TaskStatus::Running if cancel_running => {
                    self.leases[idx] = 0;
                    self.job.task_at_mut(idx).error = Some(TaskError::new(
                        TaskErrorKind::Cancelled,
                        "job timeout elapsed while running",
                    ));
                    self.settle(idx, TaskStatus::Cancelled);
                }
                _ => {}
            }
        }
    }

    /// Finalize the job and build its result. Idempotent.
    pub fn finish(&mut self) -> BatchResult {
        if let Some(result) = &self.outcome {
            return result.clone();
        }

        let stats = self.job.statistics();
        let state = match &self.halted {
            Some(HaltReason::Cancelled) => JobState::Cancelled,
            Some(_) => JobState::Failed,
            None if stats.failed > 0 || !self.execution_errors.is_empty() => JobState::Failed,
            None => JobState::Completed,
        };
        self.job.finished_at = Some(Utc::now());
        self.set_job_state(state);

        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        let result = BatchResult::from_job(
            &self.job,
            self.strategy.name(),
            elapsed,
            self.execution_errors.clone(),
        );
        info!(
            job = %self.job.id,
            state = %state,
            completed = result.completed_tasks,
            failed = result.failed_tasks,
            skipped = result.skipped_tasks,
            cancelled = result.cancelled_tasks,
            duration_ms = result.duration_ms,
            "job finished"
        );
        self.outcome = Some(result.clone());
        result
    }

    fn lease_matches(&self, idx: usize, lease: u64) -> bool {
        lease != 0 && self.leases.get(idx) == Some(&lease)
    }

    /// Apply the failure policy to a task that has just failed for good.
    fn fail(&mut self, idx: usize) {
        self.settle(idx, TaskStatus::Failed);
        match self.settings.policy {
            FailurePolicy::SkipDependents => self.skip_dependents(idx),
            FailurePolicy::FailFast => {
                self.skip_dependents(idx);
                self.halt(HaltReason::FailFast);
            }
            FailurePolicy::ContinueOnFailure => {
                self.resolver.mark_satisfied(idx);
            }
        }
    }

    /// Every pending transitive dependent of `idx` becomes `SKIPPED`.
    fn skip_dependents(&mut self, idx: usize) {
        let failed = self.job.task_at(idx).id.clone();
        for dependent in self.resolver.transitive_dependents(idx) {
            if self.job.task_at(dependent).status != TaskStatus::Pending {
                continue;
            }
            self.resolver.remove_ready(dependent);
            self.job.task_at_mut(dependent).error = Some(TaskError::dependency_failed(&failed));
            self.settle(dependent, TaskStatus::Skipped);
        }
    }

    /// Transition into a terminal status and stamp `finished_at`.
    fn settle(&mut self, idx: usize, to: TaskStatus) {
        if self.set_status(idx, to) {
            self.job.task_at_mut(idx).finished_at = Some(Utc::now());
        }
    }

    fn set_status(&mut self, idx: usize, to: TaskStatus) -> bool {
        match self.job.transition(idx, to) {
            Ok(from) => {
                let id = self.job.task_at(idx).id.clone();
                self.events
                    .push(ProgressEvent::task(self.job.id, id, from, to));
                true
            }
            Err(err) => {
                error!(job = %self.job.id, error = %err, "rejected status transition");
                false
            }
        }
    }

    fn set_job_state(&mut self, to: JobState) {
        let from = self.job.state;
        if from == to {
            return;
        }
        self.job.state = to;
        self.events.push(ProgressEvent::job(self.job.id, from, to));
    }
}
