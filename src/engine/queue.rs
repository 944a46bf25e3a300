// src/engine/queue.rs

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::errors::{Result, TaskdagError};
use crate::model::{Job, JobPriority};
use crate::types::QueuePolicy;

/// Bounded queue of jobs waiting to run.
///
/// Capacity is measured in tasks, not jobs. When a job does not fit:
/// - `QueuePolicy::Fail` returns [`TaskdagError::QueueFull`];
/// - `QueuePolicy::Block` waits until enough jobs have been popped.
///
/// A single job larger than the whole queue is admitted only into an empty
/// queue, so it can never wait forever.
///
/// Jobs come out by [`JobPriority`], FIFO within a priority.
#[derive(Debug)]
pub struct JobQueue {
    capacity: usize,
    policy: QueuePolicy,
    state: Mutex<QueueState>,
    space: Notify,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: BTreeMap<(JobPriority, u64), Job>,
    used: usize,
    seq: u64,
}

impl QueueState {
    fn fits(&self, need: usize, capacity: usize) -> bool {
        self.entries.is_empty() || self.used + need <= capacity
    }
}

impl JobQueue {
    pub fn new(capacity: usize, policy: QueuePolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            state: Mutex::new(QueueState::default()),
            space: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Add a job, waiting for space under the blocking policy.
    pub async fn push(&self, job: Job) -> Result<()> {
        let need = job.len();
        let mut job = Some(job);

        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.fits(need, self.capacity) {
                    if let Some(job) = job.take() {
                        state.seq += 1;
                        let key = (job.priority, state.seq);
                        debug!(job = %job.id, tasks = need, used = state.used + need, "job queued");
                        state.used += need;
                        state.entries.insert(key, job);
                    }
                    return Ok(());
                }
                if self.policy == QueuePolicy::Fail {
                    warn!(requested = need, used = state.used, capacity = self.capacity, "job queue full");
                    return Err(TaskdagError::QueueFull {
                        capacity: self.capacity,
                        requested: need,
                    });
                }
            }

            debug!(requested = need, "job queue full; waiting for space");
            notified.await;
        }
    }

    /// Remove the highest-priority job, oldest first.
    pub fn pop(&self) -> Option<Job> {
        let job = {
            let mut state = self.lock();
            let (_, job) = state.entries.pop_first()?;
            state.used -= job.len();
            job
        };
        self.space.notify_waiters();
        Some(job)
    }

    /// Remove every queued job in pop order.
    pub fn drain(&self) -> Vec<Job> {
        let jobs: Vec<Job> = {
            let mut state = self.lock();
            state.used = 0;
            std::mem::take(&mut state.entries).into_values().collect()
        };
        if !jobs.is_empty() {
            self.space.notify_waiters();
        }
        jobs
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tasks currently held.
    pub fn used(&self) -> usize {
        self.lock().used
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use crate::model::{TaskSpec, work_fn};

    fn job(name: &str, tasks: usize, priority: JobPriority) -> Job {
        let mut job = Job::new(name).with_priority(priority);
        for i in 0..tasks {
            job.add_task(TaskSpec::new(
                format!("{name}-{i}"),
                work_fn(|_ctx| async { Ok(json!(null)) }),
            ))
            .unwrap();
        }
        job
    }

    #[tokio::test]
    async fn fail_policy_rejects_overflow() {
        let queue = JobQueue::new(4, QueuePolicy::Fail);
        queue.push(job("a", 3, JobPriority::Normal)).await.unwrap();
        let err = queue.push(job("b", 2, JobPriority::Normal)).await.unwrap_err();
        assert!(matches!(
            err,
            TaskdagError::QueueFull {
                capacity: 4,
                requested: 2
            }
        ));
        assert_eq!(queue.used(), 3);
    }

    #[tokio::test]
    async fn oversize_job_only_enters_empty_queue() {
        let queue = JobQueue::new(2, QueuePolicy::Fail);
        queue.push(job("big", 5, JobPriority::Normal)).await.unwrap();
        assert!(queue.push(job("small", 1, JobPriority::Normal)).await.is_err());
    }

    #[tokio::test]
    async fn pops_by_priority_then_fifo() {
        let queue = JobQueue::new(100, QueuePolicy::Block);
        queue.push(job("low", 1, JobPriority::Low)).await.unwrap();
        queue.push(job("n1", 1, JobPriority::Normal)).await.unwrap();
        queue.push(job("crit", 1, JobPriority::Critical)).await.unwrap();
        queue.push(job("n2", 1, JobPriority::Normal)).await.unwrap();

        let order: Vec<String> = queue.drain().into_iter().map(|j| j.name).collect();
        assert_eq!(order, ["crit", "n1", "n2", "low"]);
        assert_eq!(queue.used(), 0);
    }

    #[tokio::test]
    async fn block_policy_waits_for_space() {
        let queue = Arc::new(JobQueue::new(2, QueuePolicy::Block));
        queue.push(job("first", 2, JobPriority::Normal)).await.unwrap();

        let q = Arc::clone(&queue);
        let waiter = tokio::spawn(async move { q.push(job("second", 1, JobPriority::Normal)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        assert_eq!(queue.pop().map(|j| j.name), Some("first".to_string()));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("blocked push should complete")
            .unwrap()
            .unwrap();
        assert_eq!(queue.len(), 1);
    }
}
