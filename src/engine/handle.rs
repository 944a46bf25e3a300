// src/engine/handle.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};
use tracing::info;

use super::core::{CoreSettings, HaltReason, JobCore};
use super::queue::JobQueue;
use super::runtime::{JobRun, drive};
use super::strategy::Strategy;
use crate::config::EngineConfig;
use crate::distributed::{DistributedBackend, DistributedPool, PoolConfig, WorkerStats, WorkerView};
use crate::errors::{Result, TaskdagError};
use crate::exec::{ExecutorBackend, LocalBackend};
use crate::model::{Job, JobId, JobPriority, JobSnapshot, JobState, TaskId};
use crate::report::{BatchResult, ProgressListener, ProgressRegistry};
use crate::resources::ResourceAllocation;
use crate::types::ExecutionMode;

/// The orchestration engine.
///
/// An explicit value owning its configuration, progress listeners, the
/// cross-job queue and (lazily) the distributed worker pool. Cloning is
/// cheap and every clone drives the same engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    allocation: ResourceAllocation,
    listeners: Arc<ProgressRegistry>,
    pool: OnceCell<Arc<DistributedPool>>,
    job_slots: Arc<Semaphore>,
    queue: JobQueue,
}

impl Engine {
    /// Validate `config` and build an engine around it.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let allocation = config.resource_allocation();
        info!(
            mode = %config.execution_mode,
            max_workers = allocation.max_workers,
            queue_size = allocation.queue_size,
            batch_size = allocation.batch_size,
            max_memory_mb = allocation.max_memory_mb,
            max_parallel_jobs = config.max_parallel_jobs,
            "engine created"
        );

        let inner = EngineInner {
            listeners: Arc::new(ProgressRegistry::new()),
            pool: OnceCell::new(),
            job_slots: Arc::new(Semaphore::new(config.max_parallel_jobs.max(1))),
            queue: JobQueue::new(allocation.queue_size, config.queue_policy),
            allocation,
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn allocation(&self) -> &ResourceAllocation {
        &self.inner.allocation
    }

    /// Register a callback for every task and job transition.
    pub fn add_listener(&self, listener: Arc<dyn ProgressListener>) {
        self.inner.listeners.register(listener);
    }

    pub fn create_job(&self, name: impl Into<String>) -> Job {
        Job::new(name)
    }

    /// Validate a job, fill in configured defaults and fix its strategy.
    ///
    /// Nothing runs until [`JobHandle::run`] is awaited.
    pub fn submit(&self, mut job: Job) -> Result<JobHandle> {
        if job.state() != JobState::Created {
            return Err(TaskdagError::ConfigError(format!(
                "job '{}' was already submitted",
                job.name
            )));
        }
        job.validate()?;

        let cfg = &self.inner.config;
        let retries = self.inner.allocation.max_retries;
        for task in job.tasks_mut() {
            task.apply_defaults(retries, cfg.default_task_timeout);
        }

        let mode = job.execution_mode.unwrap_or(cfg.execution_mode);
        let strategy = Strategy::resolve(
            mode,
            job.len(),
            &cfg.adaptive_thresholds,
            &self.inner.allocation,
            cfg.worker_count,
        );
        info!(job = %job.id, name = %job.name, tasks = job.len(), %mode, %strategy, "job submitted");

        let info = JobInfo {
            id: job.id,
            name: job.name.clone(),
            priority: job.priority,
            task_count: job.len(),
            strategy,
        };
        let core = JobCore::new(job, strategy, CoreSettings::from_config(cfg));
        Ok(JobHandle {
            engine: self.clone(),
            run: Arc::new(JobRun::new(core, Arc::clone(&self.inner.listeners))),
            info: Arc::new(info),
        })
    }

    /// Submit and run a job to completion.
    ///
    /// Task failures are data in the returned [`BatchResult`]; only
    /// submission problems come back as `Err`.
    pub async fn execute(&self, job: Job) -> Result<BatchResult> {
        self.submit(job)?.run().await
    }

    /// Run a job on a caller-provided backend.
    pub async fn execute_with<B: ExecutorBackend>(&self, job: Job, backend: B) -> Result<BatchResult> {
        self.submit(job)?.run_with(backend).await
    }

    /// Run a job on the distributed worker pool regardless of its mode.
    pub async fn execute_distributed(&self, mut job: Job) -> Result<BatchResult> {
        job.execution_mode = Some(ExecutionMode::Distributed);
        self.execute(job).await
    }

    /// Run several jobs, highest priority first, at most
    /// `max_parallel_jobs` at a time. Results come back in input order.
    pub async fn execute_all(&self, jobs: Vec<Job>) -> Result<Vec<BatchResult>> {
        let handles = jobs
            .into_iter()
            .map(|job| self.submit(job))
            .collect::<Result<Vec<_>>>()?;

        let mut order: Vec<usize> = (0..handles.len()).collect();
        order.sort_by_key(|&i| handles[i].priority());

        let mut running = Vec::with_capacity(handles.len());
        for i in order {
            let permit = self.acquire_job_slot().await?;
            let handle = handles[i].clone();
            running.push((
                i,
                tokio::spawn(async move {
                    let _permit = permit;
                    handle.run_unlimited().await
                }),
            ));
        }

        let mut results: Vec<Option<BatchResult>> = vec![None; handles.len()];
        for (i, task) in running {
            let result = task.await.map_err(|e| TaskdagError::Other(e.into()))?;
            results[i] = Some(result);
        }
        Ok(results.into_iter().flatten().collect())
    }

    /// Park a job in the bounded cross-job queue.
    pub async fn enqueue(&self, job: Job) -> Result<()> {
        job.validate()?;
        self.inner.queue.push(job).await
    }

    /// Run everything queued so far, by priority.
    pub async fn run_queued(&self) -> Result<Vec<BatchResult>> {
        let jobs = self.inner.queue.drain();
        self.execute_all(jobs).await
    }

    pub fn queue(&self) -> &JobQueue {
        &self.inner.queue
    }

    /// Snapshot of the distributed pool, starting it if needed.
    pub async fn get_worker_stats(&self) -> WorkerStats {
        self.pool().await.get_worker_stats()
    }

    pub async fn workers(&self) -> Vec<WorkerView> {
        self.pool().await.workers()
    }

    /// Simulate the crash of one distributed worker.
    pub async fn kill_worker(&self, worker_id: &str) -> bool {
        self.pool().await.kill_worker(worker_id)
    }

    /// Stop the distributed pool if it was started.
    pub async fn shutdown(&self) {
        if let Some(pool) = self.inner.pool.get() {
            pool.shutdown().await;
        }
    }

    async fn pool(&self) -> Arc<DistributedPool> {
        self.inner
            .pool
            .get_or_init(|| async {
                DistributedPool::start(PoolConfig::from_engine(&self.inner.config, &self.inner.allocation))
            })
            .await
            .clone()
    }

    async fn acquire_job_slot(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.inner.job_slots)
            .acquire_owned()
            .await
            .map_err(|e| TaskdagError::Other(e.into()))
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("allocation", &self.inner.allocation)
            .field("listeners", &self.inner.listeners)
            .field("pool_started", &self.inner.pool.initialized())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct JobInfo {
    id: JobId,
    name: String,
    priority: JobPriority,
    task_count: usize,
    strategy: Strategy,
}

/// A submitted job.
///
/// Clones share the job: any clone may read its status or cancel it while
/// another awaits [`run`](Self::run). Running is idempotent; later calls
/// return the first result.
#[derive(Clone)]
pub struct JobHandle {
    engine: Engine,
    run: Arc<JobRun>,
    info: Arc<JobInfo>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn priority(&self) -> JobPriority {
        self.info.priority
    }

    pub fn task_count(&self) -> usize {
        self.info.task_count
    }

    pub fn strategy(&self) -> Strategy {
        self.info.strategy
    }

    /// Immutable copy of the job's current state.
    pub fn status(&self) -> JobSnapshot {
        self.run.with_core(|core| core.snapshot())
    }

    /// Pending tasks whose dependencies have all completed.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.run.with_core(|core| core.ready_tasks())
    }

    /// Cancel the job.
    ///
    /// Pending and queued tasks become `CANCELLED` right away; running
    /// tasks are signalled and allowed to finish.
    pub fn cancel(&self) {
        let before_start = self.run.with_core(|core| {
            if core.cancel_unstarted() {
                return true;
            }
            if core.job().state() == JobState::Running {
                core.halt(HaltReason::Cancelled);
            }
            false
        });
        self.run.cancel.cancel();
        info!(job = %self.info.id, before_start, "job cancellation requested");
    }

    pub fn is_cancelled(&self) -> bool {
        self.run.cancel.is_cancelled()
    }

    /// Run the job, waiting for a free job slot first.
    pub async fn run(&self) -> Result<BatchResult> {
        let _permit = self.engine.acquire_job_slot().await?;
        Ok(self.run_unlimited().await)
    }

    /// Run the job on `backend` instead of the strategy's own.
    pub async fn run_with<B: ExecutorBackend>(&self, mut backend: B) -> Result<BatchResult> {
        let _permit = self.engine.acquire_job_slot().await?;
        let limit = self.engine.config().job_timeout;
        let result = self
            .run
            .result
            .get_or_init(|| async { drive(&self.run, &mut backend, limit).await })
            .await;
        Ok(result.clone())
    }

    async fn run_unlimited(&self) -> BatchResult {
        let limit = self.engine.config().job_timeout;
        self.run
            .result
            .get_or_init(|| async {
                if let Some(done) = self.run.with_core(|core| core.result().cloned()) {
                    return done;
                }
                let strategy = self.info.strategy;
                if strategy.is_distributed() {
                    let mut backend = DistributedBackend::new(self.engine.pool().await);
                    drive(&self.run, &mut backend, limit).await
                } else {
                    let mut backend = LocalBackend::new(strategy.slots());
                    drive(&self.run, &mut backend, limit).await
                }
            })
            .await
            .clone()
    }

    /// How long the job may run before it is halted, if limited.
    pub fn job_timeout(&self) -> Option<Duration> {
        self.engine.config().job_timeout
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("job", &self.info)
            .field("run", &self.run)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;

    use crate::model::{TaskSpec, TaskStatus, work_fn};
    use crate::report::CollectingListener;
    use crate::types::QueuePolicy;

    fn config() -> EngineConfig {
        EngineConfig {
            retry_delay: Duration::from_millis(1),
            retry_jitter: false,
            max_parallel_tasks: Some(4),
            ..EngineConfig::default()
        }
    }

    fn ok_job(name: &str, tasks: usize) -> Job {
        let mut job = Job::new(name);
        for i in 0..tasks {
            job.add_task(TaskSpec::new(
                format!("{name}-{i}"),
                work_fn(|_ctx| async { Ok(json!("ok")) }),
            ))
            .unwrap();
        }
        job
    }

    #[tokio::test]
    async fn execute_runs_every_task() {
        let engine = Engine::new(config()).unwrap();
        let result = engine.execute(ok_job("j", 3)).await.unwrap();
        assert!(result.is_successful());
        assert_eq!(result.completed_tasks, 3);
    }

    #[tokio::test]
    async fn allocation_retry_budget_applies_to_tasks_without_their_own() {
        let engine = Engine::new(EngineConfig {
            default_max_retries: 2,
            ..config()
        })
        .unwrap();
        assert_eq!(engine.allocation().max_retries, 2);

        let mut job = Job::new("flaky");
        job.add_task(TaskSpec::new(
            "t",
            work_fn(|_ctx| async { Err(crate::model::TaskError::execution("nope")) }),
        ))
        .unwrap();
        let result = engine.execute(job).await.unwrap();
        let t = &result.task_results[0];
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.attempts, 3);
        assert_eq!(t.retry_count, 2);
    }

    #[tokio::test]
    async fn run_is_idempotent() {
        let engine = Engine::new(config()).unwrap();
        let handle = engine.submit(ok_job("j", 2)).unwrap();
        let first = handle.run().await.unwrap();
        let second = handle.run().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(handle.status().state, JobState::Completed);
    }

    #[tokio::test]
    async fn cancel_before_run_cancels_everything() {
        let engine = Engine::new(config()).unwrap();
        let listener = Arc::new(CollectingListener::new());
        engine.add_listener(listener.clone());

        let handle = engine.submit(ok_job("j", 4)).unwrap();
        handle.cancel();
        let result = handle.run().await.unwrap();

        assert_eq!(result.cancelled_tasks, 4);
        assert!(
            listener
                .events()
                .iter()
                .all(|e| e.new_status != crate::report::ProgressState::Task(TaskStatus::Running))
        );
    }

    #[tokio::test]
    async fn execute_all_starts_higher_priority_first() {
        let engine = Engine::new(config()).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let make = |name: &'static str, priority: JobPriority| {
            let order = Arc::clone(&order);
            let mut job = Job::new(name).with_priority(priority);
            job.add_task(TaskSpec::new(
                name,
                work_fn(move |_ctx| {
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().unwrap().push(name);
                        Ok(json!(null))
                    }
                }),
            ))
            .unwrap();
            job
        };

        let results = engine
            .execute_all(vec![
                make("low", JobPriority::Low),
                make("high", JobPriority::High),
                make("normal", JobPriority::Normal),
            ])
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].job_name, "low");
        assert_eq!(*order.lock().unwrap(), ["high", "normal", "low"]);
    }

    #[tokio::test]
    async fn enqueue_honours_fail_policy() {
        let engine = Engine::new(EngineConfig {
            queue_size: Some(3),
            queue_policy: QueuePolicy::Fail,
            ..config()
        })
        .unwrap();

        engine.enqueue(ok_job("a", 2)).await.unwrap();
        let err = engine.enqueue(ok_job("b", 2)).await.unwrap_err();
        assert!(matches!(err, TaskdagError::QueueFull { capacity: 3, requested: 2 }));

        let results = engine.run_queued().await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(engine.queue().is_empty());
    }
}
