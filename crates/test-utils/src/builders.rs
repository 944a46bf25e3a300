#![allow(dead_code)]

use std::time::Duration;

use taskdag::config::EngineConfig;
use taskdag::model::{Job, JobPriority, TaskSpec, Work};
use taskdag::types::ExecutionMode;

use crate::fake_work::always_ok;

/// Engine config with millisecond-scale retry and heartbeat timings.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        retry_delay: Duration::from_millis(2),
        retry_jitter: false,
        max_parallel_tasks: Some(4),
        worker_count: Some(3),
        heartbeat_interval: Duration::from_millis(20),
        worker_timeout: Some(Duration::from_millis(80)),
        ..EngineConfig::default()
    }
}

/// Builder for `Job` to simplify test setup.
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new(name: &str) -> Self {
        Self { job: Job::new(name) }
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.job = self.job.with_mode(mode);
        self
    }

    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.job = self.job.with_priority(priority);
        self
    }

    pub fn spec(mut self, spec: TaskSpec) -> Self {
        self.job.add_task(spec).expect("Failed to add task from builder");
        self
    }

    pub fn task(self, name: &str, deps: &[&str], work: impl Work + 'static) -> Self {
        self.spec(TaskSpec::new(name, work).depends_on(deps.iter().copied()))
    }

    pub fn ok_task(self, name: &str, deps: &[&str]) -> Self {
        self.task(name, deps, always_ok())
    }

    pub fn build(self) -> Job {
        self.job
    }
}

/// `t0 -> t1 -> ... -> t{n-1}`, every task succeeding.
pub fn chain(name: &str, n: usize) -> Job {
    let mut builder = JobBuilder::new(name);
    for i in 0..n {
        let task = format!("t{i}");
        builder = if i == 0 {
            builder.ok_task(&task, &[])
        } else {
            let prev = format!("t{}", i - 1);
            builder.ok_task(&task, &[prev.as_str()])
        };
    }
    builder.build()
}

/// `n` succeeding tasks without dependencies.
pub fn independent(name: &str, n: usize) -> Job {
    let mut builder = JobBuilder::new(name);
    for i in 0..n {
        builder = builder.ok_task(&format!("t{i}"), &[]);
    }
    builder.build()
}

/// Diamond `a -> {b, c} -> d`; `a` runs `root`, the rest succeed.
pub fn diamond(name: &str, root: impl Work + 'static) -> Job {
    JobBuilder::new(name)
        .task("a", &[], root)
        .ok_task("b", &["a"])
        .ok_task("c", &["a"])
        .ok_task("d", &["b", "c"])
        .build()
}
