// src/engine/strategy.rs

use std::fmt;

use crate::config::AdaptiveThresholds;
use crate::resources::ResourceAllocation;
use crate::types::ExecutionMode;

/// Concrete way a job runs, fixed once at job start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One task at a time, in readiness order.
    Sequential,
    /// Every ready task dispatched at once, up to `workers`.
    Parallel { workers: usize },
    /// Ready tasks grouped into cohorts of `batch_size`; up to `workers`
    /// cohorts in flight, results streamed per task.
    Batched { workers: usize, batch_size: usize },
    /// Delegated to the distributed worker pool.
    Distributed { workers: usize },
}

impl Strategy {
    /// Pick the strategy for a job of `task_count` tasks.
    ///
    /// `Adaptive` looks only at the task count: up to
    /// `sequential_max` runs sequentially, up to `parallel_max` in parallel,
    /// anything larger in batches.
    pub fn resolve(
        mode: ExecutionMode,
        task_count: usize,
        thresholds: &AdaptiveThresholds,
        allocation: &ResourceAllocation,
        worker_count: Option<usize>,
    ) -> Self {
        let workers = allocation.max_workers.max(1);
        match mode {
            ExecutionMode::Sequential => Strategy::Sequential,
            ExecutionMode::Parallel => Strategy::Parallel { workers },
            ExecutionMode::Distributed => Strategy::Distributed {
                workers: worker_count.unwrap_or(workers).max(1),
            },
            ExecutionMode::Adaptive => {
                if task_count <= thresholds.sequential_max {
                    Strategy::Sequential
                } else if task_count <= thresholds.parallel_max {
                    Strategy::Parallel { workers }
                } else {
                    Strategy::Batched {
                        workers,
                        batch_size: allocation.batch_size.max(1),
                    }
                }
            }
        }
    }

    /// Cohorts that may be in flight at once.
    pub fn slots(&self) -> usize {
        match *self {
            Strategy::Sequential => 1,
            Strategy::Parallel { workers }
            | Strategy::Batched { workers, .. }
            | Strategy::Distributed { workers } => workers,
        }
    }

    /// Tasks handed to the backend per dispatch.
    pub fn cohort_size(&self) -> usize {
        match *self {
            Strategy::Batched { batch_size, .. } => batch_size,
            _ => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::Parallel { .. } => "parallel",
            Strategy::Batched { .. } => "batched",
            Strategy::Distributed { .. } => "distributed",
        }
    }

    pub fn is_distributed(&self) -> bool {
        matches!(self, Strategy::Distributed { .. })
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Strategy::Sequential => f.write_str("sequential"),
            Strategy::Parallel { workers } => write!(f, "parallel ({workers} workers)"),
            Strategy::Batched {
                workers,
                batch_size,
            } => write!(f, "batched ({workers} workers, batches of {batch_size})"),
            Strategy::Distributed { workers } => write!(f, "distributed ({workers} workers)"),
        }
    }
}
