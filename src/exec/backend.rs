// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The job driver talks to an `ExecutorBackend` instead of spawning work
//! itself. Each call to [`ExecutorBackend::dispatch`] hands over one cohort
//! of ready tasks and occupies one slot until the backend reports
//! [`ExecEvent::SlotFreed`].
//!
//! - [`LocalBackend`](super::LocalBackend) runs cohorts on the local Tokio
//!   runtime.
//! - The distributed pool backend forwards tasks to worker loops.
//! - Tests can provide their own backend that completes tasks inline.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::model::{JobId, TaskId, Work, WorkContext, WorkResult};

/// One task attempt handed to a backend.
#[derive(Clone)]
pub struct Dispatch {
    pub job_id: JobId,
    /// Position of the task in its job.
    pub index: usize,
    /// Fresh for every dispatch; events carrying an older lease are ignored.
    pub lease: u64,
    pub task_id: TaskId,
    pub name: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub work: Arc<dyn Work>,
    pub timeout: Option<Duration>,
    /// Child of the job's token; cancelled on job cancellation or timeout.
    pub cancel: CancellationToken,
}

impl Dispatch {
    pub fn context(&self, worker_id: Option<String>) -> WorkContext {
        WorkContext::new(
            self.task_id.clone(),
            self.name.clone(),
            self.attempt,
            worker_id,
            self.cancel.clone(),
        )
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("index", &self.index)
            .field("lease", &self.lease)
            .field("task_id", &self.task_id)
            .field("attempt", &self.attempt)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Events flowing from a backend back into the job driver.
#[derive(Debug, Clone)]
pub enum ExecEvent {
    /// The attempt began executing.
    Started {
        index: usize,
        lease: u64,
        worker_id: Option<String>,
    },
    /// The attempt ended, successfully or not.
    Finished {
        index: usize,
        lease: u64,
        outcome: WorkResult,
        elapsed: Duration,
    },
    /// The worker holding the attempt stopped heartbeating.
    WorkerLost {
        index: usize,
        lease: u64,
        worker_id: String,
    },
    /// No reachable worker is left to run this attempt.
    PoolExhausted { index: usize, lease: u64 },
    /// A cohort finished; its slot may be reused.
    SlotFreed,
}

pub type EventSender = mpsc::UnboundedSender<ExecEvent>;

/// Trait abstracting where dispatched tasks run.
pub trait ExecutorBackend: Send {
    /// Number of cohorts that may be outstanding at once.
    fn capacity(&self) -> usize;

    /// Start executing a cohort. Must not wait for the cohort to finish;
    /// progress is reported through `events`.
    fn dispatch(
        &mut self,
        cohort: Vec<Dispatch>,
        events: EventSender,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Short label used in logs and results.
    fn name(&self) -> &'static str {
        "custom"
    }
}
