// src/model/mod.rs

//! Tasks, jobs and the work contract.
//!
//! - [`task`] holds the task entity, its status lifecycle and failure type.
//! - [`job`] holds the job container, its statistics and snapshots.
//! - [`work`] defines the callable a task runs.

pub mod job;
pub mod task;
pub mod work;

pub use job::{Job, JobId, JobPriority, JobSnapshot, JobState, JobStatistics, TaskSnapshot};
pub use task::{Task, TaskError, TaskErrorKind, TaskId, TaskSpec, TaskStatus, WorkResult};
pub use work::{BoxFuture, Work, WorkContext, blocking_fn, work_fn};
