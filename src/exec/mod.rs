// src/exec/mod.rs

//! Execution layer.
//!
//! This module is responsible for actually running task attempts and
//! reporting back to the job driver via [`ExecEvent`]s.
//!
//! - [`backend`] provides the `ExecutorBackend` trait the driver talks to.
//! - [`task_runner`] runs a single attempt with timeout, panic and
//!   cancellation handling.
//! - [`local`] is the in-process backend used for every non-distributed
//!   strategy.
//! - [`shell`] is the command work that job files are made of.

pub mod backend;
pub mod local;
pub mod shell;
pub mod task_runner;

pub use backend::{Dispatch, EventSender, ExecEvent, ExecutorBackend};
pub use local::LocalBackend;
pub use shell::ShellWork;
pub use task_runner::run_attempt;
