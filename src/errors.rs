// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Only job-creation and submission problems surface through this type.
//! Failures of individual tasks are recorded as [`TaskError`] data on the
//! task and never propagate out of the engine.
//!
//! [`TaskError`]: crate::model::TaskError

use thiserror::Error;

use crate::model::{TaskId, TaskStatus};

#[derive(Error, Debug)]
pub enum TaskdagError {
    #[error("dependency cycle detected: {}", format_cycle(.0))]
    DependencyCycle(Vec<TaskId>),

    #[error("duplicate task in job: {0}")]
    DuplicateTask(TaskId),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("queue full: {requested} task(s) requested, capacity is {capacity}")]
    QueueFull { capacity: usize, requested: usize },

    #[error("invalid status transition for task '{task}': {from} -> {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn format_cycle(members: &[TaskId]) -> String {
    let mut parts: Vec<String> = members.iter().map(|id| id.to_string()).collect();
    // Close the loop so "a -> b -> a" reads as a cycle.
    if let Some(first) = members.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskdagError>;
