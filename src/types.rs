use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a job's tasks are driven.
///
/// - `Sequential`: one task at a time, in readiness order.
/// - `Parallel`: all ready tasks up to the worker bound.
/// - `Adaptive`: picks one of the above (or batched cohorts) from the job size
///   when the job starts.
/// - `Distributed`: tasks are handed to the distributed worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    Adaptive,
    Distributed,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Adaptive
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(ExecutionMode::Sequential),
            "parallel" => Ok(ExecutionMode::Parallel),
            "adaptive" => Ok(ExecutionMode::Adaptive),
            "distributed" => Ok(ExecutionMode::Distributed),
            other => Err(format!(
                "invalid execution_mode: {other} (expected sequential, parallel, adaptive or distributed)"
            )),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Adaptive => "adaptive",
            ExecutionMode::Distributed => "distributed",
        };
        f.write_str(s)
    }
}

/// What happens to the rest of a job when a task terminally fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Transitive dependents of the failed task are `SKIPPED`; independent
    /// branches keep running.
    SkipDependents,
    /// Dependents are `SKIPPED`, every other pending task is `CANCELLED`,
    /// running work is signalled and the job ends `FAILED`.
    FailFast,
    /// Dependents treat the failed task as settled and run anyway.
    ContinueOnFailure,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::SkipDependents
    }
}

impl FailurePolicy {
    /// Derive the policy from the two configuration flags.
    pub fn from_flags(fail_fast: bool, continue_on_failure: bool) -> Self {
        match (fail_fast, continue_on_failure) {
            (true, _) => FailurePolicy::FailFast,
            (false, true) => FailurePolicy::ContinueOnFailure,
            (false, false) => FailurePolicy::SkipDependents,
        }
    }
}

/// Behaviour of the job submission queue when it is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicy {
    /// Wait until enough space frees up.
    Block,
    /// Return `QueueFull` immediately.
    Fail,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        QueuePolicy::Block
    }
}

impl FromStr for QueuePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "block" => Ok(QueuePolicy::Block),
            "fail" => Ok(QueuePolicy::Fail),
            other => Err(format!(
                "invalid queue_policy: {other} (expected \"block\" or \"fail\")"
            )),
        }
    }
}

/// How the distributed pool hands assignments to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentMode {
    /// Workers pull from one shared queue.
    Pull,
    /// The pool pushes each assignment to the least-loaded worker.
    Push,
}

impl Default for AssignmentMode {
    fn default() -> Self {
        AssignmentMode::Pull
    }
}

/// Output format for [`generate_report`](crate::report::generate_report).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Text,
    Json,
    Html,
}

impl Default for ReportFormat {
    fn default() -> Self {
        ReportFormat::Text
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "plain" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "html" => Ok(ReportFormat::Html),
            other => Err(format!(
                "invalid report format: {other} (expected text, json or html)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_mode_parses_case_insensitively() {
        assert_eq!(
            " Parallel ".parse::<ExecutionMode>().unwrap(),
            ExecutionMode::Parallel
        );
        assert!("fast".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn failure_policy_prefers_fail_fast() {
        assert_eq!(FailurePolicy::from_flags(true, true), FailurePolicy::FailFast);
        assert_eq!(
            FailurePolicy::from_flags(false, true),
            FailurePolicy::ContinueOnFailure
        );
        assert_eq!(
            FailurePolicy::from_flags(false, false),
            FailurePolicy::SkipDependents
        );
    }
}
