// src/distributed/records.rs

//! Assignment and result records exchanged with workers.
//!
//! These are plain JSON documents in the same shape as the exported
//! [`BatchResult`](crate::report::BatchResult) task records, so a worker in
//! another process only needs `serde_json` to speak the protocol.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::exec::Dispatch;
use crate::model::{JobId, TaskError, TaskId, TaskStatus, WorkResult};

/// Work handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub task_name: String,
    pub index: usize,
    pub lease: u64,
    pub attempt: u32,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl From<&Dispatch> for TaskAssignment {
    fn from(d: &Dispatch) -> Self {
        Self {
            job_id: d.job_id,
            task_id: d.task_id.clone(),
            task_name: d.name.clone(),
            index: d.index,
            lease: d.lease,
            attempt: d.attempt,
            timeout_ms: d.timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

impl TaskAssignment {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// What a worker reports back after one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultRecord {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub index: usize,
    pub lease: u64,
    pub worker_id: String,
    /// `COMPLETED` or `FAILED`.
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<TaskError>,
    pub duration_ms: u64,
}

impl TaskResultRecord {
    pub fn new(
        assignment: &TaskAssignment,
        worker_id: impl Into<String>,
        outcome: WorkResult,
        elapsed: Duration,
    ) -> Self {
        let (status, result, error) = match outcome {
            Ok(value) => (TaskStatus::Completed, Some(value), None),
            Err(err) => (TaskStatus::Failed, None, Some(err)),
        };
        Self {
            job_id: assignment.job_id,
            task_id: assignment.task_id.clone(),
            index: assignment.index,
            lease: assignment.lease,
            worker_id: worker_id.into(),
            status,
            result,
            error,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// The attempt outcome carried by this record.
    pub fn outcome(&self) -> WorkResult {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(self.result.clone().unwrap_or(serde_json::Value::Null)),
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assignment() -> TaskAssignment {
        TaskAssignment {
            job_id: JobId::new(),
            task_id: TaskId::from("build"),
            task_name: "build".into(),
            index: 2,
            lease: 7,
            attempt: 1,
            timeout_ms: Some(1500),
        }
    }

    #[test]
    fn failed_record_keeps_error_kind_on_the_wire() {
        let record = TaskResultRecord::new(
            &assignment(),
            "worker-1",
            Err(TaskError::timeout(Duration::from_millis(1500))),
            Duration::from_millis(1501),
        );
        let wire = record.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["status"], "FAILED");
        assert_eq!(value["error"]["kind"], "timeout");

        let back = TaskResultRecord::from_json(&wire).unwrap();
        assert_eq!(back.outcome().unwrap_err().kind, crate::model::TaskErrorKind::Timeout);
        assert_eq!(back.elapsed(), Duration::from_millis(1501));
    }

    #[test]
    fn success_record_outcome() {
        let record = TaskResultRecord::new(&assignment(), "w", Ok(json!({"n": 3})), Duration::ZERO);
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.outcome(), Ok(json!({"n": 3})));
    }

    #[test]
    fn assignment_rejects_missing_fields() {
        assert!(TaskAssignment::from_json(r#"{"job_id":"x"}"#).is_err());
    }
}
