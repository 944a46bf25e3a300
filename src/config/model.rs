// src/config/model.rs

use serde::Deserialize;

use super::engine::{EngineConfig, RawEngineConfig};
use crate::model::JobPriority;
use crate::types::ExecutionMode;

/// Job file as read from TOML, before validation.
///
/// ```toml
/// [engine]
/// execution_mode = "parallel"
/// default_max_retries = 1
///
/// [job]
/// name = "release"
/// priority = "high"
///
/// [[task]]
/// name = "build"
/// cmd = "cargo build"
///
/// [[task]]
/// name = "test"
/// cmd = "cargo test"
/// after = ["build"]
/// timeout = "10m"
/// tag = "ci"
/// ```
///
/// Tasks are an array of tables so their file order is kept; that order is
/// the tie-break between equally ready tasks.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawJobFile {
    #[serde(default)]
    pub engine: RawEngineConfig,

    #[serde(default)]
    pub job: JobSection,

    #[serde(default)]
    pub task: Vec<TaskEntry>,
}

/// `[job]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSection {
    #[serde(default = "default_job_name")]
    pub name: String,

    #[serde(default)]
    pub priority: JobPriority,

    /// Overrides `[engine].execution_mode` for this job only.
    #[serde(default)]
    pub execution_mode: Option<ExecutionMode>,
}

fn default_job_name() -> String {
    "taskdag".to_string()
}

impl Default for JobSection {
    fn default() -> Self {
        Self {
            name: default_job_name(),
            priority: JobPriority::default(),
            execution_mode: None,
        }
    }
}

/// One `[[task]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskEntry {
    pub name: String,

    /// Shell command to run.
    pub cmd: String,

    /// Tasks that must complete first.
    #[serde(default)]
    pub after: Vec<String>,

    /// Falls back to `[engine].default_max_retries` when absent.
    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default)]
    pub priority: i32,

    /// Duration string such as `"30s"`.
    #[serde(default)]
    pub timeout: Option<String>,

    /// Classification shown in report breakdowns.
    #[serde(default)]
    pub tag: Option<String>,
}

/// Validated job file. Construct via `JobFile::try_from(RawJobFile)`.
#[derive(Debug, Clone)]
pub struct JobFile {
    pub engine: EngineConfig,
    pub job: JobSection,
    pub tasks: Vec<TaskEntry>,
}

impl JobFile {
    pub(crate) fn new_unchecked(engine: EngineConfig, job: JobSection, tasks: Vec<TaskEntry>) -> Self {
        Self { engine, job, tasks }
    }
}
