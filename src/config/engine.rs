// src/config/engine.rs

use std::time::Duration;

use serde::Deserialize;

use super::duration::{parse_duration, parse_optional};
use crate::errors::{Result, TaskdagError};
use crate::resources::{ResourceAllocation, ResourceOverrides};
use crate::types::{AssignmentMode, ExecutionMode, FailurePolicy, QueuePolicy};

/// Breakpoints for adaptive strategy selection, by task count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AdaptiveThresholds {
    /// Jobs up to this size run sequentially.
    pub sequential_max: usize,
    /// Jobs up to this size run in parallel; larger jobs run in batches.
    pub parallel_max: usize,
}

impl Default for AdaptiveThresholds {
    fn default() -> Self {
        Self {
            sequential_max: 10,
            parallel_max: 50,
        }
    }
}

/// Validated, immutable engine configuration.
///
/// `None` on a sizing field means "use the auto-detected value".
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub execution_mode: ExecutionMode,
    pub max_parallel_tasks: Option<usize>,
    pub max_parallel_jobs: usize,
    pub default_max_retries: u32,
    pub retry_delay: Duration,
    pub exponential_backoff: bool,
    pub retry_jitter: bool,
    pub max_retry_delay: Option<Duration>,
    pub default_task_timeout: Option<Duration>,
    pub job_timeout: Option<Duration>,
    pub continue_on_failure: bool,
    pub fail_fast: bool,
    pub worker_count: Option<usize>,
    /// `None` means `heartbeat_interval * heartbeat_timeout_multiplier`.
    pub worker_timeout: Option<Duration>,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout_multiplier: u32,
    pub max_reassignments: u32,
    pub assignment: AssignmentMode,
    pub queue_size: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_memory_mb: Option<usize>,
    pub queue_policy: QueuePolicy,
    pub adaptive_thresholds: AdaptiveThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Adaptive,
            max_parallel_tasks: None,
            max_parallel_jobs: 1,
            default_max_retries: 0,
            retry_delay: Duration::from_secs(1),
            exponential_backoff: true,
            retry_jitter: true,
            max_retry_delay: None,
            default_task_timeout: None,
            job_timeout: None,
            continue_on_failure: false,
            fail_fast: false,
            worker_count: None,
            worker_timeout: None,
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout_multiplier: 3,
            max_reassignments: 3,
            assignment: AssignmentMode::Pull,
            queue_size: None,
            batch_size: None,
            max_memory_mb: None,
            queue_policy: QueuePolicy::Block,
            adaptive_thresholds: AdaptiveThresholds::default(),
        }
    }
}

impl EngineConfig {
    /// Check cross-field constraints. Called once by `Engine::new`.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_parallel_tasks", self.max_parallel_tasks),
            ("worker_count", self.worker_count),
            ("queue_size", self.queue_size),
            ("batch_size", self.batch_size),
            ("max_memory_mb", self.max_memory_mb),
        ];
        for (field, value) in positive {
            if value == Some(0) {
                return Err(config_error(format!("[engine].{field} must be >= 1 (got 0)")));
            }
        }

        if self.max_parallel_jobs == 0 {
            return Err(config_error("[engine].max_parallel_jobs must be >= 1 (got 0)"));
        }
        if self.fail_fast && self.continue_on_failure {
            return Err(config_error(
                "[engine].fail_fast and [engine].continue_on_failure are mutually exclusive",
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(config_error("[engine].heartbeat_interval must be > 0"));
        }
        if self.heartbeat_timeout_multiplier == 0 {
            return Err(config_error(
                "[engine].heartbeat_timeout_multiplier must be >= 1 (got 0)",
            ));
        }
        if let Some(timeout) = self.worker_timeout {
            if timeout <= self.heartbeat_interval {
                return Err(config_error(
                    "[engine].worker_timeout must be longer than heartbeat_interval",
                ));
            }
        }
        let t = self.adaptive_thresholds;
        if t.sequential_max > t.parallel_max {
            return Err(config_error(format!(
                "[engine.adaptive_thresholds] sequential_max ({}) must not exceed parallel_max ({})",
                t.sequential_max, t.parallel_max
            )));
        }
        Ok(())
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::from_flags(self.fail_fast, self.continue_on_failure)
    }

    /// How long a worker may go without a heartbeat before it is lost.
    pub fn effective_worker_timeout(&self) -> Duration {
        self.worker_timeout.unwrap_or_else(|| {
            self.heartbeat_interval
                .saturating_mul(self.heartbeat_timeout_multiplier)
        })
    }

    pub fn resource_overrides(&self) -> ResourceOverrides {
        ResourceOverrides {
            max_workers: self.max_parallel_tasks,
            max_memory_mb: self.max_memory_mb,
            queue_size: self.queue_size,
            batch_size: self.batch_size,
            max_retries: Some(self.default_max_retries),
        }
    }

    pub fn resource_allocation(&self) -> ResourceAllocation {
        ResourceAllocation::resolve(&self.resource_overrides())
    }
}

fn config_error(msg: impl Into<String>) -> TaskdagError {
    TaskdagError::ConfigError(msg.into())
}

/// `[engine]` table as written in TOML. Durations are strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEngineConfig {
    #[serde(default)]
    pub execution_mode: Option<ExecutionMode>,
    #[serde(default)]
    pub max_parallel_tasks: Option<usize>,
    #[serde(default)]
    pub max_parallel_jobs: Option<usize>,
    #[serde(default)]
    pub default_max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay: Option<String>,
    #[serde(default)]
    pub exponential_backoff: Option<bool>,
    #[serde(default)]
    pub retry_jitter: Option<bool>,
    #[serde(default)]
    pub max_retry_delay: Option<String>,
    #[serde(default)]
    pub default_task_timeout: Option<String>,
    #[serde(default)]
    pub job_timeout: Option<String>,
    #[serde(default)]
    pub continue_on_failure: Option<bool>,
    #[serde(default)]
    pub fail_fast: Option<bool>,
    #[serde(default)]
    pub worker_count: Option<usize>,
    #[serde(default)]
    pub worker_timeout: Option<String>,
    #[serde(default)]
    pub heartbeat_interval: Option<String>,
    #[serde(default)]
    pub heartbeat_timeout_multiplier: Option<u32>,
    #[serde(default)]
    pub max_reassignments: Option<u32>,
    #[serde(default)]
    pub assignment: Option<AssignmentMode>,
    #[serde(default)]
    pub queue_size: Option<usize>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub max_memory_mb: Option<usize>,
    #[serde(default)]
    pub queue_policy: Option<QueuePolicy>,
    #[serde(default)]
    pub adaptive_thresholds: Option<AdaptiveThresholds>,
}

impl TryFrom<RawEngineConfig> for EngineConfig {
    type Error = TaskdagError;

    fn try_from(raw: RawEngineConfig) -> std::result::Result<Self, Self::Error> {
        let d = EngineConfig::default();

        let required = |field: &str, value: Option<&str>, default: Duration| {
            value
                .map(|v| parse_duration(v).map_err(|e| config_error(format!("[engine].{field}: {e}"))))
                .unwrap_or(Ok(default))
        };
        let optional = |field: &str, value: Option<&str>| {
            parse_optional(&format!("[engine].{field}"), value).map_err(config_error)
        };

        let cfg = EngineConfig {
            execution_mode: raw.execution_mode.unwrap_or(d.execution_mode),
            max_parallel_tasks: raw.max_parallel_tasks,
            max_parallel_jobs: raw.max_parallel_jobs.unwrap_or(d.max_parallel_jobs),
            default_max_retries: raw.default_max_retries.unwrap_or(d.default_max_retries),
            retry_delay: required("retry_delay", raw.retry_delay.as_deref(), d.retry_delay)?,
            exponential_backoff: raw.exponential_backoff.unwrap_or(d.exponential_backoff),
            retry_jitter: raw.retry_jitter.unwrap_or(d.retry_jitter),
            max_retry_delay: optional("max_retry_delay", raw.max_retry_delay.as_deref())?,
            default_task_timeout: optional(
                "default_task_timeout",
                raw.default_task_timeout.as_deref(),
            )?,
            job_timeout: optional("job_timeout", raw.job_timeout.as_deref())?,
            continue_on_failure: raw.continue_on_failure.unwrap_or(d.continue_on_failure),
            fail_fast: raw.fail_fast.unwrap_or(d.fail_fast),
            worker_count: raw.worker_count,
            worker_timeout: optional("worker_timeout", raw.worker_timeout.as_deref())?,
            heartbeat_interval: required(
                "heartbeat_interval",
                raw.heartbeat_interval.as_deref(),
                d.heartbeat_interval,
            )?,
            heartbeat_timeout_multiplier: raw
                .heartbeat_timeout_multiplier
                .unwrap_or(d.heartbeat_timeout_multiplier),
            max_reassignments: raw.max_reassignments.unwrap_or(d.max_reassignments),
            assignment: raw.assignment.unwrap_or(d.assignment),
            queue_size: raw.queue_size,
            batch_size: raw.batch_size,
            max_memory_mb: raw.max_memory_mb,
            queue_policy: raw.queue_policy.unwrap_or(d.queue_policy),
            adaptive_thresholds: raw.adaptive_thresholds.unwrap_or(d.adaptive_thresholds),
        };

        cfg.validate()?;
        Ok(cfg)
    }
}
