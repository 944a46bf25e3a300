// src/resources.rs

//! Worker, queue and batch sizing.
//!
//! The allocator only computes bounds; the engine sizes its pools from
//! them. Explicit values always win over detected ones, field by field.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Memory budget assumed when none is configured.
pub const DEFAULT_MAX_MEMORY_MB: usize = 2048;

/// Retry budget used by [`ResourceAllocation::auto_detect`].
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Bounds for one engine (or one job, when sized per job).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub max_workers: usize,
    pub max_memory_mb: usize,
    /// Capacity of the submission queue, in tasks.
    pub queue_size: usize,
    /// Cohort size for batched execution.
    pub batch_size: usize,
    /// Retry budget for tasks that do not set their own.
    pub max_retries: u32,
}

/// Caller-supplied values; `None` keeps the detected value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceOverrides {
    pub max_workers: Option<usize>,
    pub max_memory_mb: Option<usize>,
    pub queue_size: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_retries: Option<u32>,
}

impl ResourceAllocation {
    /// Derive bounds from the host's available parallelism.
    pub fn auto_detect() -> Self {
        let allocation = Self::for_cpu_count(cpu_count());
        debug!(?allocation, "auto-detected resource allocation");
        allocation
    }

    /// Bounds for a host with `cpus` logical CPUs.
    pub fn for_cpu_count(cpus: usize) -> Self {
        let cpus = cpus.max(1);
        Self {
            max_workers: cpus.saturating_sub(1).max(1),
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            queue_size: cpus * 25,
            batch_size: (cpus / 2).max(1),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_overrides(self, overrides: &ResourceOverrides) -> Self {
        Self {
            max_workers: overrides.max_workers.unwrap_or(self.max_workers),
            max_memory_mb: overrides.max_memory_mb.unwrap_or(self.max_memory_mb),
            queue_size: overrides.queue_size.unwrap_or(self.queue_size),
            batch_size: overrides.batch_size.unwrap_or(self.batch_size),
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
        }
    }

    /// `auto_detect()` with `overrides` applied.
    pub fn resolve(overrides: &ResourceOverrides) -> Self {
        Self::auto_detect().with_overrides(overrides)
    }
}

fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eight_cpus() {
        let a = ResourceAllocation::for_cpu_count(8);
        assert_eq!(a.max_workers, 7);
        assert_eq!(a.queue_size, 200);
        assert_eq!(a.batch_size, 4);
    }

    #[test]
    fn single_cpu_still_gets_one_worker() {
        let a = ResourceAllocation::for_cpu_count(1);
        assert_eq!(a.max_workers, 1);
        assert_eq!(a.queue_size, 25);
        assert_eq!(a.batch_size, 1);
    }

    #[test]
    fn overrides_apply_field_by_field() {
        let base = ResourceAllocation::for_cpu_count(4);
        let merged = base.with_overrides(&ResourceOverrides {
            max_workers: Some(16),
            max_retries: Some(0),
            ..Default::default()
        });
        assert_eq!(merged.max_workers, 16);
        assert_eq!(merged.max_retries, 0);
        assert_eq!(merged.queue_size, base.queue_size);
        assert_eq!(merged.batch_size, base.batch_size);
    }

    #[test]
    fn auto_detect_is_positive() {
        let a = ResourceAllocation::auto_detect();
        assert!(a.max_workers >= 1 && a.queue_size >= 25 && a.batch_size >= 1);
    }
}
