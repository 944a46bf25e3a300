// src/distributed/registry.rs

//! Worker liveness and assignment bookkeeping.
//!
//! The registry is pure: every operation takes the current time explicitly
//! and nothing here spawns, sleeps or locks. The pool wraps it in a mutex
//! and drives it from worker and monitor tasks.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Unreachable,
}

/// Point-in-time pool overview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub total_workers: usize,
    pub busy: usize,
    pub idle: usize,
    pub unreachable: usize,
}

/// Read-only view of one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerView {
    pub id: String,
    pub status: WorkerStatus,
    pub last_heartbeat: Instant,
    pub assigned_task_id: Option<TaskId>,
    /// Assignments held, started or not.
    pub held: usize,
    pub completed: u64,
}

#[derive(Debug)]
struct Worker<T> {
    last_heartbeat: Instant,
    unreachable: bool,
    assigned_task_id: Option<TaskId>,
    running: Option<u64>,
    held: BTreeMap<u64, T>,
    completed: u64,
}

impl<T> Worker<T> {
    fn status(&self) -> WorkerStatus {
        if self.unreachable {
            WorkerStatus::Unreachable
        } else if self.running.is_some() {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Idle
        }
    }
}

/// Registered workers and the assignments each one holds, keyed by ticket.
#[derive(Debug)]
pub struct WorkerRegistry<T> {
    workers: BTreeMap<String, Worker<T>>,
    /// Round-robin position for push assignment tie-breaks.
    cursor: usize,
}

impl<T> Default for WorkerRegistry<T> {
    fn default() -> Self {
        Self {
            workers: BTreeMap::new(),
            cursor: 0,
        }
    }
}

impl<T> WorkerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a worker as idle and alive.
    pub fn register(&mut self, id: impl Into<String>, now: Instant) {
        let id = id.into();
        debug!(worker = %id, "worker registered");
        self.workers.insert(
            id,
            Worker {
                last_heartbeat: now,
                unreachable: false,
                assigned_task_id: None,
                running: None,
                held: BTreeMap::new(),
                completed: 0,
            },
        );
    }

    /// Record a heartbeat. Returns `false` for unknown or unreachable
    /// workers; those must stop working.
    pub fn heartbeat(&mut self, id: &str, now: Instant) -> bool {
        match self.workers.get_mut(id) {
            Some(w) if !w.unreachable => {
                w.last_heartbeat = now;
                true
            }
            _ => false,
        }
    }

    /// Bring a worker that was swept as unreachable back as idle.
    ///
    /// Whatever it held was already reclaimed by the sweep. Returns `false`
    /// for unknown workers and for workers that are still reachable.
    pub fn rejoin(&mut self, id: &str, now: Instant) -> bool {
        match self.workers.get_mut(id) {
            Some(w) if w.unreachable => {
                debug!(worker = %id, "worker rejoined");
                w.unreachable = false;
                w.last_heartbeat = now;
                true
            }
            _ => false,
        }
    }

    /// Give `item` to a worker. Hands it back if the worker cannot take it.
    pub fn hold(&mut self, id: &str, ticket: u64, item: T) -> Result<(), T> {
        match self.workers.get_mut(id) {
            Some(w) if !w.unreachable => {
                w.held.insert(ticket, item);
                Ok(())
            }
            _ => Err(item),
        }
    }

    /// The worker began executing a held assignment.
    ///
    /// Returns `false` if the assignment was already taken back.
    pub fn start(&mut self, id: &str, ticket: u64, task_id: TaskId) -> bool {
        match self.workers.get_mut(id) {
            Some(w) if !w.unreachable && w.held.contains_key(&ticket) => {
                w.running = Some(ticket);
                w.assigned_task_id = Some(task_id);
                true
            }
            _ => false,
        }
    }

    /// The worker finished an assignment.
    ///
    /// Returns `None` when the assignment was reclaimed in the meantime; the
    /// result must then be discarded.
    pub fn finish(&mut self, id: &str, ticket: u64) -> Option<T> {
        let w = self.workers.get_mut(id)?;
        let item = w.held.remove(&ticket)?;
        if w.running == Some(ticket) {
            w.running = None;
            w.assigned_task_id = None;
        }
        w.completed += 1;
        Some(item)
    }

    /// Mark every worker silent for longer than `timeout` as unreachable
    /// and take back what it held.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<(String, Vec<T>)> {
        let stale: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, w)| !w.unreachable && now.saturating_duration_since(w.last_heartbeat) > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        stale
            .into_iter()
            .map(|id| {
                let items = self.mark_unreachable(&id);
                (id, items)
            })
            .collect()
    }

    pub fn mark_unreachable(&mut self, id: &str) -> Vec<T> {
        let Some(w) = self.workers.get_mut(id) else {
            return Vec::new();
        };
        if !w.unreachable {
            warn!(worker = %id, held = w.held.len(), "worker unreachable");
        }
        w.unreachable = true;
        w.running = None;
        w.assigned_task_id = None;
        std::mem::take(&mut w.held).into_values().collect()
    }

    /// Reachable worker holding the fewest assignments; ties rotate.
    pub fn least_loaded(&mut self) -> Option<String> {
        let candidates: Vec<(&String, usize)> = self
            .workers
            .iter()
            .filter(|(_, w)| !w.unreachable)
            .map(|(id, w)| (id, w.held.len()))
            .collect();
        let min = candidates.iter().map(|&(_, load)| load).min()?;
        let tied: Vec<&String> = candidates
            .iter()
            .filter(|&&(_, load)| load == min)
            .map(|&(id, _)| id)
            .collect();

        let pick = tied[self.cursor % tied.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);
        Some(pick)
    }

    pub fn reachable_count(&self) -> usize {
        self.workers.values().filter(|w| !w.unreachable).count()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn stats(&self) -> WorkerStats {
        let mut stats = WorkerStats {
            total_workers: self.workers.len(),
            ..Default::default()
        };
        for w in self.workers.values() {
            match w.status() {
                WorkerStatus::Idle => stats.idle += 1,
                WorkerStatus::Busy => stats.busy += 1,
                WorkerStatus::Unreachable => stats.unreachable += 1,
            }
        }
        stats
    }

    pub fn worker(&self, id: &str) -> Option<WorkerView> {
        self.workers.get(id).map(|w| WorkerView {
            id: id.to_string(),
            status: w.status(),
            last_heartbeat: w.last_heartbeat,
            assigned_task_id: w.assigned_task_id.clone(),
            held: w.held.len(),
            completed: w.completed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(now: Instant, ids: &[&str]) -> WorkerRegistry<&'static str> {
        let mut reg = WorkerRegistry::new();
        for id in ids {
            reg.register(*id, now);
        }
        reg
    }

    #[test]
    fn sweep_reclaims_held_work_from_silent_workers() {
        let t0 = Instant::now();
        let mut reg = registry(t0, &["a", "b"]);
        reg.hold("a", 1, "task-1").unwrap();
        assert!(reg.start("a", 1, TaskId::from("task-1")));
        assert_eq!(reg.stats().busy, 1);

        let later = t0 + Duration::from_secs(10);
        assert!(reg.heartbeat("b", later));
        let lost = reg.sweep(later, Duration::from_secs(3));

        assert_eq!(lost, vec![("a".to_string(), vec!["task-1"])]);
        assert_eq!(
            reg.stats(),
            WorkerStats {
                total_workers: 2,
                busy: 0,
                idle: 1,
                unreachable: 1
            }
        );
        assert!(!reg.heartbeat("a", later));
        assert_eq!(reg.finish("a", 1), None);
    }

    #[test]
    fn swept_worker_can_rejoin() {
        let t0 = Instant::now();
        let mut reg = registry(t0, &["a"]);
        reg.hold("a", 1, "x").unwrap();
        let later = t0 + Duration::from_secs(10);
        assert_eq!(reg.sweep(later, Duration::from_secs(3)).len(), 1);

        assert!(!reg.heartbeat("a", later));
        assert!(reg.rejoin("a", later));
        assert!(!reg.rejoin("a", later));
        assert!(!reg.rejoin("ghost", later));

        let view = reg.worker("a").unwrap();
        assert_eq!(view.status, WorkerStatus::Idle);
        assert_eq!(view.held, 0);
        assert!(reg.heartbeat("a", later));
        assert_eq!(reg.hold("a", 2, "y"), Ok(()));
    }

    #[test]
    fn unreachable_worker_refuses_new_work() {
        let t0 = Instant::now();
        let mut reg = registry(t0, &["a"]);
        reg.mark_unreachable("a");
        assert_eq!(reg.hold("a", 1, "x"), Err("x"));
        assert_eq!(reg.reachable_count(), 0);
        assert_eq!(reg.least_loaded(), None);
    }

    #[test]
    fn least_loaded_rotates_between_ties() {
        let t0 = Instant::now();
        let mut reg = registry(t0, &["a", "b", "c"]);
        reg.hold("b", 1, "x").unwrap();

        let first = reg.least_loaded().unwrap();
        let second = reg.least_loaded().unwrap();
        assert_ne!(first, "b");
        assert_ne!(second, "b");
        assert_ne!(first, second);
    }

    #[test]
    fn finish_clears_assignment() {
        let t0 = Instant::now();
        let mut reg = registry(t0, &["a"]);
        reg.hold("a", 9, "x").unwrap();
        reg.start("a", 9, TaskId::from("x"));
        assert_eq!(
            reg.worker("a").unwrap().assigned_task_id,
            Some(TaskId::from("x"))
        );
        assert_eq!(reg.finish("a", 9), Some("x"));
        let view = reg.worker("a").unwrap();
        assert_eq!(view.status, WorkerStatus::Idle);
        assert_eq!(view.completed, 1);
        assert_eq!(view.assigned_task_id, None);
    }
}
