// src/distributed/pool.rs

//! In-process worker pool with heartbeats and reassignment.
//!
//! Each worker is a Tokio task with its own heartbeat loop. A monitor task
//! sweeps the [`WorkerRegistry`] and hands the assignments of silent
//! workers back to their job driver as [`ExecEvent::WorkerLost`]. Results
//! travel as JSON [`TaskResultRecord`]s, the same shape a remote worker
//! would send.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::queue::TaskQueue;
use super::records::{TaskAssignment, TaskResultRecord};
use super::registry::{WorkerRegistry, WorkerStats, WorkerView};
use crate::config::EngineConfig;
use crate::errors::Result;
use crate::exec::{Dispatch, EventSender, ExecEvent, ExecutorBackend, run_attempt};
use crate::resources::ResourceAllocation;
use crate::types::AssignmentMode;

/// Sizing and liveness settings for a [`DistributedPool`].
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub worker_count: usize,
    pub heartbeat_interval: Duration,
    /// Silence after which a worker counts as lost.
    pub worker_timeout: Duration,
    pub assignment: AssignmentMode,
}

impl PoolConfig {
    pub fn from_engine(cfg: &EngineConfig, allocation: &ResourceAllocation) -> Self {
        Self {
            worker_count: cfg.worker_count.unwrap_or(allocation.max_workers).max(1),
            heartbeat_interval: cfg.heartbeat_interval,
            worker_timeout: cfg.effective_worker_timeout(),
            assignment: cfg.assignment,
        }
    }
}

/// An assignment waiting for or held by a worker.
#[derive(Clone)]
struct QueuedAssignment {
    ticket: u64,
    dispatch: Dispatch,
    reply: EventSender,
}

impl QueuedAssignment {
    fn lost(&self, worker_id: &str) {
        let _ = self.reply.send(ExecEvent::WorkerLost {
            index: self.dispatch.index,
            lease: self.dispatch.lease,
            worker_id: worker_id.to_string(),
        });
        let _ = self.reply.send(ExecEvent::SlotFreed);
    }

    fn exhausted(&self) {
        let _ = self.reply.send(ExecEvent::PoolExhausted {
            index: self.dispatch.index,
            lease: self.dispatch.lease,
        });
        let _ = self.reply.send(ExecEvent::SlotFreed);
    }
}

struct PoolShared {
    config: PoolConfig,
    registry: Mutex<WorkerRegistry<QueuedAssignment>>,
    /// Shared queue for pull assignment.
    queue: TaskQueue<QueuedAssignment>,
    /// Per-worker inboxes for push assignment.
    inboxes: BTreeMap<String, TaskQueue<QueuedAssignment>>,
    kills: BTreeMap<String, CancellationToken>,
    shutdown: CancellationToken,
    next_ticket: AtomicU64,
}

impl PoolShared {
    fn registry(&self) -> MutexGuard<'_, WorkerRegistry<QueuedAssignment>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn exhaust_queue(&self) {
        for item in self.queue.drain() {
            warn!(task = %item.dispatch.task_id, "no reachable workers left");
            item.exhausted();
        }
    }
}

/// A fixed set of simulated workers.
///
/// Started lazily by the engine on the first distributed job and shared by
/// every job after that.
pub struct DistributedPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DistributedPool {
    /// Register `worker_count` workers and start their loops.
    pub fn start(config: PoolConfig) -> Arc<Self> {
        let ids: Vec<String> = (1..=config.worker_count.max(1))
            .map(|i| format!("worker-{i}"))
            .collect();

        let now = Instant::now();
        let mut registry = WorkerRegistry::new();
        for id in &ids {
            registry.register(id.clone(), now);
        }

        info!(
            workers = ids.len(),
            heartbeat_ms = config.heartbeat_interval.as_millis() as u64,
            timeout_ms = config.worker_timeout.as_millis() as u64,
            assignment = ?config.assignment,
            "starting worker pool"
        );

        let shared = Arc::new(PoolShared {
            inboxes: ids.iter().map(|id| (id.clone(), TaskQueue::new())).collect(),
            kills: ids.iter().map(|id| (id.clone(), CancellationToken::new())).collect(),
            registry: Mutex::new(registry),
            queue: TaskQueue::new(),
            shutdown: CancellationToken::new(),
            next_ticket: AtomicU64::new(1),
            config,
        });

        let mut handles: Vec<JoinHandle<()>> = ids
            .into_iter()
            .map(|id| tokio::spawn(worker_loop(Arc::clone(&shared), id)))
            .collect();
        handles.push(tokio::spawn(monitor_loop(Arc::clone(&shared))));

        Arc::new(Self {
            shared,
            handles: Mutex::new(handles),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn worker_count(&self) -> usize {
        self.shared.kills.len()
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.shared.kills.keys().cloned().collect()
    }

    pub fn get_worker_stats(&self) -> WorkerStats {
        self.shared.registry().stats()
    }

    pub fn worker(&self, id: &str) -> Option<WorkerView> {
        self.shared.registry().worker(id)
    }

    pub fn workers(&self) -> Vec<WorkerView> {
        let registry = self.shared.registry();
        self.shared
            .kills
            .keys()
            .filter_map(|id| registry.worker(id))
            .collect()
    }

    /// Hand one attempt to the pool. Outcome events go to `reply`.
    pub(crate) fn submit(&self, dispatch: Dispatch, reply: EventSender) {
        let ticket = self.shared.next_ticket.fetch_add(1, Ordering::Relaxed);
        let item = QueuedAssignment {
            ticket,
            dispatch,
            reply,
        };

        let mut registry = self.shared.registry();
        if registry.reachable_count() == 0 {
            drop(registry);
            warn!(task = %item.dispatch.task_id, "no reachable workers left");
            item.exhausted();
            return;
        }

        match self.shared.config.assignment {
            AssignmentMode::Pull => {
                drop(registry);
                debug!(task = %item.dispatch.task_id, ticket, "assignment queued");
                self.shared.queue.push(item);
            }
            AssignmentMode::Push => {
                let Some(worker) = registry.least_loaded() else {
                    drop(registry);
                    item.exhausted();
                    return;
                };
                if let Err(item) = registry.hold(&worker, ticket, item.clone()) {
                    drop(registry);
                    item.exhausted();
                    return;
                }
                debug!(task = %item.dispatch.task_id, worker = %worker, ticket, "assignment pushed");
                // Still under the registry lock, so a concurrent sweep
                // either sees this item as held or drains the inbox after.
                if let Some(inbox) = self.shared.inboxes.get(&worker) {
                    inbox.push(item);
                }
            }
        }
    }

    /// Stop a worker's loops as if its process died. Its assignments are
    /// reclaimed once the heartbeat timeout expires, and it never rejoins.
    pub fn kill_worker(&self, id: &str) -> bool {
        match self.shared.kills.get(id) {
            Some(kill) if !kill.is_cancelled() => {
                warn!(worker = %id, "killing worker");
                kill.cancel();
                true
            }
            _ => false,
        }
    }

    /// Stop every worker and the monitor.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
        info!("worker pool stopped");
    }
}

impl Drop for DistributedPool {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl fmt::Debug for DistributedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedPool")
            .field("config", &self.shared.config)
            .field("stats", &self.get_worker_stats())
            .finish()
    }
}

async fn worker_loop(shared: Arc<PoolShared>, id: String) {
    let Some(kill) = shared.kills.get(&id).cloned() else {
        return;
    };
    let heartbeat = tokio::spawn(heartbeat_loop(Arc::clone(&shared), id.clone(), kill.clone()));
    let pull = shared.config.assignment == AssignmentMode::Pull;
    let source = if pull {
        &shared.queue
    } else {
        match shared.inboxes.get(&id) {
            Some(inbox) => inbox,
            None => return,
        }
    };
    debug!(worker = %id, "worker started");

    loop {
        let item = tokio::select! {
            _ = kill.cancelled() => break,
            _ = shared.shutdown.cancelled() => break,
            item = source.pop() => item,
        };

        if pull {
            let held = shared.registry().hold(&id, item.ticket, item.clone());
            if let Err(item) = held {
                // Swept as unreachable; leave the work to others until the
                // heartbeat loop rejoins us.
                shared.queue.push_front(item);
                tokio::select! {
                    _ = kill.cancelled() => break,
                    _ = shared.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(shared.config.heartbeat_interval) => continue,
                }
            }
        }

        if !run_assignment(&shared, &id, &kill, item).await {
            break;
        }
    }

    heartbeat.abort();
    debug!(worker = %id, "worker stopped");
}

/// Execute one held assignment. Returns `false` when the worker was killed.
async fn run_assignment(shared: &PoolShared, id: &str, kill: &CancellationToken, item: QueuedAssignment) -> bool {
    let assignment = TaskAssignment::from(&item.dispatch);
    if !shared.registry().start(id, item.ticket, assignment.task_id.clone()) {
        debug!(worker = %id, task = %assignment.task_id, "assignment reclaimed before start");
        return true;
    }

    let _ = item.reply.send(ExecEvent::Started {
        index: assignment.index,
        lease: assignment.lease,
        worker_id: Some(id.to_string()),
    });
    debug!(worker = %id, task = %assignment.task_id, attempt = assignment.attempt, "worker running task");

    let (outcome, elapsed) = tokio::select! {
        _ = kill.cancelled() => {
            warn!(worker = %id, task = %assignment.task_id, "worker died mid-task");
            item.dispatch.cancel.cancel();
            return false;
        }
        finished = run_attempt(&item.dispatch, Some(id.to_string())) => finished,
    };

    if shared.registry().finish(id, item.ticket).is_none() {
        debug!(worker = %id, task = %assignment.task_id, "dropping result of reclaimed assignment");
        return true;
    }

    deliver(TaskResultRecord::new(&assignment, id, outcome, elapsed), &item.reply);
    let _ = item.reply.send(ExecEvent::SlotFreed);
    true
}

fn deliver(record: TaskResultRecord, reply: &EventSender) {
    let record = match record.to_json().and_then(|wire| TaskResultRecord::from_json(&wire)) {
        Ok(decoded) => decoded,
        Err(err) => {
            warn!(error = %err, task = %record.task_id, "result record failed to round-trip");
            record
        }
    };
    let _ = reply.send(ExecEvent::Finished {
        index: record.index,
        lease: record.lease,
        outcome: record.outcome(),
        elapsed: record.elapsed(),
    });
}

async fn heartbeat_loop(shared: Arc<PoolShared>, id: String, kill: CancellationToken) {
    let period = shared.config.heartbeat_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = kill.cancelled() => break,
            _ = shared.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let now = Instant::now();
        let mut registry = shared.registry();
        if registry.heartbeat(&id, now) {
            continue;
        }
        if registry.rejoin(&id, now) {
            info!(worker = %id, "worker was marked unreachable but is alive; rejoining");
        } else {
            warn!(worker = %id, "heartbeat rejected; stopping worker");
            drop(registry);
            kill.cancel();
            break;
        }
    }
}

async fn monitor_loop(shared: Arc<PoolShared>) {
    let period = (shared.config.heartbeat_interval / 2).max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let (lost, reachable) = {
            let mut registry = shared.registry();
            let lost = registry.sweep(Instant::now(), shared.config.worker_timeout);
            (lost, registry.reachable_count())
        };

        for (worker, items) in lost {
            // The worker itself keeps running. A dead one stays unreachable;
            // a merely slow one rejoins on its next heartbeat.
            // Inbox entries are also held, so they come back through `items`.
            if let Some(inbox) = shared.inboxes.get(&worker) {
                inbox.drain();
            }
            for item in items {
                warn!(worker = %worker, task = %item.dispatch.task_id, "reclaiming assignment from lost worker");
                item.lost(&worker);
            }
        }

        if reachable == 0 {
            shared.exhaust_queue();
        }
    }
}

/// [`ExecutorBackend`] that forwards every dispatch to the pool.
///
/// One attempt occupies one slot, so cohorts here are single tasks.
pub(crate) struct DistributedBackend {
    pool: Arc<DistributedPool>,
}

impl DistributedBackend {
    pub(crate) fn new(pool: Arc<DistributedPool>) -> Self {
        Self { pool }
    }
}

impl ExecutorBackend for DistributedBackend {
    fn capacity(&self) -> usize {
        self.pool.worker_count()
    }

    fn dispatch(
        &mut self,
        cohort: Vec<Dispatch>,
        events: EventSender,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        for dispatch in cohort {
            self.pool.submit(dispatch, events.clone());
        }
        Box::pin(async { Ok(()) })
    }

    fn name(&self) -> &'static str {
        "distributed"
    }
}
