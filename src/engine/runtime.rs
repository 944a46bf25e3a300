// src/engine/runtime.rs

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OnceCell, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::core::{HaltReason, JobCore};
use crate::exec::{ExecEvent, ExecutorBackend};
use crate::report::{BatchResult, ProgressRegistry};

/// Shared state of one submitted job.
///
/// The core sits behind its own mutex, so unrelated jobs never contend.
/// Progress events are broadcast after the lock is released.
pub(crate) struct JobRun {
    core: Mutex<JobCore>,
    pub(crate) cancel: CancellationToken,
    listeners: Arc<ProgressRegistry>,
    pub(crate) result: OnceCell<BatchResult>,
}

impl JobRun {
    pub(crate) fn new(core: JobCore, listeners: Arc<ProgressRegistry>) -> Self {
        Self {
            core: Mutex::new(core),
            cancel: CancellationToken::new(),
            listeners,
            result: OnceCell::new(),
        }
    }

    /// Run `f` against the core, then deliver the events it produced.
    pub(crate) fn with_core<R>(&self, f: impl FnOnce(&mut JobCore) -> R) -> R {
        let (out, events) = {
            let mut core = self.core.lock().unwrap_or_else(PoisonError::into_inner);
            let out = f(&mut core);
            (out, core.take_events())
        };
        self.listeners.broadcast(&events);
        out
    }
}

impl fmt::Debug for JobRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRun")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("finished", &self.result.initialized())
            .finish_non_exhaustive()
    }
}

/// Drive a job to completion on `backend`.
///
/// This is the async IO shell around [`JobCore`]: it dispatches ready
/// cohorts while the backend has free slots, feeds backend events into the
/// core, runs retry timers and watches for cancellation and the job
/// deadline. Readiness is re-evaluated after every event; nothing is polled.
pub(crate) async fn drive<B>(run: &JobRun, backend: &mut B, job_timeout: Option<Duration>) -> BatchResult
where
    B: ExecutorBackend + ?Sized,
{
    if !run.with_core(|core| core.start()) {
        // Cancelled before it started.
        return run.with_core(|core| core.finish());
    }

    let strategy = run.with_core(|core| core.strategy());
    let capacity = backend.capacity().max(1);
    let cohort_size = strategy.cohort_size().max(1);
    info!(backend = backend.name(), capacity, cohort_size, "job driver started");

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ExecEvent>();
    let (retry_tx, mut retry_rx) = mpsc::unbounded_channel::<(usize, u64)>();
    let mut timers: Vec<JoinHandle<()>> = Vec::new();
    let mut pending_timers = 0usize;
    let mut busy = 0usize;
    let mut cancel_seen = false;

    let deadline = tokio::time::sleep(job_timeout.unwrap_or_default());
    tokio::pin!(deadline);
    let mut deadline_armed = job_timeout.is_some();

    loop {
        while busy < capacity {
            let cohort = run.with_core(|core| core.take_ready(cohort_size, &run.cancel));
            if cohort.is_empty() {
                break;
            }
            if let Err(err) = backend.dispatch(cohort, events_tx.clone()).await {
                warn!(error = %err, "backend rejected dispatch");
                run.with_core(|core| core.halt(HaltReason::Backend(err.to_string())));
                run.cancel.cancel();
                break;
            }
            busy += 1;
        }

        if run.with_core(|core| core.is_drained()) {
            break;
        }

        if busy == 0 && pending_timers == 0 {
            warn!("no work in flight but tasks remain; halting");
            run.with_core(|core| core.halt(HaltReason::Stalled));
            break;
        }

        tokio::select! {
            Some(event) = events_rx.recv() => {
                debug!(?event, "driver received event");
                match event {
                    ExecEvent::Started { index, lease, worker_id } => {
                        run.with_core(|core| core.mark_running(index, lease, worker_id));
                    }
                    ExecEvent::Finished { index, lease, outcome, elapsed } => {
                        let retry = run.with_core(|core| core.record_outcome(index, lease, outcome, elapsed));
                        if let Some(delay) = retry {
                            pending_timers += 1;
                            let tx = retry_tx.clone();
                            timers.push(tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let _ = tx.send((index, lease));
                            }));
                        }
                    }
                    ExecEvent::WorkerLost { index, lease, worker_id } => {
                        run.with_core(|core| core.reassign(index, lease, &worker_id));
                    }
                    ExecEvent::PoolExhausted { index, lease } => {
                        run.with_core(|core| core.pool_exhausted(index, lease));
                    }
                    ExecEvent::SlotFreed => {
                        busy = busy.saturating_sub(1);
                    }
                }
            }

            Some((index, lease)) = retry_rx.recv() => {
                pending_timers = pending_timers.saturating_sub(1);
                run.with_core(|core| core.retry_due(index, lease));
            }

            _ = run.cancel.cancelled(), if !cancel_seen => {
                cancel_seen = true;
                run.with_core(|core| core.halt(HaltReason::Cancelled));
            }

            _ = &mut deadline, if deadline_armed => {
                deadline_armed = false;
                if let Some(limit) = job_timeout {
                    run.with_core(|core| core.halt(HaltReason::JobTimeout(limit)));
                }
                cancel_seen = true;
                run.cancel.cancel();
            }
        }

        // Fail-fast and pool exhaustion signal running work too.
        if !cancel_seen && run.with_core(|core| core.is_halted()) {
            cancel_seen = true;
            run.cancel.cancel();
        }
    }

    for timer in timers {
        timer.abort();
    }
    run.with_core(|core| core.finish())
}
