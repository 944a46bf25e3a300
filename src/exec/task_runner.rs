// src/exec/task_runner.rs

//! Running a single attempt.

use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::backend::{Dispatch, EventSender, ExecEvent};
use crate::model::{TaskError, WorkResult};

/// Execute one attempt of `dispatch`, applying its timeout.
///
/// - If the attempt was cancelled before it started, the work is not
///   invoked at all.
/// - On timeout the attempt's token is cancelled and the spawned work is
///   aborted; work that ignores both may keep running in the background.
/// - A panic inside the work becomes a `panicked` task error.
pub async fn run_attempt(dispatch: &Dispatch, worker_id: Option<String>) -> (WorkResult, Duration) {
    if dispatch.cancel.is_cancelled() {
        return (Err(TaskError::cancelled()), Duration::ZERO);
    }

    let started = Instant::now();
    let work = dispatch.work.clone();
    let ctx = dispatch.context(worker_id);
    let mut handle = tokio::spawn(async move { work.execute(ctx).await });

    let joined = match dispatch.timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_elapsed) => {
                warn!(
                    task = %dispatch.task_id,
                    attempt = dispatch.attempt,
                    timeout_ms = limit.as_millis() as u64,
                    "task timed out; cancelling"
                );
                dispatch.cancel.cancel();
                handle.abort();
                return (Err(TaskError::timeout(limit)), started.elapsed());
            }
        },
        None => handle.await,
    };

    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => {
            let message = panic_message(err.into_panic());
            error!(
                task = %dispatch.task_id,
                attempt = dispatch.attempt,
                panic = %message,
                "task panicked"
            );
            Err(TaskError::panicked(message))
        }
        Err(_) => Err(TaskError::cancelled()),
    };

    debug!(
        task = %dispatch.task_id,
        attempt = dispatch.attempt,
        ok = outcome.is_ok(),
        "attempt finished"
    );
    (outcome, started.elapsed())
}

/// Run every member of a cohort in order, streaming events as they happen.
pub(crate) async fn run_cohort(cohort: Vec<Dispatch>, events: &EventSender) {
    for dispatch in cohort {
        if dispatch.cancel.is_cancelled() {
            let _ = events.send(ExecEvent::Finished {
                index: dispatch.index,
                lease: dispatch.lease,
                outcome: Err(TaskError::cancelled()),
                elapsed: Duration::ZERO,
            });
            continue;
        }

        let _ = events.send(ExecEvent::Started {
            index: dispatch.index,
            lease: dispatch.lease,
            worker_id: None,
        });
        let (outcome, elapsed) = run_attempt(&dispatch, None).await;
        let _ = events.send(ExecEvent::Finished {
            index: dispatch.index,
            lease: dispatch.lease,
            outcome,
            elapsed,
        });
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::model::{JobId, TaskErrorKind, Work, work_fn};

    fn dispatch(work: impl Work + 'static, timeout: Option<Duration>) -> Dispatch {
        Dispatch {
            job_id: JobId::new(),
            index: 0,
            lease: 1,
            task_id: "t".into(),
            name: "t".into(),
            attempt: 1,
            work: Arc::new(work),
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn success_passes_payload_through() {
        let d = dispatch(work_fn(|_ctx| async { Ok(json!({"n": 1})) }), None);
        let (outcome, _) = run_attempt(&d, None).await;
        assert_eq!(outcome, Ok(json!({"n": 1})));
    }

    #[tokio::test]
    async fn timeout_cancels_the_attempt() {
        let d = dispatch(
            work_fn(|ctx| async move {
                ctx.cancelled().await;
                Ok(json!(null))
            }),
            Some(Duration::from_millis(20)),
        );
        let (outcome, _) = run_attempt(&d, None).await;
        assert_eq!(outcome.unwrap_err().kind, TaskErrorKind::Timeout);
        assert!(d.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn panic_is_captured() {
        let d = dispatch(
            work_fn(|_ctx| async {
                if true {
                    panic!("kaboom");
                }
                Ok(json!(null))
            }),
            None,
        );
        let (outcome, _) = run_attempt(&d, None).await;
        let err = outcome.unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Panicked);
        assert!(err.message.contains("kaboom"));
    }

    #[tokio::test]
    async fn cancelled_dispatch_never_invokes_work() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let d = dispatch(
            work_fn(move |_ctx| {
                flag.store(true, Ordering::SeqCst);
                async { Ok(json!(null)) }
            }),
            None,
        );
        d.cancel.cancel();
        let (outcome, _) = run_attempt(&d, None).await;
        assert_eq!(outcome.unwrap_err().kind, TaskErrorKind::Cancelled);
        assert!(!called.load(Ordering::SeqCst));
    }
}
